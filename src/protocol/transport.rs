//! Byte-stream transport for JSON-RPC messages.
//!
//! The canonical transport reads newline-delimited JSON objects from stdin
//! and writes responses to stdout. Decoded requests and non-fatal decode
//! errors are delivered through channels; a decode failure never tears down
//! the stream, the next well-formed line resynchronizes it.

use crate::error::{TransportError, TransportResult};
use crate::protocol::types::{JSONRPC_VERSION, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Transport trait for MCP communication.
///
/// Lifecycle: `start` spawns the read loop and returns immediately; `stop`
/// is idempotent and closes the request and error streams exactly once.
/// After `stop`, `send` fails with [`TransportError::Closed`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin reading from the underlying stream.
    async fn start(&self) -> TransportResult<()>;

    /// Shut the transport down. Safe to call more than once.
    async fn stop(&self);

    /// Serialize and write one response as a single framed message.
    async fn send(&self, response: &JsonRpcResponse) -> TransportResult<()>;

    /// Take the stream of decoded requests. Yields `Some` exactly once.
    fn requests(&self) -> Option<mpsc::Receiver<JsonRpcRequest>>;

    /// Take the stream of non-fatal decode/validation errors. Yields `Some`
    /// exactly once.
    fn errors(&self) -> Option<mpsc::Receiver<TransportError>>;
}

/// State shared between the transport handle and its read loop.
struct TransportState {
    closed: RwLock<bool>,
    shutdown: CancellationToken,
    request_tx: Mutex<Option<mpsc::Sender<JsonRpcRequest>>>,
    error_tx: Mutex<Option<mpsc::Sender<TransportError>>>,
}

impl TransportState {
    /// Marks the transport closed. The write lock on `closed` makes the
    /// channel teardown happen exactly once; `send` holds the read lock.
    fn close(&self) {
        let mut closed = self.closed.write();
        if *closed {
            debug!("transport already closed");
            return;
        }
        *closed = true;
        self.shutdown.cancel();
        // Dropping the senders is what closes the request and error
        // streams once the read loop's clones are gone too.
        self.request_tx.lock().take();
        self.error_tx.lock().take();
        debug!("transport closed");
    }

    fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}

/// Line-oriented JSON transport over an arbitrary byte-stream pair.
///
/// [`StdioTransport`] is the stdin/stdout instantiation; tests drive the
/// generic form with in-memory duplex pipes.
pub struct ByteStreamTransport<R, W> {
    reader: Mutex<Option<R>>,
    writer: tokio::sync::Mutex<W>,
    request_rx: Mutex<Option<mpsc::Receiver<JsonRpcRequest>>>,
    error_rx: Mutex<Option<mpsc::Receiver<TransportError>>>,
    state: Arc<TransportState>,
}

/// Stdio-based transport for MCP.
pub type StdioTransport = ByteStreamTransport<Stdin, Stdout>;

impl StdioTransport {
    pub fn new() -> Self {
        Self::with_streams(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> ByteStreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Build a transport over an explicit reader/writer pair.
    pub fn with_streams(reader: R, writer: W) -> Self {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        Self {
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(writer),
            request_rx: Mutex::new(Some(request_rx)),
            error_rx: Mutex::new(Some(error_rx)),
            state: Arc::new(TransportState {
                closed: RwLock::new(false),
                shutdown: CancellationToken::new(),
                request_tx: Mutex::new(Some(request_tx)),
                error_tx: Mutex::new(Some(error_tx)),
            }),
        }
    }
}

#[async_trait]
impl<R, W> Transport for ByteStreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&self) -> TransportResult<()> {
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        if self.state.is_closed() {
            return Err(TransportError::Closed);
        }

        let requests = self
            .state
            .request_tx
            .lock()
            .as_ref()
            .cloned()
            .ok_or(TransportError::Closed)?;
        let errors = self
            .state
            .error_tx
            .lock()
            .as_ref()
            .cloned()
            .ok_or(TransportError::Closed)?;

        let state = Arc::clone(&self.state);
        tokio::spawn(read_loop(reader, requests, errors, state));
        Ok(())
    }

    async fn stop(&self) {
        self.state.close();
    }

    async fn send(&self, response: &JsonRpcResponse) -> TransportResult<()> {
        if self.state.is_closed() {
            return Err(TransportError::Closed);
        }

        let json = serde_json::to_string(response)?;
        trace!(frame = %json, "sending response");

        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    fn requests(&self) -> Option<mpsc::Receiver<JsonRpcRequest>> {
        self.request_rx.lock().take()
    }

    fn errors(&self) -> Option<mpsc::Receiver<TransportError>> {
        self.error_rx.lock().take()
    }
}

/// Reads frames until shutdown or end of input, publishing requests and
/// decode errors. Closes the transport on the way out.
async fn read_loop<R>(
    reader: R,
    requests: mpsc::Sender<JsonRpcRequest>,
    errors: mpsc::Sender<TransportError>,
    state: Arc<TransportState>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    debug!("read loop started");
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = state.shutdown.cancelled() => {
                debug!("read loop: shutdown requested");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("read loop: end of input");
                break;
            }
            Err(e) => {
                error!("read loop: input error: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!(frame = %line, "received frame");

        let request = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => request,
            Err(e) => {
                publish_error(&errors, TransportError::Decode(e.to_string()));
                continue;
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            publish_error(
                &errors,
                TransportError::InvalidVersion(request.jsonrpc.into_owned()),
            );
            continue;
        }

        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            sent = requests.send(request) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    state.close();
    debug!("read loop finished");
}

/// Errors are published without blocking; a slow consumer must never stall
/// the read loop.
fn publish_error(errors: &mpsc::Sender<TransportError>, err: TransportError) {
    if let Err(e) = errors.try_send(err) {
        warn!("transport error dropped (consumer behind): {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::RequestId;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn duplex_transport() -> (
        ByteStreamTransport<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
        tokio::io::DuplexStream,
    ) {
        let (client, server) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(server);
        (ByteStreamTransport::with_streams(read, write), client)
    }

    #[tokio::test]
    async fn test_receives_valid_request() {
        let (transport, mut client) = duplex_transport();
        transport.start().await.unwrap();
        let mut requests = transport.requests().unwrap();

        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let request = requests.recv().await.unwrap();
        assert_eq!(request.method, "ping");
        assert_eq!(request.id, Some(RequestId::Number(1)));
    }

    #[tokio::test]
    async fn test_decode_error_does_not_disturb_next_frame() {
        let (transport, mut client) = duplex_transport();
        transport.start().await.unwrap();
        let mut requests = transport.requests().unwrap();
        let mut errors = transport.errors().unwrap();

        client
            .write_all(b"this is not json\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let err = errors.recv().await.unwrap();
        assert!(matches!(err, TransportError::Decode(_)));

        let request = requests.recv().await.unwrap();
        assert_eq!(request.id, Some(RequestId::Number(2)));
    }

    #[tokio::test]
    async fn test_version_mismatch_is_dropped() {
        let (transport, mut client) = duplex_transport();
        transport.start().await.unwrap();
        let mut requests = transport.requests().unwrap();
        let mut errors = transport.errors().unwrap();

        client
            .write_all(b"{\"jsonrpc\":\"1.0\",\"id\":3,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let err = errors.recv().await.unwrap();
        assert!(matches!(err, TransportError::InvalidVersion(v) if v == "1.0"));

        // The bad frame must not surface as a request.
        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let request = requests.recv().await.unwrap();
        assert_eq!(request.id, Some(RequestId::Number(4)));
    }

    #[tokio::test]
    async fn test_send_writes_one_line() {
        let (transport, client) = duplex_transport();
        let (client_read, _client_write) = tokio::io::split(client);

        let response = JsonRpcResponse::success(Some(1.into()), serde_json::json!({"ok": true}));
        transport.send(&response).await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let parsed: JsonRpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.id, Some(RequestId::Number(1)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_streams() {
        let (transport, _client) = duplex_transport();
        transport.start().await.unwrap();
        let mut requests = transport.requests().unwrap();
        let mut errors = transport.errors().unwrap();

        transport.stop().await;
        transport.stop().await;

        // Both streams end once the read loop drops its senders.
        assert!(requests.recv().await.is_none());
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_fails_after_stop() {
        let (transport, _client) = duplex_transport();
        transport.start().await.unwrap();
        transport.stop().await;

        let response = JsonRpcResponse::success(Some(1.into()), serde_json::json!({}));
        let err = transport.send(&response).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_eof_triggers_stop() {
        let (transport, client) = duplex_transport();
        transport.start().await.unwrap();
        let mut requests = transport.requests().unwrap();

        drop(client);

        assert!(requests.recv().await.is_none());
        // Give the read loop a beat to finish closing, then send must fail.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let response = JsonRpcResponse::success(Some(1.into()), serde_json::json!({}));
        assert!(transport.send(&response).await.is_err());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (transport, _client) = duplex_transport();
        transport.start().await.unwrap();
        let err = transport.start().await.unwrap_err();
        assert!(matches!(err, TransportError::AlreadyStarted));
    }
}
