//! Error types for the MCP framework.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` conversions.

use std::borrow::Cow;
use thiserror::Error;

/// Main error type for the MCP framework.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: Cow<'static, str> },
}

impl McpError {
    /// Returns the JSON-RPC 2.0 error code for this error.
    ///
    /// Anything that is not an explicit protocol violation maps to the
    /// internal error code -32603.
    pub fn code(&self) -> i32 {
        match self {
            Self::Protocol(e) => e.code(),
            _ => -32603,
        }
    }

    /// Message as it appears inside a JSON-RPC error object, without the
    /// umbrella variant prefix.
    pub fn rpc_message(&self) -> String {
        match self {
            Self::Protocol(e) => e.to_string(),
            Self::Transport(e) => e.to_string(),
            Self::Executor(e) => e.to_string(),
            Self::Internal { message } => message.to_string(),
            other => other.to_string(),
        }
    }

    /// Shorthand for an internal error with a fixed message.
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// JSON-RPC 2.0 and MCP protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Parse error: invalid JSON")]
    ParseError,

    #[error("Invalid request: {0}")]
    InvalidRequest(Cow<'static, str>),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(Cow<'static, str>),

    #[error("Internal error: {0}")]
    InternalError(Cow<'static, str>),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("{0} not supported")]
    NotSupported(&'static str),
}

impl ProtocolError {
    /// Returns the JSON-RPC 2.0 error code.
    ///
    /// Unknown methods and unsupported capabilities report the internal
    /// error code rather than -32601; clients treat them as server-side
    /// conditions, not malformed requests.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::InternalError(_) => -32603,
            Self::UnknownMethod(_) => -32603,
            Self::NotSupported(_) => -32603,
        }
    }
}

/// Transport-level errors.
///
/// `Decode` and `InvalidVersion` flow through the transport's error stream
/// and never terminate the connection; the rest surface to callers of
/// `start` and `send`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("transport already started")]
    AlreadyStarted,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid JSON-RPC version: {0}")]
    InvalidVersion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors returned by the async operation executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("operation not found: {0}")]
    NotFound(String),

    #[error("operation {id} is not running (status: {status})")]
    NotRunning { id: String, status: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation exceeded maximum lifetime")]
    LifetimeExceeded,

    #[error("wait cancelled by caller")]
    WaitCancelled,
}

/// Result type alias for McpError.
pub type Result<T> = std::result::Result<T, McpError>;

/// Result type alias for ProtocolError.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for TransportError.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type alias for ExecutorError.
pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;
