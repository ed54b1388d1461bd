//! MCP server: request loop and method dispatch.

use crate::error::{McpError, ProtocolError, Result, TransportError};
use crate::protocol::handler::HandlerRegistry;
use crate::protocol::transport::{StdioTransport, Transport};
use crate::protocol::types::*;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// MCP Server.
///
/// Wires a transport to the handler registry and runs the request loop.
/// Each request is handled on its own task so a slow tool call never
/// blocks dispatch; responses correlate to requests by id only.
pub struct McpServer {
    info: ServerInfo,
    registry: Arc<HandlerRegistry>,
    transport: Arc<dyn Transport>,
}

impl McpServer {
    /// Create a server from explicit parts. Most callers use
    /// [`McpServerBuilder`].
    pub fn new(
        info: ServerInfo,
        registry: Arc<HandlerRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            info,
            registry,
            transport,
        }
    }

    /// Start the transport and serve requests until the request stream
    /// closes (end of input or transport stop).
    #[instrument(skip(self), fields(server = %self.info.name))]
    pub async fn run(&self) -> Result<()> {
        self.transport.start().await?;

        let mut requests = self
            .transport
            .requests()
            .ok_or(McpError::Transport(TransportError::AlreadyStarted))?;
        let mut errors = self
            .transport
            .errors()
            .ok_or(McpError::Transport(TransportError::AlreadyStarted))?;

        info!(
            "MCP server started: {} v{}",
            self.info.name, self.info.version
        );

        let dispatcher = Arc::new(Dispatcher::new(
            self.info.clone(),
            Arc::clone(&self.registry),
        ));

        loop {
            tokio::select! {
                Some(err) = errors.recv() => {
                    // Non-fatal by contract; log and keep serving.
                    warn!("transport error: {}", err);
                }
                request = requests.recv() => {
                    let Some(request) = request else {
                        debug!("request stream closed, shutting down");
                        break;
                    };

                    let dispatcher = Arc::clone(&dispatcher);
                    let transport = Arc::clone(&self.transport);
                    tokio::spawn(async move {
                        if let Some(response) = dispatcher.dispatch(request).await {
                            if let Err(e) = transport.send(&response).await {
                                error!("failed to send response: {}", e);
                            }
                        }
                    });
                }
            }
        }

        self.transport.stop().await;
        info!("MCP server stopped");
        Ok(())
    }
}

/// Routes one request to the right capability handler and shapes the
/// response.
pub struct Dispatcher {
    info: ServerInfo,
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(info: ServerInfo, registry: Arc<HandlerRegistry>) -> Self {
        Self { info, registry }
    }

    /// Dispatch a request. Returns `None` for notifications, which must
    /// never produce a response.
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("dispatching request");

        let method = request.method.as_str();
        if method == methods::INITIALIZED || method == methods::NOTIFICATION_INITIALIZED {
            debug!("client initialized");
            return None;
        }

        let result = match method {
            methods::INITIALIZE => self.handle_initialize(request.params.clone()).await,
            methods::PING => Ok(serde_json::json!({})),
            methods::TOOLS_LIST => self.handle_list_tools().await,
            methods::TOOLS_CALL => self.handle_call_tool(request.params.clone()).await,
            methods::RESOURCES_LIST => self.handle_list_resources().await,
            methods::RESOURCES_READ => self.handle_read_resource(request.params.clone()).await,
            methods::PROMPTS_LIST => self.handle_list_prompts().await,
            methods::PROMPTS_GET => self.handle_get_prompt(request.params.clone()).await,
            other => Err(ProtocolError::UnknownMethod(other.to_string()).into()),
        };

        if request.is_notification() {
            if let Err(e) = result {
                warn!("notification {} failed: {}", method, e);
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                error!("request failed: {}", e);
                JsonRpcResponse::error(request.id, JsonRpcError::new(e.code(), e.rpc_message()))
            }
        })
    }

    async fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        // Extension point: clients may send nothing, `{}`, or full params.
        let params: InitializeParams = match params {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| ProtocolError::InvalidParams(e.to_string().into()))?,
            None => InitializeParams::default(),
        };

        if let Some(client) = &params.client_info {
            debug!("initialize from client {} v{}", client.name, client.version);
        }

        // Capability present exactly when the handler is registered now.
        let capabilities = ServerCapabilities {
            tools: self
                .registry
                .has_tool_handler()
                .then(ToolsCapability::default),
            resources: self
                .registry
                .has_resource_handler()
                .then(ResourcesCapability::default),
            prompts: self
                .registry
                .has_prompt_handler()
                .then(PromptsCapability::default),
        };

        to_result_value(&InitializeResult {
            protocol_version: MCP_VERSION.into(),
            capabilities,
            server_info: self.info.clone(),
        })
    }

    async fn handle_list_tools(&self) -> Result<Value> {
        match self.registry.tool_handler() {
            Some(handler) => to_result_value(&handler.list_tools().await?),
            // Absent handler means an empty catalogue, not an error.
            None => to_result_value(&ListToolsResult::empty()),
        }
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value> {
        let handler = self
            .registry
            .tool_handler()
            .ok_or(ProtocolError::NotSupported("tools"))?;
        let params: CallToolParams = decode_params(params)?;
        to_result_value(&handler.call_tool(params).await?)
    }

    async fn handle_list_resources(&self) -> Result<Value> {
        match self.registry.resource_handler() {
            Some(handler) => to_result_value(&handler.list_resources().await?),
            None => to_result_value(&ListResourcesResult::empty()),
        }
    }

    async fn handle_read_resource(&self, params: Option<Value>) -> Result<Value> {
        let handler = self
            .registry
            .resource_handler()
            .ok_or(ProtocolError::NotSupported("resources"))?;
        let params: ReadResourceParams = decode_params(params)?;
        to_result_value(&handler.read_resource(params).await?)
    }

    async fn handle_list_prompts(&self) -> Result<Value> {
        match self.registry.prompt_handler() {
            Some(handler) => to_result_value(&handler.list_prompts().await?),
            None => to_result_value(&ListPromptsResult::empty()),
        }
    }

    async fn handle_get_prompt(&self, params: Option<Value>) -> Result<Value> {
        let handler = self
            .registry
            .prompt_handler()
            .ok_or(ProtocolError::NotSupported("prompts"))?;
        let params: GetPromptParams = decode_params(params)?;
        to_result_value(&handler.get_prompt(params).await?)
    }
}

/// Decode required method params, mapping any mismatch to invalid params.
fn decode_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let value = params.ok_or_else(|| ProtocolError::InvalidParams("missing params".into()))?;
    serde_json::from_value(value)
        .map_err(|e| ProtocolError::InvalidParams(e.to_string().into()).into())
}

fn to_result_value<T: Serialize>(result: &T) -> Result<Value> {
    serde_json::to_value(result)
        .map_err(|e| ProtocolError::InternalError(e.to_string().into()).into())
}

/// Builder for [`McpServer`].
pub struct McpServerBuilder {
    name: String,
    version: String,
    registry: Arc<HandlerRegistry>,
    transport: Option<Arc<dyn Transport>>,
}

impl McpServerBuilder {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            registry: Arc::new(HandlerRegistry::new()),
            transport: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Use a pre-populated registry instead of the builder's own.
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn tool_handler(self, handler: impl crate::protocol::handler::ToolHandler + 'static) -> Self {
        self.registry.register_tool_handler(Arc::new(handler));
        self
    }

    pub fn resource_handler(
        self,
        handler: impl crate::protocol::handler::ResourceHandler + 'static,
    ) -> Self {
        self.registry.register_resource_handler(Arc::new(handler));
        self
    }

    pub fn prompt_handler(
        self,
        handler: impl crate::protocol::handler::PromptHandler + 'static,
    ) -> Self {
        self.registry.register_prompt_handler(Arc::new(handler));
        self
    }

    pub fn build(self) -> McpServer {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(StdioTransport::new()));

        McpServer::new(
            ServerInfo {
                name: self.name,
                version: self.version,
            },
            self.registry,
            transport,
        )
    }
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handler::{PromptHandler, ResourceHandler, ToolHandler};
    use async_trait::async_trait;

    struct EchoToolHandler;

    #[async_trait]
    impl ToolHandler for EchoToolHandler {
        async fn list_tools(&self) -> Result<ListToolsResult> {
            Ok(ListToolsResult {
                tools: vec![Tool {
                    name: "echo".into(),
                    description: Some("Echo the message back".into()),
                    input_schema: serde_json::json!({
                        "type": "object",
                        "properties": {"message": {"type": "string"}}
                    }),
                }],
            })
        }

        async fn call_tool(&self, params: CallToolParams) -> Result<CallToolResult> {
            let message = params
                .arguments
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("hello");
            Ok(CallToolResult::text(message))
        }
    }

    struct FailingToolHandler;

    #[async_trait]
    impl ToolHandler for FailingToolHandler {
        async fn list_tools(&self) -> Result<ListToolsResult> {
            Ok(ListToolsResult::empty())
        }

        async fn call_tool(&self, _params: CallToolParams) -> Result<CallToolResult> {
            Err(McpError::internal("tool exploded"))
        }
    }

    struct StaticResourceHandler;

    #[async_trait]
    impl ResourceHandler for StaticResourceHandler {
        async fn list_resources(&self) -> Result<ListResourcesResult> {
            Ok(ListResourcesResult {
                resources: vec![Resource {
                    uri: "file:///readme".into(),
                    name: "readme".into(),
                    description: None,
                    mime_type: Some("text/plain".into()),
                }],
            })
        }

        async fn read_resource(&self, params: ReadResourceParams) -> Result<ReadResourceResult> {
            Ok(ReadResourceResult {
                contents: vec![ResourceContent {
                    uri: params.uri,
                    mime_type: Some("text/plain".into()),
                    text: Some("contents".into()),
                    blob: None,
                }],
            })
        }
    }

    struct GreetingPromptHandler;

    #[async_trait]
    impl PromptHandler for GreetingPromptHandler {
        async fn list_prompts(&self) -> Result<ListPromptsResult> {
            Ok(ListPromptsResult {
                prompts: vec![Prompt {
                    name: "greeting".into(),
                    description: None,
                    arguments: None,
                }],
            })
        }

        async fn get_prompt(&self, _params: GetPromptParams) -> Result<GetPromptResult> {
            Ok(GetPromptResult {
                messages: vec![PromptMessage {
                    role: "user".into(),
                    content: MessageContent::text("hi"),
                }],
            })
        }
    }

    fn dispatcher_with(registry: HandlerRegistry) -> Dispatcher {
        Dispatcher::new(
            ServerInfo {
                name: "test-server".into(),
                version: "0.0.1".into(),
            },
            Arc::new(registry),
        )
    }

    fn empty_dispatcher() -> Dispatcher {
        dispatcher_with(HandlerRegistry::new())
    }

    #[tokio::test]
    async fn test_initialize_without_handlers() {
        let dispatcher = empty_dispatcher();
        let request = JsonRpcRequest::request(1, methods::INITIALIZE)
            .with_params(serde_json::json!({}));

        let response = dispatcher.dispatch(request).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_VERSION);
        assert_eq!(result["serverInfo"]["name"], "test-server");
        assert_eq!(result["capabilities"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_initialize_without_params() {
        let dispatcher = empty_dispatcher();
        let request = JsonRpcRequest::request(1, methods::INITIALIZE);

        let response = dispatcher.dispatch(request).await.unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_initialize_advertises_registered_capabilities() {
        let registry = HandlerRegistry::new();
        registry.register_tool_handler(Arc::new(EchoToolHandler));
        registry.register_prompt_handler(Arc::new(GreetingPromptHandler));
        let dispatcher = dispatcher_with(registry);

        let request = JsonRpcRequest::request(1, methods::INITIALIZE)
            .with_params(serde_json::json!({}));
        let response = dispatcher.dispatch(request).await.unwrap();
        let capabilities = &response.result.unwrap()["capabilities"];

        assert!(capabilities.get("tools").is_some());
        assert!(capabilities.get("prompts").is_some());
        assert!(capabilities.get("resources").is_none());
    }

    #[tokio::test]
    async fn test_initialized_notifications_get_no_response() {
        let dispatcher = empty_dispatcher();
        for method in [methods::INITIALIZED, methods::NOTIFICATION_INITIALIZED] {
            let response = dispatcher.dispatch(JsonRpcRequest::notification(method)).await;
            assert!(response.is_none());
        }
    }

    #[tokio::test]
    async fn test_request_without_id_gets_no_response() {
        let dispatcher = empty_dispatcher();
        // A notification, even for a normally-responding method.
        let request = JsonRpcRequest::notification(methods::TOOLS_LIST);
        assert!(dispatcher.dispatch(request).await.is_none());
    }

    #[tokio::test]
    async fn test_tools_list_without_handler_is_empty() {
        let dispatcher = empty_dispatcher();
        let request = JsonRpcRequest::request(2, methods::TOOLS_LIST);

        let response = dispatcher.dispatch(request).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["tools"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_tools_call_without_handler_errors() {
        let dispatcher = empty_dispatcher();
        let request = JsonRpcRequest::request(3, methods::TOOLS_CALL)
            .with_params(serde_json::json!({"name": "echo", "arguments": {}}));

        let response = dispatcher.dispatch(request).await.unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.message, "tools not supported");
    }

    #[tokio::test]
    async fn test_tools_call_echo() {
        let registry = HandlerRegistry::new();
        registry.register_tool_handler(Arc::new(EchoToolHandler));
        let dispatcher = dispatcher_with(registry);

        let request = JsonRpcRequest::request(3, methods::TOOLS_CALL)
            .with_params(serde_json::json!({"name": "echo", "arguments": {"message": "hello"}}));

        let response = dispatcher.dispatch(request).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["content"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_tools_call_invalid_params() {
        let registry = HandlerRegistry::new();
        registry.register_tool_handler(Arc::new(EchoToolHandler));
        let dispatcher = dispatcher_with(registry);

        let request = JsonRpcRequest::request(4, methods::TOOLS_CALL)
            .with_params(serde_json::json!("not an object"));

        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_tools_call_missing_params() {
        let registry = HandlerRegistry::new();
        registry.register_tool_handler(Arc::new(EchoToolHandler));
        let dispatcher = dispatcher_with(registry);

        let request = JsonRpcRequest::request(5, methods::TOOLS_CALL);
        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_internal_error() {
        let registry = HandlerRegistry::new();
        registry.register_tool_handler(Arc::new(FailingToolHandler));
        let dispatcher = dispatcher_with(registry);

        let request = JsonRpcRequest::request(6, methods::TOOLS_CALL)
            .with_params(serde_json::json!({"name": "boom", "arguments": {}}));

        let response = dispatcher.dispatch(request).await.unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.message, "tool exploded");
    }

    #[tokio::test]
    async fn test_resources_roundtrip() {
        let registry = HandlerRegistry::new();
        registry.register_resource_handler(Arc::new(StaticResourceHandler));
        let dispatcher = dispatcher_with(registry);

        let request = JsonRpcRequest::request(7, methods::RESOURCES_LIST);
        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(
            response.result.unwrap()["resources"][0]["uri"],
            "file:///readme"
        );

        let request = JsonRpcRequest::request(8, methods::RESOURCES_READ)
            .with_params(serde_json::json!({"uri": "file:///readme"}));
        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(
            response.result.unwrap()["contents"][0]["text"],
            "contents"
        );
    }

    #[tokio::test]
    async fn test_resources_read_without_handler_errors() {
        let dispatcher = empty_dispatcher();
        let request = JsonRpcRequest::request(9, methods::RESOURCES_READ)
            .with_params(serde_json::json!({"uri": "file:///x"}));

        let response = dispatcher.dispatch(request).await.unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.message, "resources not supported");
    }

    #[tokio::test]
    async fn test_prompts_roundtrip() {
        let registry = HandlerRegistry::new();
        registry.register_prompt_handler(Arc::new(GreetingPromptHandler));
        let dispatcher = dispatcher_with(registry);

        let request = JsonRpcRequest::request(10, methods::PROMPTS_LIST);
        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(
            response.result.unwrap()["prompts"][0]["name"],
            "greeting"
        );

        let request = JsonRpcRequest::request(11, methods::PROMPTS_GET)
            .with_params(serde_json::json!({"name": "greeting"}));
        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(
            response.result.unwrap()["messages"][0]["content"]["text"],
            "hi"
        );
    }

    #[tokio::test]
    async fn test_prompts_list_without_handler_is_empty() {
        let dispatcher = empty_dispatcher();
        let request = JsonRpcRequest::request(12, methods::PROMPTS_LIST);
        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(response.result.unwrap()["prompts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let dispatcher = empty_dispatcher();
        let request = JsonRpcRequest::request(13, "bogus/method");

        let response = dispatcher.dispatch(request).await.unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.message, "unknown method: bogus/method");
    }

    #[tokio::test]
    async fn test_ping() {
        let dispatcher = empty_dispatcher();
        let request = JsonRpcRequest::request(14, methods::PING);
        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(response.result.unwrap(), serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_response_id_echoes_request_id() {
        let dispatcher = empty_dispatcher();

        let request = JsonRpcRequest::request("string-id", methods::PING);
        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(response.id, Some(RequestId::String("string-id".into())));

        let request = JsonRpcRequest::request(RequestId::Null, methods::PING);
        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(response.id, Some(RequestId::Null));
    }

    #[test]
    fn test_server_builder_defaults() {
        let server = McpServerBuilder::new()
            .name("builder-test")
            .version("1.2.3")
            .build();
        assert_eq!(server.info.name, "builder-test");
        assert_eq!(server.info.version, "1.2.3");
        assert!(!server.registry.has_tool_handler());
    }

    #[test]
    fn test_server_builder_registers_handlers() {
        let server = McpServerBuilder::new()
            .tool_handler(EchoToolHandler)
            .resource_handler(StaticResourceHandler)
            .build();
        assert!(server.registry.has_tool_handler());
        assert!(server.registry.has_resource_handler());
        assert!(!server.registry.has_prompt_handler());
    }
}
