//! MCP server framework with an async operation executor.
//!
//! Implements the Model Context Protocol over JSON-RPC 2.0: a line-oriented
//! stdio transport, a dispatch core routing requests to registered
//! capability handlers (tools, resources, prompts), and an operation
//! executor that lets tool invocations outlive the request that started
//! them.
//!
//! # Example
//!
//! ```no_run
//! use async_mcp::{
//!     error::Result,
//!     executor::{ExecuteOptions, ExecutorConfig, OperationExecutor},
//!     protocol::{McpServerBuilder, ToolHandler},
//!     protocol::types::{CallToolParams, CallToolResult, ListToolsResult, Tool},
//! };
//! use async_trait::async_trait;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct ImageTools {
//!     executor: Arc<OperationExecutor>,
//! }
//!
//! #[async_trait]
//! impl ToolHandler for ImageTools {
//!     async fn list_tools(&self) -> Result<ListToolsResult> {
//!         Ok(ListToolsResult {
//!             tools: vec![Tool {
//!                 name: "generate_image".into(),
//!                 description: Some("Render an image from a prompt".into()),
//!                 input_schema: json!({"type": "object"}),
//!             }],
//!         })
//!     }
//!
//!     async fn call_tool(&self, _params: CallToolParams) -> Result<CallToolResult> {
//!         // Long-running work goes through the executor so it can outlive
//!         // this request; the client resumes it via continue_operation.
//!         let result = self
//!             .executor
//!             .execute(
//!                 |_cancel| async { Ok(json!({"path": "/tmp/out.png"})) },
//!                 ExecuteOptions::new("generate_image"),
//!             )
//!             .await
//!             .map_err(async_mcp::error::McpError::from)?;
//!         Ok(CallToolResult::json(&result))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let executor = Arc::new(OperationExecutor::new(ExecutorConfig::default()));
//!     let server = McpServerBuilder::new()
//!         .name("image-server")
//!         .tool_handler(ImageTools { executor })
//!         .build();
//!     server.run().await
//! }
//! ```

pub mod error;
pub mod executor;
pub mod protocol;

pub use error::{ExecutorError, McpError, ProtocolError, Result, TransportError};
pub use executor::{
    ContinueResult, ExecuteOptions, ExecuteResult, ExecutorConfig, OperationExecutor,
    OperationStatus,
};
pub use protocol::{
    HandlerRegistry, McpServer, McpServerBuilder, PromptHandler, ResourceHandler, StdioTransport,
    ToolHandler, Transport,
};
