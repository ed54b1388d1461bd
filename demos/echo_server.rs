//! Demo MCP server over stdio.
//!
//! Exposes an `echo` tool, a `slow_echo` tool that runs through the
//! operation executor, and `continue_operation` / `cancel_operation` tools
//! for driving detached work to completion. Try it with:
//!
//! ```text
//! echo '{"jsonrpc":"2.0","id":1,"method":"tools/list"}' | cargo run --example echo-server
//! ```

use anyhow::Result;
use async_mcp::{
    ExecuteOptions, ExecutorConfig, McpError, McpServerBuilder, OperationExecutor, ToolHandler,
};
use async_mcp::protocol::types::{CallToolParams, CallToolResult, ListToolsResult, Tool};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

struct DemoTools {
    executor: Arc<OperationExecutor>,
}

impl DemoTools {
    async fn echo(&self, arguments: &Map<String, Value>) -> Result<CallToolResult, McpError> {
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)")
            .to_string();
        Ok(CallToolResult::text(message))
    }

    /// Echoes after a delay, detached from the request through the
    /// executor. Returns either the echoed text or a running handle.
    async fn slow_echo(&self, arguments: &Map<String, Value>) -> Result<CallToolResult, McpError> {
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)")
            .to_string();
        let delay_ms = arguments
            .get("delay_ms")
            .and_then(Value::as_u64)
            .unwrap_or(30_000);

        let result = self
            .executor
            .execute(
                move |cancel| async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                            Ok(json!({"message": message}))
                        }
                        _ = cancel.cancelled() => {
                            Err(McpError::internal("echo interrupted"))
                        }
                    }
                },
                ExecuteOptions::new("slow_echo").with_timeout(Duration::from_secs(2)),
            )
            .await
            .map_err(McpError::from)?;

        Ok(CallToolResult::json(&result))
    }

    async fn continue_operation(&self, arguments: &Map<String, Value>) -> Result<CallToolResult, McpError> {
        let operation_id = arguments
            .get("operation_id")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::internal("operation_id is required"))?;
        let wait_ms = arguments
            .get("wait_ms")
            .and_then(Value::as_u64)
            .unwrap_or(10_000);

        match self
            .executor
            .continue_operation(operation_id, Duration::from_millis(wait_ms), None)
            .await
        {
            Ok(result) => Ok(CallToolResult::json(&result)),
            Err(e) => Ok(CallToolResult::error(e.to_string())),
        }
    }

    async fn cancel_operation(&self, arguments: &Map<String, Value>) -> Result<CallToolResult, McpError> {
        let operation_id = arguments
            .get("operation_id")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::internal("operation_id is required"))?;

        match self.executor.cancel(operation_id) {
            Ok(()) => Ok(CallToolResult::text(format!(
                "operation {operation_id} cancelled"
            ))),
            Err(e) => Ok(CallToolResult::error(e.to_string())),
        }
    }
}

#[async_trait]
impl ToolHandler for DemoTools {
    async fn list_tools(&self) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: vec![
                Tool {
                    name: "echo".into(),
                    description: Some("Echo a message back".into()),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "message": {"type": "string"}
                        },
                        "required": ["message"]
                    }),
                },
                Tool {
                    name: "slow_echo".into(),
                    description: Some(
                        "Echo a message after a delay; runs as a detached operation".into(),
                    ),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "message": {"type": "string"},
                            "delay_ms": {"type": "integer", "default": 30000}
                        },
                        "required": ["message"]
                    }),
                },
                Tool {
                    name: "continue_operation".into(),
                    description: Some("Check or wait for a detached operation".into()),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "operation_id": {"type": "string"},
                            "wait_ms": {"type": "integer", "default": 10000}
                        },
                        "required": ["operation_id"]
                    }),
                },
                Tool {
                    name: "cancel_operation".into(),
                    description: Some("Cancel a running detached operation".into()),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "operation_id": {"type": "string"}
                        },
                        "required": ["operation_id"]
                    }),
                },
            ],
        })
    }

    async fn call_tool(&self, params: CallToolParams) -> Result<CallToolResult, McpError> {
        match params.name.as_str() {
            "echo" => self.echo(&params.arguments).await,
            "slow_echo" => self.slow_echo(&params.arguments).await,
            "continue_operation" => self.continue_operation(&params.arguments).await,
            "cancel_operation" => self.cancel_operation(&params.arguments).await,
            other => Ok(CallToolResult::error(format!("unknown tool: {other}"))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!(
        "Starting {} demo v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let executor = Arc::new(OperationExecutor::new(ExecutorConfig::default()));

    let server = McpServerBuilder::new()
        .name("echo-server")
        .version(env!("CARGO_PKG_VERSION"))
        .tool_handler(DemoTools {
            executor: Arc::clone(&executor),
        })
        .build();

    server.run().await?;

    executor.stop().await;
    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("async_mcp=info,warn"));

    // Structured logs go to stderr; stdout carries the MCP protocol.
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .json()
        .init();
}
