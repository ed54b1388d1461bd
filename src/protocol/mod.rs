//! MCP protocol implementation: wire types, transport, handlers, server.

pub mod handler;
pub mod server;
pub mod transport;
pub mod types;

pub use handler::{HandlerRegistry, PromptHandler, ResourceHandler, ToolHandler};
pub use server::{Dispatcher, McpServer, McpServerBuilder};
pub use transport::{ByteStreamTransport, StdioTransport, Transport};
