//! Capability handler traits and the handler registry.
//!
//! A server advertises a capability exactly when a handler for it is
//! registered. Handlers are external collaborators; the dispatch core only
//! ever talks to them through these traits.

use crate::error::Result;
use crate::protocol::types::*;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Handles tool discovery and invocation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// List available tools.
    async fn list_tools(&self) -> Result<ListToolsResult>;

    /// Call a tool by name.
    async fn call_tool(&self, params: CallToolParams) -> Result<CallToolResult>;
}

/// Handles resource discovery and reads.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// List available resources.
    async fn list_resources(&self) -> Result<ListResourcesResult>;

    /// Read a resource by URI.
    async fn read_resource(&self, params: ReadResourceParams) -> Result<ReadResourceResult>;
}

/// Handles prompt discovery and rendering.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// List available prompts.
    async fn list_prompts(&self) -> Result<ListPromptsResult>;

    /// Render a prompt by name.
    async fn get_prompt(&self, params: GetPromptParams) -> Result<GetPromptResult>;
}

/// Holds at most one handler per capability category.
///
/// Registration normally happens once at startup, but the locks make
/// presence probes from concurrent dispatch tasks safe regardless. Last
/// registration wins.
#[derive(Default)]
pub struct HandlerRegistry {
    tools: RwLock<Option<Arc<dyn ToolHandler>>>,
    resources: RwLock<Option<Arc<dyn ResourceHandler>>>,
    prompts: RwLock<Option<Arc<dyn PromptHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool_handler(&self, handler: Arc<dyn ToolHandler>) {
        *self.tools.write() = Some(handler);
    }

    pub fn register_resource_handler(&self, handler: Arc<dyn ResourceHandler>) {
        *self.resources.write() = Some(handler);
    }

    pub fn register_prompt_handler(&self, handler: Arc<dyn PromptHandler>) {
        *self.prompts.write() = Some(handler);
    }

    pub fn tool_handler(&self) -> Option<Arc<dyn ToolHandler>> {
        self.tools.read().clone()
    }

    pub fn resource_handler(&self) -> Option<Arc<dyn ResourceHandler>> {
        self.resources.read().clone()
    }

    pub fn prompt_handler(&self) -> Option<Arc<dyn PromptHandler>> {
        self.prompts.read().clone()
    }

    pub fn has_tool_handler(&self) -> bool {
        self.tools.read().is_some()
    }

    pub fn has_resource_handler(&self) -> bool {
        self.resources.read().is_some()
    }

    pub fn has_prompt_handler(&self) -> bool {
        self.prompts.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopToolHandler;

    #[async_trait]
    impl ToolHandler for NoopToolHandler {
        async fn list_tools(&self) -> Result<ListToolsResult> {
            Ok(ListToolsResult::empty())
        }

        async fn call_tool(&self, _params: CallToolParams) -> Result<CallToolResult> {
            Ok(CallToolResult::text("noop"))
        }
    }

    struct OtherToolHandler;

    #[async_trait]
    impl ToolHandler for OtherToolHandler {
        async fn list_tools(&self) -> Result<ListToolsResult> {
            Ok(ListToolsResult {
                tools: vec![Tool {
                    name: "other".into(),
                    description: None,
                    input_schema: serde_json::json!({}),
                }],
            })
        }

        async fn call_tool(&self, _params: CallToolParams) -> Result<CallToolResult> {
            Ok(CallToolResult::text("other"))
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = HandlerRegistry::new();
        assert!(!registry.has_tool_handler());
        assert!(!registry.has_resource_handler());
        assert!(!registry.has_prompt_handler());
        assert!(registry.tool_handler().is_none());
    }

    #[tokio::test]
    async fn test_register_and_probe() {
        let registry = HandlerRegistry::new();
        registry.register_tool_handler(Arc::new(NoopToolHandler));

        assert!(registry.has_tool_handler());
        assert!(!registry.has_resource_handler());

        let handler = registry.tool_handler().unwrap();
        let tools = handler.list_tools().await.unwrap();
        assert!(tools.tools.is_empty());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = HandlerRegistry::new();
        registry.register_tool_handler(Arc::new(NoopToolHandler));
        registry.register_tool_handler(Arc::new(OtherToolHandler));

        let handler = registry.tool_handler().unwrap();
        let tools = handler.list_tools().await.unwrap();
        assert_eq!(tools.tools.len(), 1);
        assert_eq!(tools.tools[0].name, "other");
    }
}
