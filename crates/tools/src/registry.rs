//! Tool trait and registry.

use std::path::Path;
use std::sync::Arc;

use mc_domain::{CancelToken, Result, ToolDefinition, ToolResultContent};

/// What a tool returns: one or more content parts. The invoker extracts
/// the text parts and bounds them before the result enters history.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: Vec<ToolResultContent>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::Text { text: text.into() }],
        }
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|p| match p {
                ToolResultContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The uniform interface every tool presents to the engine.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within the registry.
    fn name(&self) -> &str;

    /// Short human-readable label.
    fn label(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the argument map.
    fn parameters(&self) -> serde_json::Value;

    async fn invoke(
        &self,
        call_id: &str,
        args: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            label: self.label().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters(),
        }
    }
}

/// Name-keyed tool collection with stable registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration with the same name replaces
    /// the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Definitions in registration order, for the provider call context.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Tool names in registration order, for the system prompt.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_owned()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// The default tool set bound to a workspace sandbox.
pub fn workspace_registry(workspace_root: &Path) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(crate::file_ops::ReadFileTool::new(workspace_root)));
    registry.register(Arc::new(crate::file_ops::WriteFileTool::new(workspace_root)));
    registry.register(Arc::new(crate::file_ops::EditFileTool::new(workspace_root)));
    registry.register(Arc::new(crate::file_ops::ListDirTool::new(workspace_root)));
    registry.register(Arc::new(crate::exec::ExecTool::new(workspace_root)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn label(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "Echo the input back."
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn invoke(
            &self,
            _call_id: &str,
            args: serde_json::Value,
            _cancel: &CancelToken,
        ) -> Result<ToolOutput> {
            Ok(ToolOutput::text(
                args["text"].as_str().unwrap_or_default().to_owned(),
            ))
        }
    }

    #[test]
    fn registry_lookup_and_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn registering_same_name_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn workspace_registry_has_the_builtin_set() {
        let dir = tempfile::tempdir().unwrap();
        let registry = workspace_registry(dir.path());
        let names = registry.names();
        assert_eq!(
            names,
            vec!["read_file", "write_file", "edit_file", "list_dir", "exec"]
        );
    }

    #[test]
    fn definitions_carry_schema_and_label() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].label, "Echo");
        assert!(defs[0].parameters.is_object());
    }
}
