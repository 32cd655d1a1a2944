//! Tool registry and trait definition, mirroring the agent-runtime style:
//! each tool is a self-contained module implementing `Tool`.

use loomquill_llm::LlmTool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub enum ToolResult {
    Json(Value),
    Error(String),
}

impl ToolResult {
    pub fn json(v: Value) -> Self {
        Self::Json(v)
    }

    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    pub fn to_content_value(&self) -> Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Error(e) => serde_json::json!({ "error": e }),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// System prompt fragment for this tool, concatenated into the tool suffix.
    fn prompt(&self) -> &str {
        ""
    }

    fn input_schema(&self) -> Value;

    /// Write tools return `true`; omitted by a `readOnly` registry.
    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> ToolResult;

    async fn execute_cancellable(&self, args: Value, cancel: CancellationToken) -> ToolResult {
        tokio::select! {
            result = self.execute(args) => result,
            _ = cancel.cancelled() => ToolResult::error("cancelled"),
        }
    }

    fn to_llm_tool(&self) -> LlmTool {
        LlmTool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args).await,
            None => ToolResult::error(format!("tool not found: {}", name)),
        }
    }

    pub async fn execute_cancellable(&self, name: &str, args: Value, cancel: CancellationToken) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => tool.execute_cancellable(args, cancel).await,
            None => ToolResult::error(format!("tool not found: {}", name)),
        }
    }

    pub fn get_definitions(&self) -> Vec<LlmTool> {
        self.tools.values().map(|t| t.to_llm_tool()).collect()
    }

    pub fn combined_prompts(&self) -> String {
        self.tools
            .values()
            .map(|t| t.prompt())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}
