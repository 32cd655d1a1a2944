//! Agent definitions: the pluggable unit the runner dispatches to.

use crate::runtime::InvocationContext;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A named, schema-validated agent. `run` receives the parsed input and an
/// `InvocationContext` exposing a nested `invoke_agent` for sub-calls.
#[async_trait::async_trait]
pub trait AgentDefinition: Send + Sync {
    fn name(&self) -> &str;

    /// Called before `run`; return `Err` to surface a `ValidationError`.
    fn validate_input(&self, _input: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Called after `run` if the definition wants to constrain its own output.
    fn validate_output(&self, _output: &Value) -> Result<(), String> {
        Ok(())
    }

    /// If set, a nested `invoke_agent` call from within `run` must name one
    /// of these agents or the call is rejected.
    fn allowed_calls(&self) -> Option<&[String]> {
        None
    }

    async fn run(&self, ctx: InvocationContext, input: Value) -> Result<Value, String>;
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentDefinition>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: HashMap::new() }
    }

    pub fn register(&mut self, agent: impl AgentDefinition + 'static) {
        self.agents.insert(agent.name().to_string(), Arc::new(agent));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentDefinition>> {
        self.agents.get(name).cloned()
    }
}
