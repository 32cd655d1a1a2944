//! Agent Registry & Runner — `invokeAgent` with cycle/depth/call-limit/timeout
//! enforcement and trace recording (spec §4.F).

use crate::definition::AgentRegistry;
use loomquill_core::{Error, Result, StoryId};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use loomquill_core::types::{AgentTraceEntry, RunStatus};

#[derive(Clone, Debug)]
pub struct InvokeOptions {
    pub max_depth: usize,
    pub max_calls: usize,
    pub timeout_ms: u64,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self { max_depth: 3, max_calls: 20, timeout_ms: 120_000 }
    }
}

pub struct InvokeResult {
    pub run_id: String,
    pub output: Value,
    pub trace: Vec<AgentTraceEntry>,
}

struct SharedState {
    root_run_id: String,
    trace: Mutex<Vec<AgentTraceEntry>>,
    stack: Mutex<Vec<String>>,
    call_count: AtomicUsize,
    options: InvokeOptions,
    registry: Arc<AgentRegistry>,
}

/// Context passed into a running agent. Its `invoke_agent` reuses the same
/// runtime state so cycle/depth/call-limit checks apply across the whole tree.
#[derive(Clone)]
pub struct InvocationContext {
    pub data_dir: PathBuf,
    pub story_id: StoryId,
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub root_run_id: String,
    pub depth: usize,
    agent_name: String,
    shared: Arc<SharedState>,
}

impl InvocationContext {
    pub async fn invoke_agent(&self, agent_name: &str, input: Value) -> Result<Value> {
        invoke_inner(self.shared.clone(), self.data_dir.clone(), self.story_id.clone(), agent_name, input, Some(self.run_id.clone()), self.shared.root_run_id.clone(), self.depth + 1, Some(self.agent_name.clone())).await
    }
}

fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub async fn invoke_agent(
    registry: Arc<AgentRegistry>,
    data_dir: impl Into<PathBuf>,
    story_id: StoryId,
    agent_name: &str,
    input: Value,
    options: InvokeOptions,
) -> Result<InvokeResult> {
    let root_run_id = new_run_id();
    let shared = Arc::new(SharedState {
        root_run_id: root_run_id.clone(),
        trace: Mutex::new(Vec::new()),
        stack: Mutex::new(Vec::new()),
        call_count: AtomicUsize::new(0),
        options,
        registry,
    });

    let output = invoke_inner(shared.clone(), data_dir.into(), story_id, agent_name, input, None, root_run_id.clone(), 0, None).await?;
    let trace = shared.trace.lock().unwrap().clone();
    Ok(InvokeResult { run_id: root_run_id, output, trace })
}

#[allow(clippy::too_many_arguments)]
async fn invoke_inner(
    shared: Arc<SharedState>,
    data_dir: PathBuf,
    story_id: StoryId,
    agent_name: &str,
    input: Value,
    parent_run_id: Option<String>,
    root_run_id: String,
    depth: usize,
    parent_agent_name: Option<String>,
) -> Result<Value> {
    let definition = shared
        .registry
        .get(agent_name)
        .ok_or_else(|| Error::UnknownAgent(agent_name.to_string()))?;

    let run_id = new_run_id();
    let started_at = chrono::Utc::now();

    if let Err(e) = enforce_limits(&shared, agent_name, depth, parent_agent_name.as_deref()) {
        record_trace(&shared, AgentTraceEntry {
            run_id: run_id.clone(),
            parent_run_id: parent_run_id.clone(),
            root_run_id: root_run_id.clone(),
            agent_name: agent_name.to_string(),
            started_at,
            finished_at: Some(chrono::Utc::now()),
            duration_ms: Some(0),
            status: RunStatus::Error,
            error: Some(e.to_string()),
        });
        return Err(e);
    }

    if let Err(msg) = definition.validate_input(&input) {
        let e = Error::validation(msg);
        record_trace(&shared, AgentTraceEntry {
            run_id: run_id.clone(),
            parent_run_id: parent_run_id.clone(),
            root_run_id: root_run_id.clone(),
            agent_name: agent_name.to_string(),
            started_at,
            finished_at: Some(chrono::Utc::now()),
            duration_ms: Some(0),
            status: RunStatus::Error,
            error: Some(e.to_string()),
        });
        return Err(e);
    }

    shared.stack.lock().unwrap().push(agent_name.to_string());
    shared.call_count.fetch_add(1, Ordering::SeqCst);

    let ctx = InvocationContext {
        data_dir,
        story_id,
        run_id: run_id.clone(),
        parent_run_id: parent_run_id.clone(),
        root_run_id: root_run_id.clone(),
        depth,
        agent_name: agent_name.to_string(),
        shared: shared.clone(),
    };

    let timeout = std::time::Duration::from_millis(shared.options.timeout_ms);
    let run_result = tokio::time::timeout(timeout, definition.run(ctx, input)).await;

    shared.stack.lock().unwrap().pop();

    let finished_at = chrono::Utc::now();
    let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

    let result = match run_result {
        Err(_) => Err(Error::AgentTimeout(shared.options.timeout_ms)),
        Ok(Err(msg)) => Err(Error::validation(msg)),
        Ok(Ok(output)) => {
            if let Err(msg) = definition.validate_output(&output) {
                Err(Error::validation(msg))
            } else {
                Ok(output)
            }
        }
    };

    record_trace(&shared, AgentTraceEntry {
        run_id,
        parent_run_id,
        root_run_id,
        agent_name: agent_name.to_string(),
        started_at,
        finished_at: Some(finished_at),
        duration_ms: Some(duration_ms),
        status: if result.is_ok() { RunStatus::Success } else { RunStatus::Error },
        error: result.as_ref().err().map(|e| e.to_string()),
    });

    result
}

fn enforce_limits(shared: &SharedState, agent_name: &str, depth: usize, parent_agent_name: Option<&str>) -> Result<()> {
    if shared.call_count.load(Ordering::SeqCst) >= shared.options.max_calls {
        return Err(Error::AgentCallLimitExceeded(shared.options.max_calls));
    }
    if depth > shared.options.max_depth {
        return Err(Error::AgentDepthExceeded(shared.options.max_depth));
    }
    if shared.stack.lock().unwrap().iter().any(|s| s == agent_name) {
        return Err(Error::AgentCycle(agent_name.to_string()));
    }
    if let Some(parent_name) = parent_agent_name {
        if let Some(parent_def) = shared.registry.get(parent_name) {
            if let Some(allowed) = parent_def.allowed_calls() {
                if !allowed.iter().any(|a| a == agent_name) {
                    return Err(Error::validation(format!(
                        "agent '{}' is not in '{}'s allowedCalls",
                        agent_name, parent_name
                    )));
                }
            }
        }
    }
    Ok(())
}

fn record_trace(shared: &SharedState, entry: AgentTraceEntry) {
    shared.trace.lock().unwrap().push(entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;
    #[async_trait]
    impl crate::definition::AgentDefinition for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn run(&self, _ctx: InvocationContext, input: Value) -> Result<Value, String> {
            Ok(input)
        }
    }

    struct CyclesBack;
    #[async_trait]
    impl crate::definition::AgentDefinition for CyclesBack {
        fn name(&self) -> &str {
            "cycler"
        }
        async fn run(&self, ctx: InvocationContext, input: Value) -> Result<Value, String> {
            ctx.invoke_agent("cycler", input).await.map_err(|e| e.to_string())
        }
    }

    #[tokio::test]
    async fn unknown_agent_fails() {
        let registry = Arc::new(AgentRegistry::new());
        let result = invoke_agent(registry, "/tmp", StoryId::new("s1"), "nope", serde_json::json!({}), InvokeOptions::default()).await;
        assert!(matches!(result, Err(Error::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn successful_run_records_trace() {
        let mut registry = AgentRegistry::new();
        registry.register(Echo);
        let result = invoke_agent(Arc::new(registry), "/tmp", StoryId::new("s1"), "echo", serde_json::json!({"a":1}), InvokeOptions::default()).await.unwrap();
        assert_eq!(result.output, serde_json::json!({"a":1}));
        assert_eq!(result.trace.len(), 1);
        assert_eq!(result.trace[0].status, RunStatus::Success);
    }

    #[tokio::test]
    async fn self_cycle_is_rejected() {
        let mut registry = AgentRegistry::new();
        registry.register(CyclesBack);
        let result = invoke_agent(Arc::new(registry), "/tmp", StoryId::new("s1"), "cycler", serde_json::json!({}), InvokeOptions::default()).await;
        assert!(result.is_err());
    }
}
