//! Event-Stream Adapter (spec §4.G) fused with the writer-agent tool-use loop
//! (spec §4.F step 5, `stopWhen = stepCountIs(maxSteps)`).
//!
//! Drives the model "parts" (text-delta, reasoning-delta, tool-call,
//! tool-result, finish) into the NDJSON `StreamEvent` grammar, accumulating a
//! `RunCompletion` that resolves once the stream closes.

use futures::{Stream, StreamExt};
use loomquill_core::types::{LoggedToolCall, StreamEvent, Usage};
use loomquill_llm::provider::LlmProvider;
use loomquill_llm::types::{
    validate_and_heal_messages, AccumulatedToolCall, ContentBlock, LlmContent, LlmMessage, LlmRequest, StreamDelta,
};
use loomquill_tools::ToolRegistry;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub struct RunInput {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    pub max_steps: u32,
}

#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<LoggedToolCall>,
    pub step_count: u32,
    pub finish_reason: String,
    pub total_usage: Option<Usage>,
}

/// Runs the writer/analyzer agent loop, yielding NDJSON-shaped `StreamEvent`s
/// as they happen and resolving `completion` once the stream has closed.
pub fn run_agent_stream(
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    input: RunInput,
    cancel: CancellationToken,
) -> (impl Stream<Item = StreamEvent>, oneshot::Receiver<RunCompletion>) {
    let (completion_tx, completion_rx) = oneshot::channel();

    let stream = async_stream::stream! {
        let mut messages = input.messages;
        let mut full_text = String::new();
        let mut full_reasoning = String::new();
        let mut tool_calls_log: Vec<LoggedToolCall> = Vec::new();
        let mut step_count = 0u32;
        let mut finish_reason = "end_turn".to_string();
        let mut total_usage: Option<Usage> = None;

        loop {
            if step_count >= input.max_steps {
                finish_reason = "step-count-exceeded".to_string();
                break;
            }
            if cancel.is_cancelled() {
                finish_reason = "cancelled".to_string();
                break;
            }

            let request = LlmRequest {
                model: input.model.clone(),
                messages: validate_and_heal_messages(&messages),
                tools: Some(tools.get_definitions()),
                system: input.system.clone(),
                ..Default::default()
            };

            let llm_stream = match provider.complete_stream(request, Some(cancel.clone())).await {
                Ok(s) => s,
                Err(e) => {
                    yield StreamEvent::Error { error: e.to_string() };
                    finish_reason = "error".to_string();
                    break;
                }
            };
            tokio::pin!(llm_stream);

            let mut step_text = String::new();
            let mut pending_tools: Vec<AccumulatedToolCall> = Vec::new();
            let mut current_tool: Option<AccumulatedToolCall> = None;
            let mut step_stop_reason: Option<String> = None;

            while let Some(delta_result) = llm_stream.next().await {
                match delta_result {
                    Ok(StreamDelta::Text(text)) => {
                        full_text.push_str(&text);
                        step_text.push_str(&text);
                        yield StreamEvent::Text { text };
                    }
                    Ok(StreamDelta::Thinking(text)) => {
                        full_reasoning.push_str(&text);
                        yield StreamEvent::Reasoning { text };
                    }
                    Ok(StreamDelta::ToolCallStart { id, name }) => {
                        current_tool = Some(AccumulatedToolCall { id, name, arguments: String::new() });
                    }
                    Ok(StreamDelta::ToolCallDelta { id, arguments }) => {
                        if let Some(tool) = current_tool.as_mut() {
                            if tool.id == id {
                                tool.arguments.push_str(&arguments);
                            }
                        }
                    }
                    Ok(StreamDelta::ToolCallEnd { id: _ }) => {
                        if let Some(tool) = current_tool.take() {
                            let args = tool.parse_arguments().unwrap_or_default();
                            yield StreamEvent::ToolCall { id: tool.id.clone(), tool_name: tool.name.clone(), args };
                            pending_tools.push(tool);
                        }
                    }
                    Ok(StreamDelta::Done { stop_reason, usage }) => {
                        step_stop_reason = stop_reason;
                        if let Some(u) = usage {
                            total_usage = Some(match total_usage {
                                Some(acc) => Usage {
                                    input_tokens: acc.input_tokens + u.input_tokens as u64,
                                    output_tokens: acc.output_tokens + u.output_tokens as u64,
                                },
                                None => Usage { input_tokens: u.input_tokens as u64, output_tokens: u.output_tokens as u64 },
                            });
                        }
                    }
                    Ok(StreamDelta::Error(e)) => {
                        yield StreamEvent::Error { error: e };
                    }
                    Err(e) => {
                        yield StreamEvent::Error { error: e.to_string() };
                        break;
                    }
                }
            }

            step_count += 1;
            finish_reason = step_stop_reason.unwrap_or_else(|| "end_turn".to_string());

            if pending_tools.is_empty() {
                if !step_text.is_empty() {
                    messages.push(LlmMessage::assistant(step_text));
                }
                break;
            }

            let mut assistant_blocks = Vec::new();
            if !step_text.is_empty() {
                assistant_blocks.push(ContentBlock::Text { text: step_text });
            }
            for tool in &pending_tools {
                assistant_blocks.push(ContentBlock::ToolUse {
                    id: tool.id.clone(),
                    name: tool.name.clone(),
                    input: tool.parse_arguments().unwrap_or_default(),
                });
            }
            messages.push(LlmMessage { role: "assistant".to_string(), content: LlmContent::Blocks(assistant_blocks) });

            let mut result_blocks = Vec::new();
            for tool in pending_tools {
                let args = tool.parse_arguments().unwrap_or_default();
                let result = tools.execute_cancellable(&tool.name, args.clone(), cancel.clone()).await;
                let is_error = result.is_error();
                let result_value = result.to_content_value();
                // The NDJSON `tool-result` event carries no `args` (spec.md
                // §4.G); `args` is only ever on `tool-call`. The persisted
                // `LoggedToolCall` is a different, already-merged shape
                // (spec.md §3's `toolCalls[{toolName,args,result}]`) — both
                // halves are known synchronously here, so there's no
                // separate by-id reassembly step to do.
                yield StreamEvent::ToolResult { id: tool.id.clone(), tool_name: tool.name.clone(), result: result_value.clone() };
                tool_calls_log.push(LoggedToolCall { tool_name: tool.name.clone(), args, result: result_value.clone() });
                result_blocks.push(ContentBlock::ToolResult {
                    tool_use_id: tool.id.clone(),
                    content: result_value.to_string(),
                    is_error: Some(is_error),
                });
            }
            messages.push(LlmMessage { role: "user".to_string(), content: LlmContent::Blocks(result_blocks) });
        }

        yield StreamEvent::Finish { finish_reason: finish_reason.clone(), step_count };
        let _ = completion_tx.send(RunCompletion {
            text: full_text,
            reasoning: full_reasoning,
            tool_calls: tool_calls_log,
            step_count,
            finish_reason,
            total_usage,
        });
    };

    (stream, completion_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_stream::stream;
    use loomquill_llm::provider::{LlmResult, LlmStream};
    use loomquill_tools::{Tool, ToolResult};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TextOnceProvider;

    #[async_trait::async_trait]
    impl LlmProvider for TextOnceProvider {
        fn name(&self) -> &str {
            "text-once"
        }
        fn models(&self) -> &[&str] {
            &["mock"]
        }
        async fn complete_stream(&self, _request: LlmRequest, _cancel: Option<CancellationToken>) -> LlmResult<LlmStream> {
            let s = stream! {
                yield Ok(StreamDelta::Text("hello".to_string()));
                yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None });
            };
            Ok(Box::pin(s))
        }
    }

    struct ToolThenTextProvider {
        called: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LlmProvider for ToolThenTextProvider {
        fn name(&self) -> &str {
            "tool-then-text"
        }
        fn models(&self) -> &[&str] {
            &["mock"]
        }
        async fn complete_stream(&self, _request: LlmRequest, _cancel: Option<CancellationToken>) -> LlmResult<LlmStream> {
            let first_call = self.called.fetch_add(1, Ordering::SeqCst) == 0;
            let s = stream! {
                if first_call {
                    yield Ok(StreamDelta::ToolCallStart { id: "t1".to_string(), name: "echo".to_string() });
                    yield Ok(StreamDelta::ToolCallDelta { id: "t1".to_string(), arguments: "{\"x\":1}".to_string() });
                    yield Ok(StreamDelta::ToolCallEnd { id: "t1".to_string() });
                    yield Ok(StreamDelta::Done { stop_reason: Some("tool_use".to_string()), usage: None });
                } else {
                    yield Ok(StreamDelta::Text("done".to_string()));
                    yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None });
                }
            };
            Ok(Box::pin(s))
        }
    }

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes args"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, args: Value) -> ToolResult {
            ToolResult::json(args)
        }
    }

    fn run_input(messages: Vec<LlmMessage>) -> RunInput {
        RunInput { model: "mock".to_string(), system: None, messages, max_steps: 10 }
    }

    #[tokio::test]
    async fn text_only_run_emits_text_then_finish() {
        let provider: Arc<dyn LlmProvider> = Arc::new(TextOnceProvider);
        let tools = Arc::new(ToolRegistry::new());
        let (stream, completion) = run_agent_stream(provider, tools, run_input(vec![LlmMessage::user("hi")]), CancellationToken::new());
        tokio::pin!(stream);

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        assert!(matches!(events[0], StreamEvent::Text { .. }));
        assert!(matches!(events.last().unwrap(), StreamEvent::Finish { .. }));

        let completion = completion.await.unwrap();
        assert_eq!(completion.text, "hello");
        assert_eq!(completion.step_count, 1);
    }

    #[tokio::test]
    async fn tool_call_then_text_runs_two_steps() {
        let provider: Arc<dyn LlmProvider> = Arc::new(ToolThenTextProvider { called: AtomicUsize::new(0) });
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let tools = Arc::new(registry);

        let (stream, completion) = run_agent_stream(provider, tools, run_input(vec![LlmMessage::user("hi")]), CancellationToken::new());
        tokio::pin!(stream);

        let mut saw_tool_call = false;
        let mut saw_tool_result = false;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::ToolCall { tool_name, .. } => {
                    saw_tool_call = true;
                    assert_eq!(tool_name, "echo");
                }
                StreamEvent::ToolResult { .. } => saw_tool_result = true,
                _ => {}
            }
        }
        assert!(saw_tool_call);
        assert!(saw_tool_result);

        let completion = completion.await.unwrap();
        assert_eq!(completion.step_count, 2);
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.text, "done");
    }

    #[tokio::test]
    async fn max_steps_zero_stops_before_any_request() {
        let provider: Arc<dyn LlmProvider> = Arc::new(TextOnceProvider);
        let tools = Arc::new(ToolRegistry::new());
        let mut input = run_input(vec![LlmMessage::user("hi")]);
        input.max_steps = 0;
        let (stream, completion) = run_agent_stream(provider, tools, input, CancellationToken::new());
        tokio::pin!(stream);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Finish { step_count: 0, .. }));
        let completion = completion.await.unwrap();
        assert_eq!(completion.finish_reason, "step-count-exceeded");
    }
}
