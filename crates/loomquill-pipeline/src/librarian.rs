//! Librarian Scheduler (spec §4.I): per-story debounced background
//! invocation of the analyzer agent, plus the live `AnalysisBuffer` each run
//! streams into.

use crate::active_agents::ActiveAgentRegistry;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use loomquill_agent::{run_agent_stream, RunInput};
use loomquill_core::types::{AnalysisOutput, Placement, StreamEvent};
use loomquill_core::{FragmentId, StoryId};
use loomquill_context::InstructionRegistry;
use loomquill_llm::provider::LlmProvider;
use loomquill_llm::types::LlmMessage;
use loomquill_core::types::LibrarianFinding;
use loomquill_store::{FragmentStore, LibrarianFindingStore, StoryStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LibrarianStatus {
    Idle,
    Scheduled,
    Running,
    Error,
}

/// Transient, per-run event buffer with replay-then-follow subscription
/// semantics: every subscriber sees the same sequence, buffered events first,
/// then live ones as they're pushed, until the buffer is finished.
pub struct AnalysisBuffer {
    events: tokio::sync::Mutex<Vec<StreamEvent>>,
    done: AtomicBool,
    notify: Notify,
}

impl AnalysisBuffer {
    fn new() -> Arc<Self> {
        Arc::new(Self { events: tokio::sync::Mutex::new(Vec::new()), done: AtomicBool::new(false), notify: Notify::new() })
    }

    async fn push_event(&self, event: StreamEvent) {
        self.events.lock().await.push(event);
        self.notify.notify_waiters();
    }

    async fn finish(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn supersede(&self) {
        self.push_event(StreamEvent::Error { error: "Superseded by new analysis".to_string() }).await;
        self.finish().await;
    }

    pub fn subscribe(self: &Arc<Self>) -> impl Stream<Item = StreamEvent> {
        let this = self.clone();
        async_stream::stream! {
            let mut next_index = 0usize;
            loop {
                let (batch, is_done) = {
                    let events = this.events.lock().await;
                    (events[next_index..].to_vec(), this.done.load(Ordering::SeqCst))
                };
                for event in batch {
                    next_index += 1;
                    yield event;
                }
                if is_done {
                    break;
                }
                this.notify.notified().await;
            }
        }
    }
}

struct StoryState {
    pending_timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    buffer: Mutex<Arc<AnalysisBuffer>>,
    status: Mutex<LibrarianStatus>,
    last_error: Mutex<Option<String>>,
    /// Set when a trigger arrives while a run is already in flight; a
    /// running analysis is never preempted, so this is picked up once the
    /// current run finishes and starts a fresh debounce cycle.
    queued_next: Mutex<Option<FragmentId>>,
}

impl StoryState {
    fn new() -> Self {
        Self {
            pending_timer: Mutex::new(None),
            buffer: Mutex::new(AnalysisBuffer::new()),
            status: Mutex::new(LibrarianStatus::Idle),
            last_error: Mutex::new(None),
            queued_next: Mutex::new(None),
        }
    }
}

pub struct LibrarianScheduler {
    fragment_store: Arc<FragmentStore>,
    story_store: Arc<StoryStore>,
    finding_store: Arc<LibrarianFindingStore>,
    instructions: Arc<InstructionRegistry>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    active_agents: Arc<ActiveAgentRegistry>,
    debounce: Duration,
    stories: DashMap<StoryId, Arc<StoryState>>,
}

impl LibrarianScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fragment_store: Arc<FragmentStore>,
        story_store: Arc<StoryStore>,
        finding_store: Arc<LibrarianFindingStore>,
        instructions: Arc<InstructionRegistry>,
        provider: Arc<dyn LlmProvider>,
        model: String,
        active_agents: Arc<ActiveAgentRegistry>,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new(Self { fragment_store, story_store, finding_store, instructions, provider, model, active_agents, debounce, stories: DashMap::new() })
    }

    fn story_state(&self, story_id: &StoryId) -> Arc<StoryState> {
        self.stories.entry(story_id.clone()).or_insert_with(|| Arc::new(StoryState::new())).clone()
    }

    pub fn status(&self, story_id: &StoryId) -> (LibrarianStatus, Option<String>) {
        let state = self.story_state(story_id);
        (*state.status.lock().unwrap(), state.last_error.lock().unwrap().clone())
    }

    pub fn subscribe(&self, story_id: &StoryId) -> impl Stream<Item = StreamEvent> {
        let buffer = self.story_state(story_id).buffer.lock().unwrap().clone();
        buffer.subscribe()
    }

    /// Cancels any pending timer for this story and starts a new one; on
    /// fire, runs the analyzer agent against `fragment`. A running analysis
    /// is never preempted: at most one librarian run per story is in flight
    /// at a time, so a trigger that arrives mid-run is remembered and
    /// restarts the debounce cycle once that run completes.
    pub fn trigger_librarian(self: &Arc<Self>, story_id: StoryId, fragment: FragmentId) {
        let state = self.story_state(&story_id);
        if *state.status.lock().unwrap() == LibrarianStatus::Running {
            *state.queued_next.lock().unwrap() = Some(fragment);
            return;
        }
        if let Some(handle) = state.pending_timer.lock().unwrap().take() {
            handle.abort();
        }
        *state.status.lock().unwrap() = LibrarianStatus::Scheduled;

        let this = self.clone();
        let debounce = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            this.run_librarian(story_id, fragment).await;
        });
        *state.pending_timer.lock().unwrap() = Some(handle);
    }

    async fn run_librarian(self: Arc<Self>, story_id: StoryId, fragment_id: FragmentId) {
        let state = self.story_state(&story_id);
        *state.pending_timer.lock().unwrap() = None;
        *state.status.lock().unwrap() = LibrarianStatus::Running;

        let new_buffer = AnalysisBuffer::new();
        let previous = std::mem::replace(&mut *state.buffer.lock().unwrap(), new_buffer.clone());
        previous.supersede().await;

        let system = match self.instructions.resolve("analyze", &self.model).await {
            Ok(text) => text,
            Err(e) => {
                self.fail(&state, &new_buffer, e.to_string()).await;
                self.requeue_next(&story_id, &state);
                return;
            }
        };

        let fragment = self.fragment_store.get(&story_id, &fragment_id).await;
        let user_text = match &fragment {
            Some(f) => format!("Analyze this newly written prose fragment for corpus impact:\n\n{}", f.content),
            None => format!("Analyze story {} for corpus impact.", story_id),
        };

        let tools = Arc::new(loomquill_tools::create_registry(self.fragment_store.clone(), story_id.clone(), false).await);
        let agent_id = self.active_agents.register(story_id.clone(), "analyze");

        let (stream, completion_rx) = run_agent_stream(
            self.provider.clone(),
            tools,
            RunInput { model: self.model.clone(), system: Some(system), messages: vec![LlmMessage::user(user_text)], max_steps: 10 },
            CancellationToken::new(),
        );
        tokio::pin!(stream);
        while let Some(event) = stream.next().await {
            new_buffer.push_event(event).await;
        }
        self.active_agents.unregister(&agent_id);

        let completion = match completion_rx.await {
            Ok(c) => c,
            Err(_) => {
                self.fail(&state, &new_buffer, "librarian run aborted before completing".to_string()).await;
                self.requeue_next(&story_id, &state);
                return;
            }
        };

        match parse_analysis_output(&completion.text) {
            Some(output) => {
                self.integrate(&story_id, &fragment_id, &output).await;
                *state.status.lock().unwrap() = LibrarianStatus::Idle;
                *state.last_error.lock().unwrap() = None;
            }
            None => {
                *state.status.lock().unwrap() = LibrarianStatus::Error;
                *state.last_error.lock().unwrap() = Some("analyzer output was not valid structured JSON".to_string());
            }
        }
        new_buffer.finish().await;
        self.requeue_next(&story_id, &state);
    }

    /// Picks up a trigger that arrived while this run was in flight and
    /// starts a fresh debounce cycle for it.
    fn requeue_next(self: &Arc<Self>, story_id: &StoryId, state: &StoryState) {
        if let Some(next_fragment) = state.queued_next.lock().unwrap().take() {
            self.trigger_librarian(story_id.clone(), next_fragment);
        }
    }

    async fn fail(&self, state: &StoryState, buffer: &Arc<AnalysisBuffer>, message: String) {
        buffer.push_event(StreamEvent::Error { error: message.clone() }).await;
        buffer.finish().await;
        *state.status.lock().unwrap() = LibrarianStatus::Error;
        *state.last_error.lock().unwrap() = Some(message);
    }

    /// Appends `summaryUpdate` to the rolling summary, persists the full
    /// finding (mentions/contradictions/timeline events/suggestions) for the
    /// UI, and, when the story opts in, materializes `knowledgeSuggestions`
    /// as knowledge fragments.
    async fn integrate(&self, story_id: &StoryId, fragment_id: &FragmentId, output: &AnalysisOutput) {
        let settings = self.story_store.get(story_id).await.map(|s| s.settings);

        let threshold = settings.as_ref().map(|s| s.summarization_threshold).unwrap_or(0);
        if !output.summary_update.is_empty() && threshold != 0 {
            let max_bytes = threshold as usize;
            if let Err(e) = self.story_store.append_summary(story_id, &output.summary_update, max_bytes).await {
                tracing::warn!(error = %e, story_id = %story_id, "failed to append librarian summary");
            }
        }

        let auto_apply = settings.map(|s| s.auto_apply_librarian).unwrap_or(false);

        let finding = LibrarianFinding {
            id: uuid::Uuid::new_v4().to_string(),
            story_id: story_id.clone(),
            fragment_id: Some(fragment_id.clone()),
            created_at: chrono::Utc::now(),
            mentions: output.mentions.clone(),
            contradictions: output.contradictions.clone(),
            timeline_events: output.timeline_events.clone(),
            knowledge_suggestions: output.knowledge_suggestions.clone(),
            knowledge_suggestions_applied: auto_apply,
        };
        if let Err(e) = self.finding_store.save(&finding).await {
            tracing::warn!(error = %e, story_id = %story_id, "failed to persist librarian findings");
        }

        if !auto_apply {
            return;
        }
        for suggestion in &output.knowledge_suggestions {
            if let Err(e) = self
                .fragment_store
                .create(story_id, "knowledge", &suggestion.name, &suggestion.description, &suggestion.content, Placement::User, false)
                .await
            {
                tracing::warn!(error = %e, story_id = %story_id, "failed to apply knowledge suggestion");
            }
        }
    }
}

/// The analyzer agent is expected to end its turn with a JSON object
/// matching `AnalysisOutput`, optionally wrapped in a ```json fenced block.
fn parse_analysis_output(text: &str) -> Option<AnalysisOutput> {
    let trimmed = text.trim();
    if let Ok(output) = serde_json::from_str::<AnalysisOutput>(trimmed) {
        return Some(output);
    }
    let fenced = trimmed.rsplit("```").nth(1).unwrap_or(trimmed);
    let fenced = fenced.strip_prefix("json").unwrap_or(fenced).trim();
    serde_json::from_str::<AnalysisOutput>(fenced).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let text = r#"{"summaryUpdate":"s","mentions":[],"contradictions":[],"knowledgeSuggestions":[],"timelineEvents":[]}"#;
        let output = parse_analysis_output(text).unwrap();
        assert_eq!(output.summary_update, "s");
    }

    #[test]
    fn parses_fenced_json() {
        let text = "Here's my analysis:\n```json\n{\"summaryUpdate\":\"s\",\"mentions\":[],\"contradictions\":[],\"knowledgeSuggestions\":[],\"timelineEvents\":[]}\n```";
        let output = parse_analysis_output(text).unwrap();
        assert_eq!(output.summary_update, "s");
    }

    #[test]
    fn non_json_text_returns_none() {
        assert!(parse_analysis_output("just some prose").is_none());
    }

    #[tokio::test]
    async fn analysis_buffer_replays_then_follows() {
        let buffer = AnalysisBuffer::new();
        buffer.push_event(StreamEvent::Text { text: "a".to_string() }).await;
        buffer.finish().await;

        let events: Vec<_> = buffer.subscribe().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Text { .. }));
    }

    #[tokio::test]
    async fn supersede_emits_error_then_finishes() {
        let buffer = AnalysisBuffer::new();
        buffer.supersede().await;
        let events: Vec<_> = buffer.subscribe().collect().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Error { error } => assert_eq!(error, "Superseded by new analysis"),
            other => panic!("expected error event, got {:?}", other),
        }
    }
}
