//! Generation Pipeline (spec §4.H): orchestrates Context Builder → Block
//! Engine → Instruction Registry → Tool Registry → Agent Runner → Event-
//! Stream Adapter for one prose-generation request, then persists the
//! result and schedules the librarian.

use crate::active_agents::ActiveAgentRegistry;
use crate::librarian::LibrarianScheduler;
use futures::{Stream, StreamExt};
use loomquill_agent::{run_agent_stream, RunInput};
use loomquill_context::{apply_block_config, build_context, default_blocks, BuildOptions, InstructionRegistry, ScriptContext};
use loomquill_core::types::{
    Fragment, GenerationLog, GenerationMode, LoggedMessage, Placement, Role, StreamEvent,
};
use loomquill_core::{Error, FragmentId, Result, StoryId};
use loomquill_llm::provider::LlmProvider;
use loomquill_llm::types::LlmMessage;
use loomquill_store::{BlockConfigStore, FragmentStore, GenerationLogStore, LibrarianFindingStore, StoryStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// `POST /stories/{sid}/generate` body (spec.md §6).
pub struct GenerateRequest {
    pub input: String,
    pub save_result: bool,
    pub mode: GenerationMode,
    pub fragment_id: Option<FragmentId>,
}

pub struct GenerationPipeline {
    fragment_store: Arc<FragmentStore>,
    story_store: Arc<StoryStore>,
    block_config_store: Arc<BlockConfigStore>,
    log_store: Arc<GenerationLogStore>,
    instructions: Arc<InstructionRegistry>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    active_agents: Arc<ActiveAgentRegistry>,
    librarian: Arc<LibrarianScheduler>,
}

impl GenerationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fragment_store: Arc<FragmentStore>,
        story_store: Arc<StoryStore>,
        block_config_store: Arc<BlockConfigStore>,
        log_store: Arc<GenerationLogStore>,
        instructions: Arc<InstructionRegistry>,
        provider: Arc<dyn LlmProvider>,
        model: String,
        active_agents: Arc<ActiveAgentRegistry>,
        librarian: Arc<LibrarianScheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fragment_store,
            story_store,
            block_config_store,
            log_store,
            instructions,
            provider,
            model,
            active_agents,
            librarian,
        })
    }

    /// Runs one generation request, yielding NDJSON `StreamEvent`s as the
    /// writer agent produces them. Persistence (steps 7-9) happens after the
    /// stream is fully drained, so subscribers see events before any of the
    /// side effects they describe have landed on disk.
    pub fn generate(
        self: &Arc<Self>,
        story_id: StoryId,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StreamEvent> {
        let this = self.clone();
        async_stream::stream! {
            let start = chrono::Utc::now();

            let target_fragment = match &request.fragment_id {
                Some(id) => this.fragment_store.get(&story_id, id).await,
                None => None,
            };
            if matches!(request.mode, GenerationMode::Regenerate | GenerationMode::Refine) && target_fragment.is_none() {
                yield StreamEvent::Error { error: Error::not_found("target fragment").to_string() };
                yield StreamEvent::Finish { finish_reason: "error".to_string(), step_count: 0 };
                return;
            }

            let options = BuildOptions {
                prose_before_fragment_id: request.fragment_id.clone(),
                summary_before_fragment_id: request.fragment_id.clone(),
            };
            let context = match build_context(&story_id, &request.input, &options, &this.fragment_store, &this.story_store).await {
                Ok(c) => c,
                Err(e) => {
                    yield StreamEvent::Error { error: e.to_string() };
                    yield StreamEvent::Finish { finish_reason: "error".to_string(), step_count: 0 };
                    return;
                }
            };

            let writing_instructions = match this.instructions.resolve("writing", &this.model).await {
                Ok(text) => text,
                Err(e) => {
                    yield StreamEvent::Error { error: e.to_string() };
                    yield StreamEvent::Finish { finish_reason: "error".to_string(), step_count: 0 };
                    return;
                }
            };
            let output_format = context.story.as_ref().map(|s| s.settings.output_format).unwrap_or(loomquill_core::types::OutputFormat::Markdown);
            let writing_instructions = format!("{}\n\n{}", writing_instructions, output_format_instruction(output_format));

            let tools = Arc::new(loomquill_tools::create_registry(this.fragment_store.clone(), story_id.clone(), true).await);
            let tool_suffix = tools.combined_prompts();

            let blocks = default_blocks(&context, &writing_instructions, &tool_suffix);
            let block_config = this.block_config_store.get(&story_id).await;
            let script_ctx = ScriptContext {
                story: context.story.clone(),
                prose_fragments: context.prose_fragments.clone(),
                sticky_guidelines: context.sticky_guidelines.clone(),
                sticky_knowledge: context.sticky_knowledge.clone(),
                sticky_characters: context.sticky_characters.clone(),
                guideline_shortlist: context.guideline_shortlist.clone(),
                knowledge_shortlist: context.knowledge_shortlist.clone(),
                character_shortlist: context.character_shortlist.clone(),
                new_prose: None,
                fragment_store: this.fragment_store.clone(),
                story_id: story_id.clone(),
            };
            let blocks = apply_block_config(blocks, &block_config, &script_ctx).await;
            let (system_text, user_text) = loomquill_context::concatenate_by_role(&blocks);

            let max_steps = this.story_store.get(&story_id).await.map(|s| s.settings.max_steps).unwrap_or(10);
            let agent_id = this.active_agents.register(story_id.clone(), "writer");

            let (agent_stream, completion_rx) = run_agent_stream(
                this.provider.clone(),
                tools,
                RunInput { model: this.model.clone(), system: Some(system_text), messages: vec![LlmMessage::user(user_text.clone())], max_steps },
                cancel,
            );
            tokio::pin!(agent_stream);
            while let Some(event) = agent_stream.next().await {
                yield event;
            }
            this.active_agents.unregister(&agent_id);

            let completion = match completion_rx.await {
                Ok(c) => c,
                Err(_) => return,
            };

            let mut fragment_id = request.fragment_id.clone();
            if request.save_result {
                match this.persist_result(&story_id, &request, target_fragment.as_ref(), &completion.text).await {
                    Ok(id) => fragment_id = Some(id),
                    Err(e) => tracing::warn!(error = %e, story_id = %story_id, "failed to persist generation result"),
                }
            }

            let duration_ms = (chrono::Utc::now() - start).num_milliseconds().max(0) as u64;
            let steps_exceeded = completion.finish_reason == "step-count-exceeded";
            let log = GenerationLog {
                id: uuid::Uuid::new_v4().to_string(),
                created_at: start,
                mode: request.mode,
                input: request.input.clone(),
                messages: vec![LoggedMessage { role: Role::User, content: user_text }],
                tool_calls: completion.tool_calls,
                generated_text: completion.text,
                fragment_id: fragment_id.clone(),
                model: this.model.clone(),
                duration_ms,
                step_count: completion.step_count,
                finish_reason: completion.finish_reason,
                steps_exceeded,
                total_usage: completion.total_usage,
                reasoning: if completion.reasoning.is_empty() { None } else { Some(completion.reasoning) },
            };
            if let Err(e) = this.log_store.save(&story_id, &log).await {
                tracing::warn!(error = %e, story_id = %story_id, "failed to persist generation log");
            }

            if let Some(id) = fragment_id {
                this.librarian.trigger_librarian(story_id.clone(), id);
            }
        }
    }

    /// Step 7: create a new prose fragment (`generate`) or update the target
    /// fragment's content (`regenerate`/`refine`), returning its id.
    async fn persist_result(
        &self,
        story_id: &StoryId,
        request: &GenerateRequest,
        target: Option<&Fragment>,
        generated_text: &str,
    ) -> Result<FragmentId> {
        match request.mode {
            GenerationMode::Generate => {
                let fragment = self
                    .fragment_store
                    .create(story_id, "prose", "Prose", &request.input, generated_text, Placement::User, false)
                    .await?;
                Ok(fragment.id)
            }
            GenerationMode::Regenerate | GenerationMode::Refine => {
                let target = target.ok_or_else(|| Error::not_found("target fragment"))?;
                let patch = loomquill_store::VersionedPatch { name: None, description: None, content: Some(generated_text.to_string()) };
                let fragment = self.fragment_store.update_versioned(story_id, &target.id, patch).await?;
                Ok(fragment.id)
            }
        }
    }
}

/// Appended to the writing instructions so the model's prose matches the
/// story's `outputFormat` setting (spec.md §6).
fn output_format_instruction(format: loomquill_core::types::OutputFormat) -> &'static str {
    match format {
        loomquill_core::types::OutputFormat::Plaintext => {
            "Write the continuation as plain text: no Markdown formatting (no headers, bold, italics, or lists)."
        }
        loomquill_core::types::OutputFormat::Markdown => "Write the continuation as Markdown where it aids readability.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_stream::stream;
    use loomquill_core::config::LibrarianConfig;
    use loomquill_llm::provider::{LlmResult, LlmStream};
    use loomquill_llm::types::{LlmRequest, StreamDelta};
    use std::time::Duration;

    struct StubProvider;

    #[async_trait::async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }
        fn models(&self) -> &[&str] {
            &["mock"]
        }
        async fn complete_stream(&self, _request: LlmRequest, _cancel: Option<CancellationToken>) -> LlmResult<LlmStream> {
            let s = stream! {
                yield Ok(StreamDelta::Text("the new page".to_string()));
                yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None });
            };
            Ok(Box::pin(s))
        }
    }

    async fn harness() -> (Arc<GenerationPipeline>, tempfile::TempDir, StoryId) {
        let dir = tempfile::tempdir().unwrap();
        let fragment_store = Arc::new(FragmentStore::new(dir.path()));
        let story_store = Arc::new(StoryStore::new(dir.path()));
        let block_config_store = Arc::new(BlockConfigStore::new(dir.path()));
        let log_store = Arc::new(GenerationLogStore::new(dir.path()));
        let finding_store = Arc::new(LibrarianFindingStore::new(dir.path()));
        let instructions = Arc::new(InstructionRegistry::new(dir.path().join("instruction-sets"), default_instructions()));
        let provider: Arc<dyn LlmProvider> = Arc::new(StubProvider);
        let active_agents = ActiveAgentRegistry::new(Duration::from_secs(600));
        let librarian_cfg = LibrarianConfig::default();
        let librarian = LibrarianScheduler::new(
            fragment_store.clone(),
            story_store.clone(),
            finding_store,
            instructions.clone(),
            provider.clone(),
            "mock".to_string(),
            active_agents.clone(),
            Duration::from_millis(librarian_cfg.debounce_ms),
        );

        let story_id = StoryId::new("s1");
        story_store.create(story_id.clone(), "My Story", "d").await.unwrap();

        let pipeline = GenerationPipeline::new(
            fragment_store,
            story_store,
            block_config_store,
            log_store,
            instructions,
            provider,
            "mock".to_string(),
            active_agents,
            librarian,
        );
        (pipeline, dir, story_id)
    }

    fn default_instructions() -> std::collections::HashMap<String, String> {
        let mut map = std::collections::HashMap::new();
        map.insert("writing".to_string(), "Write the next page.".to_string());
        map.insert("analyze".to_string(), "Analyze the new page.".to_string());
        map
    }

    #[tokio::test]
    async fn generate_mode_creates_prose_fragment_and_log() {
        let (pipeline, _dir, story_id) = harness().await;
        let request = GenerateRequest { input: "continue the story".to_string(), save_result: true, mode: GenerationMode::Generate, fragment_id: None };
        let stream = pipeline.generate(story_id.clone(), request, CancellationToken::new());
        tokio::pin!(stream);
        let events: Vec<_> = stream.collect().await;
        assert!(matches!(events.last().unwrap(), StreamEvent::Finish { .. }));

        let summaries = pipeline.fragment_store.list_summaries(&story_id, Some("prose"), false).await;
        assert_eq!(summaries.len(), 1);

        let logs = pipeline.log_store.list_summaries(&story_id).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].fragment_id.as_ref().unwrap(), &summaries[0].id);
    }

    #[tokio::test]
    async fn regenerate_mode_updates_target_fragment() {
        let (pipeline, _dir, story_id) = harness().await;
        let original = pipeline.fragment_store.create(&story_id, "prose", "Prose", "d", "old text", Placement::User, false).await.unwrap();

        let request = GenerateRequest { input: "rewrite this".to_string(), save_result: true, mode: GenerationMode::Regenerate, fragment_id: Some(original.id.clone()) };
        let stream = pipeline.generate(story_id.clone(), request, CancellationToken::new());
        tokio::pin!(stream);
        let _events: Vec<_> = stream.collect().await;

        let updated = pipeline.fragment_store.get(&story_id, &original.id).await.unwrap();
        assert_eq!(updated.content, "the new page");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.versions.len(), 1);
    }

    #[tokio::test]
    async fn regenerate_without_target_fails_before_any_model_call() {
        let (pipeline, _dir, story_id) = harness().await;
        let request = GenerateRequest { input: "x".to_string(), save_result: true, mode: GenerationMode::Regenerate, fragment_id: Some(FragmentId::from_raw("pr-missing0")) };
        let stream = pipeline.generate(story_id, request, CancellationToken::new());
        tokio::pin!(stream);
        let events: Vec<_> = stream.collect().await;
        assert!(matches!(events[0], StreamEvent::Error { .. }));
        assert!(matches!(events[1], StreamEvent::Finish { finish_reason: ref r, .. } if r == "error"));
    }

    #[tokio::test]
    async fn save_result_false_skips_persistence_but_still_logs() {
        let (pipeline, _dir, story_id) = harness().await;
        let request = GenerateRequest { input: "draft".to_string(), save_result: false, mode: GenerationMode::Generate, fragment_id: None };
        let stream = pipeline.generate(story_id.clone(), request, CancellationToken::new());
        tokio::pin!(stream);
        let _events: Vec<_> = stream.collect().await;

        assert!(pipeline.fragment_store.list_summaries(&story_id, Some("prose"), false).await.is_empty());
        let logs = pipeline.log_store.list_summaries(&story_id).await;
        assert_eq!(logs.len(), 1);
        assert!(logs[0].fragment_id.is_none());
    }
}
