//! Shared application state threaded through every handler.

use loomquill_context::InstructionRegistry;
use loomquill_llm::provider::LlmProvider;
use loomquill_pipeline::{ActiveAgentRegistry, GenerationPipeline, LibrarianScheduler};
use loomquill_store::{BlockConfigStore, FragmentStore, GenerationLogStore, StoryStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub fragment_store: Arc<FragmentStore>,
    pub story_store: Arc<StoryStore>,
    pub block_config_store: Arc<BlockConfigStore>,
    pub log_store: Arc<GenerationLogStore>,
    pub instructions: Arc<InstructionRegistry>,
    pub active_agents: Arc<ActiveAgentRegistry>,
    pub librarian: Arc<LibrarianScheduler>,
    pub pipeline: Arc<GenerationPipeline>,
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
