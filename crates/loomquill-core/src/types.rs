//! The shared persistent/transient data model (spec.md §3).

use crate::ids::{FragmentId, StoryId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Where a fragment's content is injected into the prompt.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    System,
    User,
}

/// A single previous state of a fragment, appended whenever
/// name/description/content changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentSnapshot {
    pub version: u32,
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(default = "now")]
    pub snapshot_at: chrono::DateTime<chrono::Utc>,
}

/// A persisted fragment: the atomic unit of story content.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub id: FragmentId,
    #[serde(rename = "type")]
    pub fragment_type: String,
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default = "default_placement")]
    pub placement: Placement,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default = "one")]
    pub version: u32,
    #[serde(default)]
    pub versions: Vec<FragmentSnapshot>,
}

fn default_placement() -> Placement {
    Placement::User
}

fn one() -> u32 {
    1
}

impl Fragment {
    /// A one-line summary used in non-sticky shortlists: `"{id}: {name} — {description}"`.
    pub fn shortlist_entry(&self) -> String {
        format!("{}: {} — {}", self.id, self.name, self.description)
    }
}

/// A persisted story.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: StoryId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub summary: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub settings: StorySettings,
}

/// Story-scoped config (spec.md §6 "Config keys").
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorySettings {
    pub context_limit: ContextLimit,
    pub max_steps: u32,
    /// 0 disables summarization entirely.
    pub summarization_threshold: u32,
    pub output_format: OutputFormat,
    pub auto_apply_librarian: bool,
}

impl Default for StorySettings {
    fn default() -> Self {
        Self {
            context_limit: ContextLimit::fragments(20),
            max_steps: 10,
            summarization_threshold: 8192,
            output_format: OutputFormat::Markdown,
            auto_apply_librarian: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Plaintext,
    Markdown,
}

/// The prose-window budget policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ContextLimit {
    Fragments { value: u64 },
    Tokens { value: u64 },
    Characters { value: u64 },
}

impl ContextLimit {
    pub fn fragments(n: u64) -> Self {
        Self::Fragments { value: n }
    }
    pub fn tokens(n: u64) -> Self {
        Self::Tokens { value: n }
    }
    pub fn characters(n: u64) -> Self {
        Self::Characters { value: n }
    }
}

/// Transient context assembled for one generation request.
#[derive(Clone, Debug, Default)]
pub struct ContextState {
    pub story: Option<Story>,
    pub prose_fragments: Vec<Fragment>,
    pub sticky_guidelines: Vec<Fragment>,
    pub sticky_knowledge: Vec<Fragment>,
    pub sticky_characters: Vec<Fragment>,
    pub guideline_shortlist: Vec<Fragment>,
    pub knowledge_shortlist: Vec<Fragment>,
    pub character_shortlist: Vec<Fragment>,
    pub system_prompt_fragments: Vec<Fragment>,
    pub author_input: String,
}

/// Role of an assembled prompt message/block.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlockSource {
    Builtin,
    Custom,
}

/// A single ordered piece of the final prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextBlock {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub order: i64,
    pub source: BlockSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CustomBlockType {
    Simple,
    Script,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomBlockDefinition {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub order: i64,
    pub enabled: bool,
    #[serde(rename = "type")]
    pub block_type: CustomBlockType,
    pub content: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    Override,
    Prepend,
    Append,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_mode: Option<ContentMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_content: Option<String>,
}

/// Persisted per-story block configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockConfig {
    #[serde(default)]
    pub custom_blocks: Vec<CustomBlockDefinition>,
    #[serde(default)]
    pub overrides: HashMap<String, Override>,
    #[serde(default)]
    pub block_order: Vec<String>,
}

/// A single tool invocation recorded in a generation log.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub result: serde_json::Value,
}

/// A message as recorded in a generation log (role + rendered text).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggedMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Which pipeline mode produced a generation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Generate,
    Regenerate,
    Refine,
}

/// A persisted record of one pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationLog {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub mode: GenerationMode,
    pub input: String,
    pub messages: Vec<LoggedMessage>,
    #[serde(default)]
    pub tool_calls: Vec<LoggedToolCall>,
    pub generated_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_id: Option<FragmentId>,
    pub model: String,
    pub duration_ms: u64,
    pub step_count: u32,
    pub finish_reason: String,
    pub steps_exceeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Lightweight entry in a generation-log `_index.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationLogSummary {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub mode: GenerationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_id: Option<FragmentId>,
    pub model: String,
    pub duration_ms: u64,
}

impl From<&GenerationLog> for GenerationLogSummary {
    fn from(log: &GenerationLog) -> Self {
        Self {
            id: log.id.clone(),
            created_at: log.created_at,
            mode: log.mode,
            fragment_id: log.fragment_id.clone(),
            model: log.model.clone(),
            duration_ms: log.duration_ms,
        }
    }
}

/// Status of one agent-runner invocation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTraceEntry {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub root_run_id: String,
    pub agent_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An in-memory record of a currently-running agent, exposed for UI polling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAgent {
    pub id: String,
    pub story_id: StoryId,
    pub agent_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// The NDJSON event grammar (spec.md §6), shared by generation streams and
/// the librarian's analysis buffer (which additionally uses `Error`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "reasoning")]
    Reasoning { text: String },
    #[serde(rename = "tool-call")]
    ToolCall {
        id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        args: serde_json::Value,
    },
    #[serde(rename = "tool-result")]
    ToolResult {
        id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        result: serde_json::Value,
    },
    #[serde(rename = "finish")]
    Finish {
        #[serde(rename = "finishReason")]
        finish_reason: String,
        #[serde(rename = "stepCount")]
        step_count: u32,
    },
    #[serde(rename = "error")]
    Error { error: String },
}

/// Structured output produced by the librarian/analyze agent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOutput {
    pub summary_update: String,
    pub mentions: Vec<String>,
    pub contradictions: Vec<String>,
    pub knowledge_suggestions: Vec<KnowledgeSuggestion>,
    pub timeline_events: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnowledgeSuggestion {
    pub name: String,
    pub description: String,
    pub content: String,
}

/// One persisted librarian run's findings, surfaced to the UI whether or
/// not its `knowledgeSuggestions` were auto-applied.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarianFinding {
    pub id: String,
    pub story_id: StoryId,
    pub fragment_id: Option<FragmentId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub mentions: Vec<String>,
    pub contradictions: Vec<String>,
    pub timeline_events: Vec<String>,
    /// Present regardless of auto-apply; the UI shows these as pending
    /// review when `autoApplyLibrarian` is off.
    pub knowledge_suggestions: Vec<KnowledgeSuggestion>,
    pub knowledge_suggestions_applied: bool,
}

/// A suggested continuation direction (`/suggest-directions`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Direction {
    pub pacing: String,
    pub title: String,
    pub description: String,
    pub instruction: String,
}
