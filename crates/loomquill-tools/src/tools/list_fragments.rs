//! listFragments — summary listing, optionally filtered by type.

use crate::registry::{Tool, ToolResult};
use loomquill_core::StoryId;
use loomquill_store::FragmentStore;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct ListFragmentsTool {
    store: Arc<FragmentStore>,
    story_id: StoryId,
    name: String,
    type_filter: Option<String>,
}

impl ListFragmentsTool {
    pub fn new(store: Arc<FragmentStore>, story_id: StoryId) -> Self {
        Self { store, story_id, name: "listFragments".to_string(), type_filter: None }
    }

    /// A `list{Type}s` alias restricted to one fragment type.
    pub fn for_type(store: Arc<FragmentStore>, story_id: StoryId, fragment_type: &str, alias: &str) -> Self {
        Self { store, story_id, name: alias.to_string(), type_filter: Some(fragment_type.to_string()) }
    }
}

#[async_trait::async_trait]
impl Tool for ListFragmentsTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "List fragment summaries, optionally filtered by type."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": { "type": "string", "description": "Restrict to one fragment type" }
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let requested_type = self.type_filter.clone().or_else(|| args.get("type").and_then(|v| v.as_str()).map(str::to_string));
        let summaries = self.store.list_summaries(&self.story_id, requested_type.as_deref(), false).await;
        ToolResult::json(serde_json::to_value(&summaries).unwrap_or_default())
    }
}
