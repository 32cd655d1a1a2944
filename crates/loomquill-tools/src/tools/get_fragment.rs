//! getFragment — fetch one fragment by id, optionally restricted to a type.

use crate::registry::{Tool, ToolResult};
use loomquill_core::{FragmentId, StoryId};
use loomquill_store::FragmentStore;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct GetFragmentTool {
    store: Arc<FragmentStore>,
    story_id: StoryId,
    name: String,
    type_filter: Option<String>,
}

impl GetFragmentTool {
    pub fn new(store: Arc<FragmentStore>, story_id: StoryId) -> Self {
        Self { store, story_id, name: "getFragment".to_string(), type_filter: None }
    }

    /// A `get{Type}` alias restricted to one fragment type.
    pub fn for_type(store: Arc<FragmentStore>, story_id: StoryId, fragment_type: &str, alias: &str) -> Self {
        Self { store, story_id, name: alias.to_string(), type_filter: Some(fragment_type.to_string()) }
    }
}

#[async_trait::async_trait]
impl Tool for GetFragmentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Fetch a single fragment by id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string", "description": "Fragment id" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(id) = args.get("id").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: id");
        };
        let fragment_id = FragmentId::from_raw(id);
        match self.store.get(&self.story_id, &fragment_id).await {
            Some(fragment) if self.type_filter.as_deref().map_or(true, |t| t == fragment.fragment_type) => {
                ToolResult::json(serde_json::to_value(&fragment).unwrap_or_default())
            }
            _ => ToolResult::error(format!("fragment not found: {}", id)),
        }
    }
}
