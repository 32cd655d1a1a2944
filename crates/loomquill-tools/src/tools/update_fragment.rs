//! updateFragment — write tool; versioned when name/description/content change.

use crate::registry::{Tool, ToolResult};
use loomquill_core::FragmentId;
use loomquill_core::StoryId;
use loomquill_store::{FragmentStore, VersionedPatch};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct UpdateFragmentTool {
    store: Arc<FragmentStore>,
    story_id: StoryId,
}

impl UpdateFragmentTool {
    pub fn new(store: Arc<FragmentStore>, story_id: StoryId) -> Self {
        Self { store, story_id }
    }
}

#[async_trait::async_trait]
impl Tool for UpdateFragmentTool {
    fn name(&self) -> &str {
        "updateFragment"
    }

    fn description(&self) -> &str {
        "Update a fragment's name, description, and/or content, recording a version snapshot if any changed."
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "name": { "type": "string" },
                "description": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(id) = args.get("id").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: id");
        };
        let patch = VersionedPatch {
            name: args.get("name").and_then(|v| v.as_str()).map(str::to_string),
            description: args.get("description").and_then(|v| v.as_str()).map(str::to_string),
            content: args.get("content").and_then(|v| v.as_str()).map(str::to_string),
        };
        let fragment_id = FragmentId::from_raw(id);
        match self.store.update_versioned(&self.story_id, &fragment_id, patch).await {
            Ok(fragment) => ToolResult::json(serde_json::to_value(&fragment).unwrap_or_default()),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
