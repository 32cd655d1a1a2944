//! editFragment — first-occurrence find/replace against one fragment's content.

use crate::registry::{Tool, ToolResult};
use loomquill_core::FragmentId;
use loomquill_core::StoryId;
use loomquill_store::{FragmentStore, VersionedPatch};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct EditFragmentTool {
    store: Arc<FragmentStore>,
    story_id: StoryId,
}

impl EditFragmentTool {
    pub fn new(store: Arc<FragmentStore>, story_id: StoryId) -> Self {
        Self { store, story_id }
    }
}

#[async_trait::async_trait]
impl Tool for EditFragmentTool {
    fn name(&self) -> &str {
        "editFragment"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of oldText with newText in one fragment's content."
    }

    fn prompt(&self) -> &str {
        "oldText must appear exactly in the fragment's content; only the first occurrence is replaced."
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "oldText": { "type": "string" },
                "newText": { "type": "string" }
            },
            "required": ["id", "oldText", "newText"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(id) = args.get("id").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: id");
        };
        let Some(old_text) = args.get("oldText").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: oldText");
        };
        let Some(new_text) = args.get("newText").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: newText");
        };

        let fragment_id = FragmentId::from_raw(id);
        let Some(fragment) = self.store.get(&self.story_id, &fragment_id).await else {
            return ToolResult::error(format!("fragment not found: {}", id));
        };
        if !fragment.content.contains(old_text) {
            return ToolResult::error("oldText not found in fragment content");
        }
        let new_content = fragment.content.replacen(old_text, new_text, 1);

        let patch = VersionedPatch { content: Some(new_content), ..Default::default() };
        match self.store.update_versioned(&self.story_id, &fragment_id, patch).await {
            Ok(fragment) => ToolResult::json(serde_json::to_value(&fragment).unwrap_or_default()),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
