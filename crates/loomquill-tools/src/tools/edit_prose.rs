//! editProse — find/replace applied across every active prose fragment.

use crate::registry::{Tool, ToolResult};
use loomquill_core::StoryId;
use loomquill_store::{FragmentStore, VersionedPatch};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct EditProseTool {
    store: Arc<FragmentStore>,
    story_id: StoryId,
}

impl EditProseTool {
    pub fn new(store: Arc<FragmentStore>, story_id: StoryId) -> Self {
        Self { store, story_id }
    }
}

#[async_trait::async_trait]
impl Tool for EditProseTool {
    fn name(&self) -> &str {
        "editProse"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of oldText with newText across every active prose fragment."
    }

    fn prompt(&self) -> &str {
        "Applies to all active (non-archived) prose fragments; fails if oldText matches none of them."
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "oldText": { "type": "string" },
                "newText": { "type": "string" }
            },
            "required": ["oldText", "newText"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(old_text) = args.get("oldText").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: oldText");
        };
        let Some(new_text) = args.get("newText").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: newText");
        };

        let summaries = self.store.list_summaries(&self.story_id, Some("prose"), false).await;
        let mut edited = Vec::new();
        for summary in summaries {
            let Some(fragment) = self.store.get(&self.story_id, &summary.id).await else { continue };
            if !fragment.content.contains(old_text) {
                continue;
            }
            let new_content = fragment.content.replacen(old_text, new_text, 1);
            let patch = VersionedPatch { content: Some(new_content), ..Default::default() };
            match self.store.update_versioned(&self.story_id, &fragment.id, patch).await {
                Ok(updated) => edited.push(updated.id.to_string()),
                Err(e) => return ToolResult::error(e.to_string()),
            }
        }

        if edited.is_empty() {
            return ToolResult::error("oldText not found in any active prose fragment");
        }
        ToolResult::json(json!({ "editedIds": edited }))
    }
}
