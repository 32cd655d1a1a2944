//! deleteFragment — write tool, permanently removes a fragment.

use crate::registry::{Tool, ToolResult};
use loomquill_core::FragmentId;
use loomquill_core::StoryId;
use loomquill_store::FragmentStore;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct DeleteFragmentTool {
    store: Arc<FragmentStore>,
    story_id: StoryId,
}

impl DeleteFragmentTool {
    pub fn new(store: Arc<FragmentStore>, story_id: StoryId) -> Self {
        Self { store, story_id }
    }
}

#[async_trait::async_trait]
impl Tool for DeleteFragmentTool {
    fn name(&self) -> &str {
        "deleteFragment"
    }

    fn description(&self) -> &str {
        "Permanently delete a fragment."
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(id) = args.get("id").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: id");
        };
        let fragment_id = FragmentId::from_raw(id);
        match self.store.delete(&self.story_id, &fragment_id).await {
            Ok(()) => ToolResult::json(json!({ "deleted": id })),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
