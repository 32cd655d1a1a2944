//! createFragment — write tool, gated behind `readOnly`.

use crate::registry::{Tool, ToolResult};
use loomquill_core::types::Placement;
use loomquill_core::StoryId;
use loomquill_store::FragmentStore;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct CreateFragmentTool {
    store: Arc<FragmentStore>,
    story_id: StoryId,
}

impl CreateFragmentTool {
    pub fn new(store: Arc<FragmentStore>, story_id: StoryId) -> Self {
        Self { store, story_id }
    }
}

#[async_trait::async_trait]
impl Tool for CreateFragmentTool {
    fn name(&self) -> &str {
        "createFragment"
    }

    fn description(&self) -> &str {
        "Create a new fragment of the given type."
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": { "type": "string" },
                "name": { "type": "string" },
                "description": { "type": "string" },
                "content": { "type": "string" },
                "sticky": { "type": "boolean" },
                "placement": { "type": "string", "enum": ["system", "user"] }
            },
            "required": ["type", "name", "description", "content"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(fragment_type) = args.get("type").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: type");
        };
        let Some(name) = args.get("name").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: name");
        };
        let Some(description) = args.get("description").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: description");
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: content");
        };
        let sticky = args.get("sticky").and_then(|v| v.as_bool()).unwrap_or(false);
        let placement = match args.get("placement").and_then(|v| v.as_str()) {
            Some("system") => Placement::System,
            _ => Placement::User,
        };

        match self.store.create(&self.story_id, fragment_type, name, description, content, placement, sticky).await {
            Ok(fragment) => ToolResult::json(serde_json::to_value(&fragment).unwrap_or_default()),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
