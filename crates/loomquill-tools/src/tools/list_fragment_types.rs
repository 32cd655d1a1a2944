//! listFragmentTypes — distinct fragment types present in the story.

use crate::registry::{Tool, ToolResult};
use loomquill_core::StoryId;
use loomquill_store::FragmentStore;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct ListFragmentTypesTool {
    store: Arc<FragmentStore>,
    story_id: StoryId,
}

impl ListFragmentTypesTool {
    pub fn new(store: Arc<FragmentStore>, story_id: StoryId) -> Self {
        Self { store, story_id }
    }
}

#[async_trait::async_trait]
impl Tool for ListFragmentTypesTool {
    fn name(&self) -> &str {
        "listFragmentTypes"
    }

    fn description(&self) -> &str {
        "List the distinct fragment types present in this story."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let summaries = self.store.list_summaries(&self.story_id, None, true).await;
        let types: BTreeSet<String> = summaries.into_iter().map(|s| s.fragment_type).collect();
        ToolResult::json(json!(types.into_iter().collect::<Vec<_>>()))
    }
}
