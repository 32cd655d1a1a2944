//! searchFragments — case-insensitive substring search over fragment content.

use crate::registry::{Tool, ToolResult};
use loomquill_core::StoryId;
use loomquill_store::FragmentStore;
use serde_json::{json, Value};
use std::sync::Arc;

const EXCERPT_RADIUS: usize = 80;

pub struct SearchFragmentsTool {
    store: Arc<FragmentStore>,
    story_id: StoryId,
}

impl SearchFragmentsTool {
    pub fn new(store: Arc<FragmentStore>, story_id: StoryId) -> Self {
        Self { store, story_id }
    }
}

/// A ±`EXCERPT_RADIUS`-char window around the first case-insensitive match of
/// `query` in `content`, or `None` if there's no match.
pub fn excerpt_around_match(content: &str, query: &str) -> Option<String> {
    let haystack = content.to_lowercase();
    let needle = query.to_lowercase();
    let byte_pos = haystack.find(&needle)?;

    let start = content
        .char_indices()
        .rev()
        .find(|(i, _)| *i <= byte_pos.saturating_sub(EXCERPT_RADIUS))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let end_target = byte_pos + needle.len() + EXCERPT_RADIUS;
    let end = content.char_indices().find(|(i, _)| *i >= end_target).map(|(i, _)| i).unwrap_or(content.len());

    Some(content[start..end].to_string())
}

#[async_trait::async_trait]
impl Tool for SearchFragmentsTool {
    fn name(&self) -> &str {
        "searchFragments"
    }

    fn description(&self) -> &str {
        "Case-insensitive substring search across fragment content, returning an excerpt around the first match."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "q": { "type": "string", "description": "Substring to search for" },
                "type": { "type": "string", "description": "Restrict to one fragment type" }
            },
            "required": ["q"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(query) = args.get("q").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: q");
        };
        let type_filter = args.get("type").and_then(|v| v.as_str());

        let summaries = self.store.list_summaries(&self.story_id, type_filter, false).await;
        let mut hits = Vec::new();
        for summary in summaries {
            let Some(fragment) = self.store.get(&self.story_id, &summary.id).await else { continue };
            if let Some(excerpt) = excerpt_around_match(&fragment.content, query) {
                hits.push(json!({ "id": fragment.id.to_string(), "excerpt": excerpt }));
            }
        }
        ToolResult::json(Value::Array(hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_centers_on_match_case_insensitively() {
        let content = format!("{}MATCH{}", "a".repeat(200), "b".repeat(200));
        let excerpt = excerpt_around_match(&content, "match").unwrap();
        assert!(excerpt.to_lowercase().contains("match"));
        assert!(excerpt.len() <= 200);
    }

    #[test]
    fn no_match_returns_none() {
        assert!(excerpt_around_match("hello world", "xyz").is_none());
    }
}
