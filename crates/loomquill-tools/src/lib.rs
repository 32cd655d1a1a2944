//! Fragment-facing Tool Registry exposed to the writer and librarian agents.

pub mod registry;
pub mod tools;

pub use registry::{Tool, ToolRegistry, ToolResult};
pub use tools::*;

use loomquill_core::StoryId;
use loomquill_store::FragmentStore;
use std::sync::Arc;

/// Capitalizes the first character of a fragment type name for alias
/// construction (`"character"` → `"Character"`).
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Assembles the full tool registry for a story: read tools unconditionally,
/// write tools unless `read_only`, plus a `get{Type}`/`list{Type}s` alias pair
/// for every fragment type currently observed in the story.
pub async fn create_registry(store: Arc<FragmentStore>, story_id: StoryId, read_only: bool) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(GetFragmentTool::new(store.clone(), story_id.clone()));
    registry.register(ListFragmentsTool::new(store.clone(), story_id.clone()));
    registry.register(SearchFragmentsTool::new(store.clone(), story_id.clone()));
    registry.register(ListFragmentTypesTool::new(store.clone(), story_id.clone()));

    if !read_only {
        registry.register(CreateFragmentTool::new(store.clone(), story_id.clone()));
        registry.register(UpdateFragmentTool::new(store.clone(), story_id.clone()));
        registry.register(EditFragmentTool::new(store.clone(), story_id.clone()));
        registry.register(EditProseTool::new(store.clone(), story_id.clone()));
        registry.register(DeleteFragmentTool::new(store.clone(), story_id.clone()));
    }

    let summaries = store.list_summaries(&story_id, None, true).await;
    let mut types: Vec<String> = summaries.into_iter().map(|s| s.fragment_type).collect();
    types.sort();
    types.dedup();

    for fragment_type in types {
        let capitalized = capitalize(&fragment_type);
        let get_alias = format!("get{}", capitalized);
        let list_alias = format!("list{}s", capitalized);
        registry.register(GetFragmentTool::for_type(store.clone(), story_id.clone(), &fragment_type, &get_alias));
        registry.register(ListFragmentsTool::for_type(store.clone(), story_id.clone(), &fragment_type, &list_alias));
    }

    registry
}
