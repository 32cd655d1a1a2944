pub mod create_fragment;
pub mod delete_fragment;
pub mod edit_fragment;
pub mod edit_prose;
pub mod get_fragment;
pub mod list_fragment_types;
pub mod list_fragments;
pub mod search_fragments;
pub mod update_fragment;

pub use create_fragment::CreateFragmentTool;
pub use delete_fragment::DeleteFragmentTool;
pub use edit_fragment::EditFragmentTool;
pub use edit_prose::EditProseTool;
pub use get_fragment::GetFragmentTool;
pub use list_fragment_types::ListFragmentTypesTool;
pub use list_fragments::ListFragmentsTool;
pub use search_fragments::SearchFragmentsTool;
pub use update_fragment::UpdateFragmentTool;
