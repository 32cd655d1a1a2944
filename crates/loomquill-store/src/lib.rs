//! Persistent storage: fragments, story metadata, generation logs, block
//! config, librarian findings.

pub mod atomic;
pub mod block_config;
pub mod fragments;
pub mod librarian;
pub mod logs;
pub mod story;

pub use block_config::BlockConfigStore;
pub use fragments::{FragmentPatch, FragmentStore, FragmentSummary, VersionedPatch};
pub use librarian::LibrarianFindingStore;
pub use logs::GenerationLogStore;
pub use story::StoryStore;
