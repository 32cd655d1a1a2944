//! Shared types, ids, error taxonomy, and ambient config for loomquill.

pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use config::LoomquillConfig;
pub use error::{Error, Result};
pub use ids::{generate_fragment_id, FragmentId, FragmentTypeRegistry, StoryId};
