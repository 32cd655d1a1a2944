//! Per-story block configuration store.

use crate::atomic::{read_json, write_json};
use loomquill_core::types::BlockConfig;
use loomquill_core::{Result, StoryId};
use std::path::PathBuf;

pub struct BlockConfigStore {
    data_dir: PathBuf,
}

impl BlockConfigStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    fn path(&self, story_id: &StoryId) -> PathBuf {
        self.data_dir.join("stories").join(story_id.as_str()).join("content").join("block-config.json")
    }

    /// Empty config if none has been saved yet.
    pub async fn get(&self, story_id: &StoryId) -> BlockConfig {
        read_json(&self.path(story_id)).await.unwrap_or_default()
    }

    pub async fn save(&self, story_id: &StoryId, config: &BlockConfig) -> Result<()> {
        write_json(&self.path(story_id), config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomquill_core::types::{CustomBlockDefinition, CustomBlockType, Role};

    #[tokio::test]
    async fn missing_config_defaults_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockConfigStore::new(dir.path());
        let config = store.get(&StoryId::new("s1")).await;
        assert!(config.custom_blocks.is_empty());
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockConfigStore::new(dir.path());
        let story_id = StoryId::new("s1");
        let mut config = BlockConfig::default();
        config.custom_blocks.push(CustomBlockDefinition {
            id: "cb-1".to_string(),
            name: "Tone".to_string(),
            role: Role::System,
            order: 0,
            enabled: true,
            block_type: CustomBlockType::Simple,
            content: "Write in present tense.".to_string(),
        });
        store.save(&story_id, &config).await.unwrap();

        let reread = store.get(&story_id).await;
        assert_eq!(reread.custom_blocks.len(), 1);
        assert_eq!(reread.custom_blocks[0].name, "Tone");
    }
}
