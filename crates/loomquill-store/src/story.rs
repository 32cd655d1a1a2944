//! Story metadata store: one `meta.json` per story.

use crate::atomic::{read_json, write_json};
use loomquill_core::types::Story;
use loomquill_core::{Error, Result, StoryId};
use std::path::PathBuf;

pub struct StoryStore {
    data_dir: PathBuf,
}

impl StoryStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    fn meta_path(&self, story_id: &StoryId) -> PathBuf {
        self.data_dir.join("stories").join(story_id.as_str()).join("meta.json")
    }

    pub async fn create(&self, id: StoryId, name: impl Into<String>, description: impl Into<String>) -> Result<Story> {
        let story = Story {
            id,
            name: name.into(),
            description: description.into(),
            summary: String::new(),
            created_at: chrono::Utc::now(),
            settings: Default::default(),
        };
        write_json(&self.meta_path(&story.id), &story).await?;
        Ok(story)
    }

    pub async fn get(&self, story_id: &StoryId) -> Option<Story> {
        read_json(&self.meta_path(story_id)).await
    }

    pub async fn save(&self, story: &Story) -> Result<()> {
        write_json(&self.meta_path(&story.id), story).await
    }

    /// Append `text` to the story's rolling summary, truncating the front to
    /// keep the summary under `max_bytes` (per spec.md §4.I's "append-then-
    /// truncate if length budget exceeded").
    pub async fn append_summary(&self, story_id: &StoryId, text: &str, max_bytes: usize) -> Result<Story> {
        let mut story = self.get(story_id).await.ok_or_else(|| Error::not_found(format!("story {}", story_id)))?;
        if !story.summary.is_empty() {
            story.summary.push('\n');
        }
        story.summary.push_str(text);
        if story.summary.len() > max_bytes {
            let cut = story.summary.len() - max_bytes;
            let boundary = story.summary[cut..].find('\n').map(|i| cut + i + 1).unwrap_or(cut);
            story.summary = story.summary[boundary..].to_string();
        }
        self.save(&story).await?;
        Ok(story)
    }

    pub async fn list(&self) -> Vec<Story> {
        let stories_dir = self.data_dir.join("stories");
        let mut stories = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&stories_dir).await else {
            return stories;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(file_type) = entry.file_type().await {
                if !file_type.is_dir() {
                    continue;
                }
            }
            let meta = entry.path().join("meta.json");
            if let Some(story) = read_json::<Story>(&meta).await {
                stories.push(story);
            }
        }
        stories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoryStore::new(dir.path());
        let story = store.create(StoryId::new("s1"), "My Story", "d").await.unwrap();
        let reread = store.get(&story.id).await.unwrap();
        assert_eq!(reread.name, "My Story");
    }

    #[tokio::test]
    async fn append_summary_truncates_to_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoryStore::new(dir.path());
        let story = store.create(StoryId::new("s1"), "My Story", "d").await.unwrap();
        store.append_summary(&story.id, "a".repeat(40).as_str(), 20).await.unwrap();
        let updated = store.append_summary(&story.id, "b".repeat(10).as_str(), 20).await.unwrap();
        assert!(updated.summary.len() <= 20);
        assert!(updated.summary.ends_with(&"b".repeat(10)));
    }
}
