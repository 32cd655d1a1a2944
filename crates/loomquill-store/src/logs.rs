//! Generation log store: one JSON file per log plus a newest-first `_index.json`.

use crate::atomic::{read_json, write_json};
use dashmap::DashMap;
use loomquill_core::types::{GenerationLog, GenerationLogSummary};
use loomquill_core::{Error, Result, StoryId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct GenerationLogStore {
    data_dir: PathBuf,
    /// One append lock per story so `_index.json` writes never race.
    locks: DashMap<StoryId, Arc<Mutex<()>>>,
}

impl GenerationLogStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), locks: DashMap::new() }
    }

    fn logs_dir(&self, story_id: &StoryId) -> PathBuf {
        self.data_dir.join("stories").join(story_id.as_str()).join("content").join("generation-logs")
    }

    fn log_path(&self, story_id: &StoryId, id: &str) -> PathBuf {
        self.logs_dir(story_id).join(format!("{}.json", id))
    }

    fn index_path(&self, story_id: &StoryId) -> PathBuf {
        self.logs_dir(story_id).join("_index.json")
    }

    fn lock_for(&self, story_id: &StoryId) -> Arc<Mutex<()>> {
        self.locks.entry(story_id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Persist a log and prepend its summary to the story's index.
    pub async fn save(&self, story_id: &StoryId, log: &GenerationLog) -> Result<()> {
        write_json(&self.log_path(story_id, &log.id), log).await?;

        let lock = self.lock_for(story_id);
        let _guard = lock.lock().await;
        let mut index: Vec<GenerationLogSummary> = read_json(&self.index_path(story_id)).await.unwrap_or_default();
        index.insert(0, GenerationLogSummary::from(log));
        write_json(&self.index_path(story_id), &index).await?;
        Ok(())
    }

    pub async fn get(&self, story_id: &StoryId, id: &str) -> Option<GenerationLog> {
        read_json(&self.log_path(story_id, id)).await
    }

    /// Newest-first, as persisted in `_index.json`.
    pub async fn list_summaries(&self, story_id: &StoryId) -> Vec<GenerationLogSummary> {
        read_json(&self.index_path(story_id)).await.unwrap_or_default()
    }

    pub async fn get_or_err(&self, story_id: &StoryId, id: &str) -> Result<GenerationLog> {
        self.get(story_id, id).await.ok_or_else(|| Error::not_found(format!("generation log {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomquill_core::types::{GenerationMode, LoggedMessage, Role};

    fn sample_log(id: &str, created_at: chrono::DateTime<chrono::Utc>) -> GenerationLog {
        GenerationLog {
            id: id.to_string(),
            created_at,
            mode: GenerationMode::Generate,
            input: "continue".to_string(),
            messages: vec![LoggedMessage { role: Role::User, content: "continue".to_string() }],
            tool_calls: Vec::new(),
            generated_text: "text".to_string(),
            fragment_id: None,
            model: "claude-sonnet-4-5".to_string(),
            duration_ms: 10,
            step_count: 1,
            finish_reason: "stop".to_string(),
            steps_exceeded: false,
            total_usage: None,
            reasoning: None,
        }
    }

    #[tokio::test]
    async fn save_then_list_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = GenerationLogStore::new(dir.path());
        let story_id = StoryId::new("s1");
        let t0 = chrono::Utc::now();

        store.save(&story_id, &sample_log("g1", t0)).await.unwrap();
        store.save(&story_id, &sample_log("g2", t0 + chrono::Duration::seconds(1))).await.unwrap();

        let summaries = store.list_summaries(&story_id).await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, "g2");
        assert_eq!(summaries[1].id, "g1");
    }

    #[tokio::test]
    async fn get_round_trips_full_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = GenerationLogStore::new(dir.path());
        let story_id = StoryId::new("s1");
        store.save(&story_id, &sample_log("g1", chrono::Utc::now())).await.unwrap();

        let log = store.get_or_err(&story_id, "g1").await.unwrap();
        assert_eq!(log.generated_text, "text");
    }
}
