//! Librarian findings store: one JSON file per run under `librarian/`.

use crate::atomic::{read_json, write_json};
use loomquill_core::types::LibrarianFinding;
use loomquill_core::{Result, StoryId};
use std::path::PathBuf;

pub struct LibrarianFindingStore {
    data_dir: PathBuf,
}

impl LibrarianFindingStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    fn dir(&self, story_id: &StoryId) -> PathBuf {
        self.data_dir.join("stories").join(story_id.as_str()).join("content").join("librarian")
    }

    fn path(&self, story_id: &StoryId, id: &str) -> PathBuf {
        self.dir(story_id).join(format!("{}.json", id))
    }

    pub async fn save(&self, finding: &LibrarianFinding) -> Result<()> {
        write_json(&self.path(&finding.story_id, &finding.id), finding).await
    }

    /// Newest-first; there is no separate index, per spec.md's `librarian/*.json` layout.
    pub async fn list(&self, story_id: &StoryId) -> Vec<LibrarianFinding> {
        let mut findings = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(self.dir(story_id)).await else {
            return findings;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(finding) = read_json::<LibrarianFinding>(&path).await {
                findings.push(finding);
            }
        }
        findings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomquill_core::types::KnowledgeSuggestion;

    fn finding(id: &str, story_id: &StoryId, created_at: chrono::DateTime<chrono::Utc>) -> LibrarianFinding {
        LibrarianFinding {
            id: id.to_string(),
            story_id: story_id.clone(),
            fragment_id: None,
            created_at,
            mentions: vec!["Alice".to_string()],
            contradictions: Vec::new(),
            timeline_events: Vec::new(),
            knowledge_suggestions: vec![KnowledgeSuggestion { name: "n".to_string(), description: "d".to_string(), content: "c".to_string() }],
            knowledge_suggestions_applied: false,
        }
    }

    #[tokio::test]
    async fn save_then_list_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = LibrarianFindingStore::new(dir.path());
        let story_id = StoryId::new("s1");
        let t0 = chrono::Utc::now();

        store.save(&finding("f1", &story_id, t0)).await.unwrap();
        store.save(&finding("f2", &story_id, t0 + chrono::Duration::seconds(1))).await.unwrap();

        let findings = store.list(&story_id).await;
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].id, "f2");
        assert_eq!(findings[1].id, "f1");
    }

    #[tokio::test]
    async fn missing_dir_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LibrarianFindingStore::new(dir.path());
        assert!(store.list(&StoryId::new("s1")).await.is_empty());
    }
}
