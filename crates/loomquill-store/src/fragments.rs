//! Fragment Store: one JSON file per fragment, plus a summary index.

use crate::atomic::{read_json, write_json};
use dashmap::DashMap;
use loomquill_core::types::{Fragment, FragmentSnapshot, Placement};
use loomquill_core::{generate_fragment_id, Error, FragmentId, FragmentTypeRegistry, Result, StoryId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FragmentSummary {
    pub id: FragmentId,
    #[serde(rename = "type")]
    pub fragment_type: String,
    pub name: String,
    pub description: String,
    pub archived: bool,
    pub order: i64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Fragment> for FragmentSummary {
    fn from(f: &Fragment) -> Self {
        Self {
            id: f.id.clone(),
            fragment_type: f.fragment_type.clone(),
            name: f.name.clone(),
            description: f.description.clone(),
            archived: f.archived,
            order: f.order,
            updated_at: f.updated_at,
        }
    }
}

#[derive(Default)]
struct StoryIndex {
    summaries: HashMap<FragmentId, FragmentSummary>,
}

/// Fields settable by plain (non-versioned) updates.
#[derive(Default)]
pub struct FragmentPatch {
    pub sticky: Option<bool>,
    pub placement: Option<Placement>,
    pub order: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub meta: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Fields that participate in versioning when changed.
#[derive(Default)]
pub struct VersionedPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
}

pub struct FragmentStore {
    data_dir: PathBuf,
    cache: DashMap<StoryId, Arc<RwLock<StoryIndex>>>,
    types: Mutex<FragmentTypeRegistry>,
}

impl FragmentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: DashMap::new(),
            types: Mutex::new(FragmentTypeRegistry::new()),
        }
    }

    /// Remove all cached state. Exposed for tests per spec.md §9.
    pub fn clear(&self) {
        self.cache.clear();
    }

    fn fragments_dir(&self, story_id: &StoryId) -> PathBuf {
        self.data_dir.join("stories").join(story_id.as_str()).join("content").join("fragments")
    }

    fn fragment_path(&self, story_id: &StoryId, id: &FragmentId) -> PathBuf {
        self.fragments_dir(story_id).join(format!("{}.json", id.as_str()))
    }

    fn index_path(&self, story_id: &StoryId) -> PathBuf {
        self.fragments_dir(story_id).join("_index.json")
    }

    async fn index_for(&self, story_id: &StoryId) -> Arc<RwLock<StoryIndex>> {
        if let Some(existing) = self.cache.get(story_id) {
            return existing.clone();
        }
        let index = self.rebuild_index(story_id).await;
        let arc = Arc::new(RwLock::new(index));
        self.cache.insert(story_id.clone(), arc.clone());
        arc
    }

    /// Loads `_index.json` from disk if present; otherwise rebuilds by
    /// scanning the fragments directory and persists the result, same
    /// degrade-then-heal strategy as the generation log store.
    async fn rebuild_index(&self, story_id: &StoryId) -> StoryIndex {
        if let Some(list) = read_json::<Vec<FragmentSummary>>(&self.index_path(story_id)).await {
            let summaries = list.into_iter().map(|s| (s.id.clone(), s)).collect();
            return StoryIndex { summaries };
        }

        let dir = self.fragments_dir(story_id);
        let mut summaries = HashMap::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if path.file_name().and_then(|n| n.to_str()) == Some("_index.json") {
                    continue;
                }
                if let Some(fragment) = read_json::<Fragment>(&path).await {
                    summaries.insert(fragment.id.clone(), FragmentSummary::from(&fragment));
                }
            }
        }
        let index = StoryIndex { summaries };
        if let Err(e) = self.write_index_to_disk(story_id, &index).await {
            tracing::warn!(error = %e, story_id = %story_id, "failed to persist rebuilt fragment index");
        }
        index
    }

    async fn write_index_to_disk(&self, story_id: &StoryId, index: &StoryIndex) -> Result<()> {
        let mut list: Vec<&FragmentSummary> = index.summaries.values().collect();
        list.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        write_json(&self.index_path(story_id), &list).await
    }

    pub async fn create(
        &self,
        story_id: &StoryId,
        fragment_type: &str,
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
        placement: Placement,
        sticky: bool,
    ) -> Result<Fragment> {
        let prefix = self.types.lock().unwrap().prefix_for(fragment_type);
        let id = generate_fragment_id(&prefix);
        let now = chrono::Utc::now();
        let fragment = Fragment {
            id: id.clone(),
            fragment_type: fragment_type.to_string(),
            name: name.into(),
            description: description.into(),
            content: content.into(),
            sticky,
            placement,
            archived: false,
            order: 0,
            tags: Vec::new(),
            meta: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            version: 1,
            versions: Vec::new(),
        };
        self.persist(story_id, &fragment).await?;
        Ok(fragment)
    }

    pub async fn get(&self, story_id: &StoryId, id: &FragmentId) -> Option<Fragment> {
        read_json(&self.fragment_path(story_id, id)).await
    }

    async fn persist(&self, story_id: &StoryId, fragment: &Fragment) -> Result<()> {
        write_json(&self.fragment_path(story_id, &fragment.id), fragment).await?;
        let index = self.index_for(story_id).await;
        let mut guard = index.write().await;
        guard.summaries.insert(fragment.id.clone(), FragmentSummary::from(fragment));
        self.write_index_to_disk(story_id, &guard).await?;
        Ok(())
    }

    pub async fn update(&self, story_id: &StoryId, id: &FragmentId, patch: FragmentPatch) -> Result<Fragment> {
        let mut fragment = self
            .get(story_id, id)
            .await
            .ok_or_else(|| Error::not_found(format!("fragment {}", id)))?;
        if let Some(sticky) = patch.sticky {
            fragment.sticky = sticky;
        }
        if let Some(placement) = patch.placement {
            fragment.placement = placement;
        }
        if let Some(order) = patch.order {
            fragment.order = order;
        }
        if let Some(tags) = patch.tags {
            fragment.tags = tags;
        }
        if let Some(meta) = patch.meta {
            fragment.meta = meta;
        }
        fragment.updated_at = chrono::Utc::now();
        self.persist(story_id, &fragment).await?;
        Ok(fragment)
    }

    /// Apply a name/description/content change. If any of the three differ
    /// from the current value, appends a snapshot of the previous state and
    /// increments `version` exactly once.
    pub async fn update_versioned(
        &self,
        story_id: &StoryId,
        id: &FragmentId,
        patch: VersionedPatch,
    ) -> Result<Fragment> {
        let mut fragment = self
            .get(story_id, id)
            .await
            .ok_or_else(|| Error::not_found(format!("fragment {}", id)))?;

        let name_changed = patch.name.as_ref().is_some_and(|n| n != &fragment.name);
        let description_changed = patch.description.as_ref().is_some_and(|d| d != &fragment.description);
        let content_changed = patch.content.as_ref().is_some_and(|c| c != &fragment.content);

        if name_changed || description_changed || content_changed {
            fragment.versions.push(FragmentSnapshot {
                version: fragment.version,
                name: fragment.name.clone(),
                description: fragment.description.clone(),
                content: fragment.content.clone(),
                snapshot_at: chrono::Utc::now(),
            });
            fragment.version += 1;
        }
        if let Some(name) = patch.name {
            fragment.name = name;
        }
        if let Some(description) = patch.description {
            fragment.description = description;
        }
        if let Some(content) = patch.content {
            fragment.content = content;
        }
        fragment.updated_at = chrono::Utc::now();
        self.persist(story_id, &fragment).await?;
        Ok(fragment)
    }

    pub async fn archive(&self, story_id: &StoryId, id: &FragmentId) -> Result<Fragment> {
        let mut fragment = self
            .get(story_id, id)
            .await
            .ok_or_else(|| Error::not_found(format!("fragment {}", id)))?;
        fragment.archived = true;
        fragment.updated_at = chrono::Utc::now();
        self.persist(story_id, &fragment).await?;
        Ok(fragment)
    }

    pub async fn restore(&self, story_id: &StoryId, id: &FragmentId) -> Result<Fragment> {
        let mut fragment = self
            .get(story_id, id)
            .await
            .ok_or_else(|| Error::not_found(format!("fragment {}", id)))?;
        fragment.archived = false;
        fragment.updated_at = chrono::Utc::now();
        self.persist(story_id, &fragment).await?;
        Ok(fragment)
    }

    pub async fn delete(&self, story_id: &StoryId, id: &FragmentId) -> Result<()> {
        let path = self.fragment_path(story_id, id);
        tokio::fs::remove_file(&path).await.map_err(Error::Io)?;
        let index = self.index_for(story_id).await;
        let mut guard = index.write().await;
        guard.summaries.remove(id);
        self.write_index_to_disk(story_id, &guard).await?;
        Ok(())
    }

    pub async fn list_summaries(
        &self,
        story_id: &StoryId,
        fragment_type: Option<&str>,
        include_archived: bool,
    ) -> Vec<FragmentSummary> {
        let index = self.index_for(story_id).await;
        let guard = index.read().await;
        let mut summaries: Vec<FragmentSummary> = guard
            .summaries
            .values()
            .filter(|s| include_archived || !s.archived)
            .filter(|s| fragment_type.map_or(true, |t| s.fragment_type == t))
            .cloned()
            .collect();
        summaries.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        summaries
    }

    pub async fn list_versions(&self, story_id: &StoryId, id: &FragmentId) -> Result<Vec<FragmentSnapshot>> {
        let fragment = self
            .get(story_id, id)
            .await
            .ok_or_else(|| Error::not_found(format!("fragment {}", id)))?;
        Ok(fragment.versions)
    }

    /// Revert to a prior version. `version` omitted reverts to the latest
    /// snapshot. Always appends a new snapshot recording the pre-revert state.
    pub async fn revert_to_version(
        &self,
        story_id: &StoryId,
        id: &FragmentId,
        version: Option<u32>,
    ) -> Result<Fragment> {
        let mut fragment = self
            .get(story_id, id)
            .await
            .ok_or_else(|| Error::not_found(format!("fragment {}", id)))?;

        let target = match version {
            Some(v) => fragment
                .versions
                .iter()
                .find(|s| s.version == v)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("version {} of fragment {}", v, id)))?,
            None => fragment
                .versions
                .last()
                .cloned()
                .ok_or_else(|| Error::validation(format!("fragment {} has no prior versions", id)))?,
        };

        fragment.versions.push(FragmentSnapshot {
            version: fragment.version,
            name: fragment.name.clone(),
            description: fragment.description.clone(),
            content: fragment.content.clone(),
            snapshot_at: chrono::Utc::now(),
        });
        fragment.version += 1;
        fragment.name = target.name;
        fragment.description = target.description;
        fragment.content = target.content;
        fragment.updated_at = chrono::Utc::now();
        self.persist(story_id, &fragment).await?;
        Ok(fragment)
    }

    /// `prefix_for` as seen by the store's type registry, for id display.
    pub fn prefix_for(&self, fragment_type: &str) -> String {
        self.types.lock().unwrap().prefix_for(fragment_type)
    }
}

pub fn fragment_summary_shortlist(s: &FragmentSummary) -> String {
    format!("{}: {} — {}", s.id, s.name, s.description)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story() -> StoryId {
        StoryId::new("s1")
    }

    #[tokio::test]
    async fn create_assigns_prefix_and_version_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = FragmentStore::new(dir.path());
        let fragment = store
            .create(&story(), "character", "A", "d", "c", Placement::User, false)
            .await
            .unwrap();
        assert!(fragment.id.as_str().starts_with("ch-"));
        assert_eq!(fragment.version, 1);
        assert!(fragment.versions.is_empty());
    }

    #[tokio::test]
    async fn two_content_updates_reach_version_three() {
        let dir = tempfile::tempdir().unwrap();
        let store = FragmentStore::new(dir.path());
        let fragment = store
            .create(&story(), "prose", "P", "d", "first", Placement::User, false)
            .await
            .unwrap();

        store
            .update_versioned(&story(), &fragment.id, VersionedPatch { content: Some("second".into()), ..Default::default() })
            .await
            .unwrap();
        let final_fragment = store
            .update_versioned(&story(), &fragment.id, VersionedPatch { content: Some("third".into()), ..Default::default() })
            .await
            .unwrap();

        assert_eq!(final_fragment.version, 3);
        assert_eq!(final_fragment.versions.len(), 2);
        assert_eq!(final_fragment.versions[0].version, 1);
        assert_eq!(final_fragment.versions[1].version, 2);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FragmentStore::new(dir.path());
        let fragment = store
            .create(&story(), "knowledge", "K", "d", "c", Placement::User, true)
            .await
            .unwrap();
        let reread = store.get(&story(), &fragment.id).await.unwrap();
        assert_eq!(reread.id, fragment.id);
        assert_eq!(reread.content, "c");
    }

    #[tokio::test]
    async fn archived_fragments_excluded_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FragmentStore::new(dir.path());
        let fragment = store
            .create(&story(), "guideline", "G", "d", "c", Placement::System, false)
            .await
            .unwrap();
        store.archive(&story(), &fragment.id).await.unwrap();

        let visible = store.list_summaries(&story(), None, false).await;
        assert!(visible.is_empty());
        let all = store.list_summaries(&story(), None, true).await;
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn revert_without_version_uses_latest_snapshot_and_records_the_revert() {
        let dir = tempfile::tempdir().unwrap();
        let store = FragmentStore::new(dir.path());
        let fragment = store
            .create(&story(), "prose", "P", "d", "v1", Placement::User, false)
            .await
            .unwrap();
        store
            .update_versioned(&story(), &fragment.id, VersionedPatch { content: Some("v2".into()), ..Default::default() })
            .await
            .unwrap();

        let reverted = store.revert_to_version(&story(), &fragment.id, None).await.unwrap();
        assert_eq!(reverted.content, "v1");
        assert_eq!(reverted.version, 3);
        assert_eq!(reverted.versions.len(), 2);
    }

    #[tokio::test]
    async fn index_json_is_written_to_disk_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let store = FragmentStore::new(dir.path());
        store
            .create(&story(), "character", "A", "d", "c", Placement::User, false)
            .await
            .unwrap();
        let index_path = dir.path().join("stories").join("s1").join("content").join("fragments").join("_index.json");
        let raw: Vec<FragmentSummary> = read_json(&index_path).await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].name, "A");
    }

    #[tokio::test]
    async fn index_rebuilds_from_disk_after_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FragmentStore::new(dir.path());
        store
            .create(&story(), "character", "A", "d", "c", Placement::User, false)
            .await
            .unwrap();
        store.clear();
        let summaries = store.list_summaries(&story(), None, false).await;
        assert_eq!(summaries.len(), 1);
    }
}
