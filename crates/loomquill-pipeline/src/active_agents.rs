//! Active-Agent Registry (spec §4.J): in-memory list of running agents with
//! a TTL safety timer, for UI polling.

use dashmap::DashMap;
use loomquill_core::types::ActiveAgent;
use loomquill_core::StoryId;
use std::time::Duration;

struct Entry {
    agent: ActiveAgent,
    ttl_handle: tokio::task::JoinHandle<()>,
}

/// Populated as agents start and stop; every entry carries a TTL (default
/// 10 minutes) that removes it if `unregister` is never called.
pub struct ActiveAgentRegistry {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl ActiveAgentRegistry {
    pub fn new(ttl: Duration) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { entries: DashMap::new(), ttl })
    }

    /// Registers a running agent and returns its id. The caller must call
    /// `unregister` when the run finishes, or the TTL timer reclaims it.
    pub fn register(self: &std::sync::Arc<Self>, story_id: StoryId, agent_name: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let agent = ActiveAgent { id: id.clone(), story_id, agent_name: agent_name.into(), started_at: chrono::Utc::now() };

        let this = self.clone();
        let ttl_id = id.clone();
        let ttl_handle = tokio::spawn(async move {
            tokio::time::sleep(this.ttl).await;
            this.entries.remove(&ttl_id);
        });

        self.entries.insert(id.clone(), Entry { agent, ttl_handle });
        id
    }

    pub fn unregister(&self, id: &str) {
        if let Some((_, entry)) = self.entries.remove(id) {
            entry.ttl_handle.abort();
        }
    }

    /// Snapshot of current entries, optionally filtered to one story.
    pub fn list(&self, story_id: Option<&StoryId>) -> Vec<ActiveAgent> {
        self.entries
            .iter()
            .map(|kv| kv.value().agent.clone())
            .filter(|agent| story_id.map_or(true, |sid| &agent.story_id == sid))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_list_shows_entry() {
        let registry = ActiveAgentRegistry::new(Duration::from_secs(600));
        let story_id = StoryId::new("s1");
        let id = registry.register(story_id.clone(), "writer");

        let all = registry.list(None);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].agent_name, "writer");
    }

    #[tokio::test]
    async fn unregister_removes_entry() {
        let registry = ActiveAgentRegistry::new(Duration::from_secs(600));
        let id = registry.register(StoryId::new("s1"), "writer");
        registry.unregister(&id);
        assert!(registry.list(None).is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_story() {
        let registry = ActiveAgentRegistry::new(Duration::from_secs(600));
        registry.register(StoryId::new("s1"), "writer");
        registry.register(StoryId::new("s2"), "analyze");

        let s1_only = registry.list(Some(&StoryId::new("s1")));
        assert_eq!(s1_only.len(), 1);
        assert_eq!(s1_only[0].agent_name, "writer");
    }

    #[tokio::test]
    async fn ttl_expiry_auto_removes() {
        let registry = ActiveAgentRegistry::new(Duration::from_millis(20));
        registry.register(StoryId::new("s1"), "writer");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.list(None).is_empty());
    }
}
