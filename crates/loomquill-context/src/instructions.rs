//! Instruction Registry: default instruction text with model-matched overrides.

use loomquill_core::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
enum ModelMatch {
    Exact(String),
    Regex(regex::Regex),
}

impl ModelMatch {
    fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix('/') {
            if let Some(last_slash) = rest.rfind('/') {
                let pattern = &rest[..last_slash];
                let flags = &rest[last_slash + 1..];
                let mut builder = regex::RegexBuilder::new(pattern);
                if flags.contains('i') {
                    builder.case_insensitive(true);
                }
                if let Ok(re) = builder.build() {
                    return ModelMatch::Regex(re);
                }
                tracing::warn!(pattern, "invalid modelMatch regex, falling back to exact match");
            }
        }
        ModelMatch::Exact(raw.to_string())
    }

    fn matches(&self, model: &str) -> bool {
        match self {
            ModelMatch::Exact(s) => s == model,
            ModelMatch::Regex(re) => re.is_match(model),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstructionSetFile {
    #[allow(dead_code)]
    name: String,
    #[serde(rename = "modelMatch")]
    model_match: String,
    #[serde(default = "default_priority")]
    priority: u32,
    instructions: HashMap<String, String>,
}

fn default_priority() -> u32 {
    100
}

struct InstructionOverrideSet {
    model_match: ModelMatch,
    priority: u32,
    instructions: HashMap<String, String>,
}

pub struct InstructionRegistry {
    dir: PathBuf,
    defaults: HashMap<String, String>,
    overrides: RwLock<Vec<InstructionOverrideSet>>,
}

impl InstructionRegistry {
    pub fn new(dir: impl Into<PathBuf>, defaults: HashMap<String, String>) -> Self {
        Self { dir: dir.into(), defaults, overrides: RwLock::new(Vec::new()) }
    }

    /// Scan `instruction-sets/*.json`, replacing any previously loaded overrides.
    /// Malformed files are logged and skipped.
    pub async fn reload(&self) {
        let mut loaded = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            *self.overrides.write().await = loaded;
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_one(&path).await {
                Ok(set) => loaded.push(set),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping malformed instruction set"),
            }
        }
        loaded.sort_by_key(|s| s.priority);
        *self.overrides.write().await = loaded;
    }

    /// Resolve `key` for `model`. Overrides are scanned in ascending priority;
    /// the first match that defines `key` wins, otherwise the default.
    pub async fn resolve(&self, key: &str, model: &str) -> Result<String> {
        if !self.defaults.contains_key(key) {
            return Err(Error::UnknownInstruction(key.to_string()));
        }
        let overrides = self.overrides.read().await;
        for set in overrides.iter() {
            if set.model_match.matches(model) {
                if let Some(text) = set.instructions.get(key) {
                    return Ok(text.clone());
                }
            }
        }
        Ok(self.defaults[key].clone())
    }
}

async fn load_one(path: &Path) -> std::result::Result<InstructionOverrideSet, String> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| e.to_string())?;
    let file: InstructionSetFile = serde_json::from_str(&text).map_err(|e| e.to_string())?;
    Ok(InstructionOverrideSet {
        model_match: ModelMatch::parse(&file.model_match),
        priority: file.priority,
        instructions: file.instructions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("writing".to_string(), "default writing instructions".to_string());
        m
    }

    #[tokio::test]
    async fn unknown_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstructionRegistry::new(dir.path(), defaults());
        let err = registry.resolve("nope", "claude-sonnet-4-5").await.unwrap_err();
        assert!(matches!(err, Error::UnknownInstruction(_)));
    }

    #[tokio::test]
    async fn no_overrides_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstructionRegistry::new(dir.path(), defaults());
        registry.reload().await;
        let text = registry.resolve("writing", "claude-sonnet-4-5").await.unwrap();
        assert_eq!(text, "default writing instructions");
    }

    #[tokio::test]
    async fn regex_model_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("set.json"),
            r#"{"name":"s","modelMatch":"/foo-.*/i","priority":50,"instructions":{"writing":"override text"}}"#,
        )
        .await
        .unwrap();
        let registry = InstructionRegistry::new(dir.path(), defaults());
        registry.reload().await;

        assert_eq!(registry.resolve("writing", "foo-x").await.unwrap(), "override text");
        assert_eq!(registry.resolve("writing", "FOO-Y").await.unwrap(), "override text");
        assert_eq!(registry.resolve("writing", "bar").await.unwrap(), "default writing instructions");
    }

    #[tokio::test]
    async fn malformed_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bad.json"), "not json").await.unwrap();
        let registry = InstructionRegistry::new(dir.path(), defaults());
        registry.reload().await;
        let text = registry.resolve("writing", "any-model").await.unwrap();
        assert_eq!(text, "default writing instructions");
    }

    #[tokio::test]
    async fn lowest_priority_wins_when_multiple_match() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("a.json"),
            r#"{"name":"a","modelMatch":"claude-sonnet-4-5","priority":10,"instructions":{"writing":"from a"}}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("b.json"),
            r#"{"name":"b","modelMatch":"claude-sonnet-4-5","priority":5,"instructions":{"writing":"from b"}}"#,
        )
        .await
        .unwrap();
        let registry = InstructionRegistry::new(dir.path(), defaults());
        registry.reload().await;
        assert_eq!(registry.resolve("writing", "claude-sonnet-4-5").await.unwrap(), "from b");
    }
}
