//! Identifiers: story ids and fragment ids (`{prefix}-{4-8 lowercase alphanumerics}`).

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Story identifier — cheaply cloneable, used as the per-story directory name.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoryId(Arc<str>);

impl StoryId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StoryId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for StoryId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Fragment identifier: `{prefix}-{body}` where `prefix` is a 2-char type
/// code and `body` is 4-8 lowercase alphanumerics.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct FragmentId(String);

impl FragmentId {
    /// Construct without validation — used when reading ids already on disk.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 2-char type-code prefix, if the id is well-formed.
    pub fn prefix(&self) -> Option<&str> {
        self.0.split('-').next().filter(|p| p.len() == 2)
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const ID_BODY_LEN: usize = 6;

/// Generate a fresh fragment id for the given 2-char prefix.
pub fn generate_fragment_id(prefix: &str) -> FragmentId {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|b| b as char)
        .filter(|c| c.is_ascii_alphanumeric())
        .take(ID_BODY_LEN)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    FragmentId(format!("{}-{}", prefix, body))
}

/// Maps fragment type names to their 2-char id prefix. Builtin types get
/// fixed codes; unknown types get a deterministic code derived from the
/// type name the first time they're seen, and the mapping is remembered
/// for the lifetime of the registry.
#[derive(Debug, Default)]
pub struct FragmentTypeRegistry {
    prefixes: HashMap<String, String>,
    used: HashMap<String, String>,
}

impl FragmentTypeRegistry {
    pub fn new() -> Self {
        let mut prefixes = HashMap::new();
        prefixes.insert("prose".to_string(), "pr".to_string());
        prefixes.insert("character".to_string(), "ch".to_string());
        prefixes.insert("guideline".to_string(), "gl".to_string());
        prefixes.insert("knowledge".to_string(), "kn".to_string());
        let mut used = HashMap::new();
        for (ty, px) in &prefixes {
            used.insert(px.clone(), ty.clone());
        }
        Self { prefixes, used }
    }

    /// Resolve (and register if new) the 2-char prefix for a fragment type.
    pub fn prefix_for(&mut self, fragment_type: &str) -> String {
        if let Some(px) = self.prefixes.get(fragment_type) {
            return px.clone();
        }
        let px = self.allocate_prefix(fragment_type);
        self.prefixes.insert(fragment_type.to_string(), px.clone());
        self.used.insert(px.clone(), fragment_type.to_string());
        px
    }

    pub fn type_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.used.get(prefix).map(|s| s.as_str())
    }

    fn allocate_prefix(&self, fragment_type: &str) -> String {
        let lower: Vec<char> = fragment_type
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let base: String = if lower.len() >= 2 {
            lower[..2].iter().collect()
        } else if lower.len() == 1 {
            format!("{}x", lower[0])
        } else {
            "xx".to_string()
        };
        if !self.used.contains_key(&base) {
            return base;
        }
        // Disambiguate by trying the type's later characters, then digits.
        for c in lower.iter().skip(2) {
            let candidate = format!("{}{}", &base[..1], c);
            if !self.used.contains_key(&candidate) {
                return candidate;
            }
        }
        for digit in 0..10 {
            let candidate = format!("{}{}", &base[..1], digit);
            if !self.used.contains_key(&candidate) {
                return candidate;
            }
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_prefixes() {
        let mut reg = FragmentTypeRegistry::new();
        assert_eq!(reg.prefix_for("character"), "ch");
        assert_eq!(reg.prefix_for("prose"), "pr");
        assert_eq!(reg.prefix_for("guideline"), "gl");
        assert_eq!(reg.prefix_for("knowledge"), "kn");
    }

    #[test]
    fn unknown_type_gets_deterministic_prefix() {
        let mut reg = FragmentTypeRegistry::new();
        let px = reg.prefix_for("location");
        assert_eq!(px, "lo");
        // Idempotent on re-query.
        assert_eq!(reg.prefix_for("location"), "lo");
    }

    #[test]
    fn generated_ids_match_shape() {
        let id = generate_fragment_id("ch");
        assert!(id.as_str().starts_with("ch-"));
        assert_eq!(id.prefix(), Some("ch"));
        let body = &id.as_str()[3..];
        assert_eq!(body.len(), 6);
        assert!(body.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
