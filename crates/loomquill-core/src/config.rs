//! Ambient process configuration, TOML-loadable with a safe default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level process config, loaded from `--config` (or defaulted) and
/// overridable by a handful of environment variables for secrets.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomquillConfig {
    pub bind_addr: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub llm: LlmConfig,
    pub librarian: LibrarianConfig,
}

impl Default for LoomquillConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 4173,
            data_dir: PathBuf::from("./data"),
            llm: LlmConfig::default(),
            librarian: LibrarianConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            default_model: "claude-sonnet-4-5".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarianConfig {
    pub debounce_ms: u64,
    pub active_agent_ttl_secs: u64,
}

impl Default for LibrarianConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            active_agent_ttl_secs: 600,
        }
    }
}

impl LoomquillConfig {
    /// Load from a TOML file, falling back to defaults (with a warning) if
    /// the file is missing or fails to parse. `ANTHROPIC_API_KEY` overrides
    /// the corresponding field when set.
    pub fn load(path: Option<&std::path::Path>) -> Self {
        let mut cfg = match path {
            Some(p) => match std::fs::read_to_string(p) {
                Ok(text) => match toml::from_str::<Self>(&text) {
                    Ok(cfg) => cfg,
                    Err(err) => {
                        tracing::warn!(path = %p.display(), error = %err, "failed to parse config, using defaults");
                        Self::default()
                    }
                },
                Err(err) => {
                    tracing::warn!(path = %p.display(), error = %err, "failed to read config, using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            cfg.llm.api_key = key;
        }
        cfg
    }
}
