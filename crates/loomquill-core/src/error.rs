//! Error taxonomy shared across the workspace.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("unknown instruction: {0}")]
    UnknownInstruction(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent timed out after {0}ms")]
    AgentTimeout(u64),

    #[error("agent cycle detected: {0}")]
    AgentCycle(String),

    #[error("agent depth exceeded: max {0}")]
    AgentDepthExceeded(usize),

    #[error("agent call limit exceeded: max {0}")]
    AgentCallLimitExceeded(usize),

    #[error("tool error: {name} - {message}")]
    ToolError { name: String, message: String },

    #[error("stream aborted: {0}")]
    StreamAborted(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("script error in \"{name}\": {message}")]
    ScriptError { name: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn tool_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolError { name: name.into(), message: message.into() }
    }

    pub fn script_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScriptError { name: name.into(), message: message.into() }
    }

    /// Whether this kind should be reported to HTTP callers as 4xx (vs 5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::ValidationError(_)
                | Error::UnknownInstruction(_)
                | Error::UnknownAgent(_)
        )
    }
}
