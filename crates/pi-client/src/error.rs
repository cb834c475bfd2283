//! Agent client error types.

use thiserror::Error;

/// Errors surfaced by the agent client.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("pi executable not found; set PI_BIN or install pi on PATH")]
    NotFound,

    #[error("failed to spawn pi: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("agent exited before responding")]
    AgentDown,

    #[error("agent command failed: {0}")]
    Command(String),

    #[error("request canceled")]
    Canceled,
}

/// Client result type.
pub type Result<T> = std::result::Result<T, AgentError>;
