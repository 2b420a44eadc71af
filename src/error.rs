use std::time::Duration;

use serde::Serialize;

use crate::models::command::ToolKind;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    General(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE",
            Self::Io(_) => "IO",
            Self::Serde(_) | Self::Toml(_) => "PARSE",
            Self::Config(_) => "CONFIG",
            Self::Engine(EngineError::Transport(_)) => "TRANSPORT",
            Self::Engine(_) => "ENGINE",
            Self::General(_) => "GENERAL",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Failure taxonomy of the execution engine. These are aggregated into the
/// job result as strings; none of them escapes the job tracker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("unknown action kind: {0}")]
    UnknownActionKind(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{tool} rejected: {message}")]
    RemoteRejection { tool: ToolKind, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("cannot reach scene service at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// True when the service could not be contacted at all, as opposed to a
    /// request that reached it and went wrong.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}
