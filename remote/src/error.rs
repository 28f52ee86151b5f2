use std::io;

use opal_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to remote node failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The remote node answered with something other than 200.
    #[error("remote node returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unknown procedure: {name}")]
    UnknownProcedure { name: String },
    #[error("procedure already registered: {name}")]
    DuplicateProcedure { name: String },
    /// A parameter is missing, has the wrong kind, or does not decode.
    #[error("parameter {name}: {message}")]
    Binding { name: String, message: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RemoteError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn binding(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Binding {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Whether the failure is the caller's fault (HTTP 400) rather than the node's.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::UnknownProcedure { .. } | Self::Binding { .. }
        )
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
