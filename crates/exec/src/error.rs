use thiserror::Error;

use forkstress_core::CoreError;
use forkstress_link::LinkError;

/// Errors raised by the executor itself, as opposed to job failures, which
/// always travel as results.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("link server failed to start: {0}")]
    LinkStartup(#[source] LinkError),

    #[error("protocol violation by {token}: {reason}")]
    ProtocolViolation { token: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ExecError {
    pub fn violation(token: &str, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            token: token.to_string(),
            reason: reason.into(),
        }
    }
}
