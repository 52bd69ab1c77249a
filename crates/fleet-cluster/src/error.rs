//! Error taxonomy for control-plane workflows.

use thiserror::Error;

use fleet_state::StateError;
use fleet_tools::ToolError;

/// Result type alias for control-plane operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Broad class of a failure, used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum ControlError {
    /// Malformed input. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// The caller lacks the required group or admin relationship.
    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    /// A remote tool failed or produced unusable output.
    #[error("{0}")]
    Infrastructure(String),

    #[error("store failure: {0}")]
    Store(#[from] StateError),

    #[error("tool failure: {0}")]
    Tool(#[from] ToolError),
}

impl ControlError {
    /// The standard refusal for unauthenticated or unauthorized callers.
    pub fn not_authorized() -> Self {
        ControlError::Authorization("Not authorized".to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::Validation(_) => ErrorKind::Validation,
            ControlError::Authorization(_) => ErrorKind::Authorization,
            ControlError::NotFound(_) => ErrorKind::NotFound,
            ControlError::Infrastructure(_) | ControlError::Store(_) | ControlError::Tool(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Message safe to hand to API callers. Store and tool internals are
    /// logged where they occur and replaced with a generic message here.
    pub fn public_message(&self) -> String {
        match self {
            ControlError::Store(_) => "Internal storage failure".to_string(),
            ControlError::Tool(_) => "Unable to run cluster tooling".to_string(),
            other => other.to_string(),
        }
    }
}
