//! Error types for the fleet state store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Failures of the store itself. Absent records are `Ok(None)` or
/// `Ok(false)` from the lookup, not errors.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    /// A record could not be encoded as JSON.
    #[error("serialization error: {0}")]
    Serialize(String),

    /// A stored value no longer matches its record type.
    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// A credential bundle was requested for a cluster with no record.
    #[error("no registered cluster {0}")]
    UnknownCluster(String),

    /// The on-disk copy of a credential bundle could not be written.
    #[error("credential bundle {}: {reason}", path.display())]
    Bundle { path: PathBuf, reason: String },
}

impl StateError {
    pub(crate) fn bundle(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |e| StateError::Bundle {
            path,
            reason: e.to_string(),
        }
    }
}
