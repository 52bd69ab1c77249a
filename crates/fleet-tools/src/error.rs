//! Error types for the cluster tool invoker.

use thiserror::Error;

/// Result type alias for tool invocations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Failures to run a tool at all. A tool that runs and exits non-zero is
/// not an error at this layer.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {tool}: {reason}")]
    Spawn { tool: String, reason: String },

    #[error("failed to write input to {tool}: {reason}")]
    Input { tool: String, reason: String },
}
