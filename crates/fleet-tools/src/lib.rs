//! fleet-tools — the cluster tool invoker.
//!
//! Every remote observation the control plane makes goes through two
//! command-line tools: the cluster CLI (`kubectl`) and the package manager
//! (`helm`). This crate models each call as a function of
//! `(credential bundle path, tool, argv) -> ToolOutput` behind the
//! [`ClusterTools`] trait, so workflows can be exercised against a
//! [`ScriptedTools`] fake instead of real binaries.
//!
//! The invoker never retries and never interprets output; the helpers in
//! [`parse`] exist for callers that do.

pub mod command;
pub mod error;
pub mod parse;
pub mod scripted;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

pub use command::CommandTools;
pub use error::{ToolError, ToolResult};
pub use scripted::{RecordedCall, ScriptedTools};

/// Exit status reported when a tool was killed by the invoker's timeout.
pub const TIMEOUT_STATUS: i32 = 124;

/// Which external tool to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Kubectl,
    Helm,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Kubectl => write!(f, "kubectl"),
            Tool::Helm => write!(f, "helm"),
        }
    }
}

/// The captured result of one tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// A zero-status result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given status and stderr.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// One tool run request.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Credential bundle exported to the tool as `KUBECONFIG`.
    pub config: &'a Path,
    pub tool: Tool,
    pub args: &'a [String],
    /// Piped to the tool's stdin, for manifests and values that must not
    /// appear on a command line.
    pub input: Option<&'a str>,
}

/// Runs cluster tools against a credential bundle.
///
/// Implementations must enforce their own timeout and report it as a
/// non-zero [`ToolOutput`] rather than hang. `Err` is reserved for failures
/// to run the tool at all.
#[async_trait]
pub trait ClusterTools: Send + Sync {
    async fn run(&self, invocation: Invocation<'_>) -> ToolResult<ToolOutput>;

    /// Run `kubectl` with the given arguments.
    async fn kubectl(&self, config: &Path, args: &[String]) -> ToolResult<ToolOutput> {
        self.run(Invocation {
            config,
            tool: Tool::Kubectl,
            args,
            input: None,
        })
        .await
    }

    /// Run `helm` with the given arguments.
    async fn helm(&self, config: &Path, args: &[String]) -> ToolResult<ToolOutput> {
        self.run(Invocation {
            config,
            tool: Tool::Helm,
            args,
            input: None,
        })
        .await
    }
}

/// Build an owned argv from string literals and formatted values.
#[macro_export]
macro_rules! argv {
    ($($arg:expr),* $(,)?) => {
        vec![$(::std::string::ToString::to_string(&$arg)),*]
    };
}
