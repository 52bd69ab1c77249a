//! Subprocess implementation of [`ClusterTools`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ToolError, ToolResult};
use crate::{ClusterTools, Invocation, TIMEOUT_STATUS, Tool, ToolOutput};

/// Default ceiling on a single tool run.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs the real `kubectl` and `helm` binaries.
#[derive(Debug, Clone)]
pub struct CommandTools {
    kubectl: PathBuf,
    helm: PathBuf,
    timeout: Duration,
}

impl Default for CommandTools {
    fn default() -> Self {
        Self {
            kubectl: PathBuf::from("kubectl"),
            helm: PathBuf::from("helm"),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl CommandTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kubectl(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubectl = path.into();
        self
    }

    pub fn with_helm(mut self, path: impl Into<PathBuf>) -> Self {
        self.helm = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn program(&self, tool: Tool) -> &PathBuf {
        match tool {
            Tool::Kubectl => &self.kubectl,
            Tool::Helm => &self.helm,
        }
    }
}

#[async_trait]
impl ClusterTools for CommandTools {
    async fn run(&self, invocation: Invocation<'_>) -> ToolResult<ToolOutput> {
        let tool = invocation.tool;
        let mut cmd = Command::new(self.program(tool));
        cmd.args(invocation.args)
            .env("KUBECONFIG", invocation.config)
            .stdin(if invocation.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(%tool, args = ?invocation.args, "running cluster tool");
        let mut child = cmd.spawn().map_err(|e| ToolError::Spawn {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?;

        // Feed stdin while waiting so a tool that never reads its input
        // still falls under the timeout. Dropping the child on timeout kills it.
        let stdin = child.stdin.take();
        let feed = async move {
            match (stdin, invocation.input) {
                (Some(mut pipe), Some(input)) => pipe.write_all(input.as_bytes()).await,
                _ => Ok(()),
            }
        };
        let exchange = async { tokio::join!(feed, child.wait_with_output()) };

        let (written, waited) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(results) => results,
            Err(_) => {
                warn!(%tool, args = ?invocation.args, timeout = ?self.timeout, "cluster tool timed out");
                return Ok(ToolOutput::failed(
                    TIMEOUT_STATUS,
                    format!("{tool} timed out after {:?}", self.timeout),
                ));
            }
        };
        let output = waited.map_err(|e| ToolError::Spawn {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?;
        match written {
            Ok(()) => {}
            // The tool exited without reading all of its input; its status says the rest.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(%tool, "cluster tool closed stdin early");
            }
            Err(e) => {
                return Err(ToolError::Input {
                    tool: tool.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        let result = ToolOutput {
            // A signal-terminated process has no code; report it as failure.
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.success() {
            debug!(%tool, status = result.status, stderr = %result.stderr.trim(), "cluster tool exited non-zero");
        }
        Ok(result)
    }
}
