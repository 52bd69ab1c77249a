//! A scripted [`ClusterTools`] fake.
//!
//! Responses are keyed by tool and a set of argv fragments; a rule matches
//! an invocation when every fragment equals one of its arguments. Rules are
//! tried in the order they were added; an invocation no rule matches exits
//! with status 1. A rule with several responses hands them out in order and
//! then keeps repeating the last one, which is how tests script polling
//! loops.
//!
//! Every invocation is recorded so tests can assert on what was run.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ToolResult;
use crate::{ClusterTools, Invocation, Tool, ToolOutput};

/// Stderr of invocations no rule matches.
const UNSCRIPTED: &str = "no scripted response";

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub config: PathBuf,
    pub tool: Tool,
    pub args: Vec<String>,
    pub input: Option<String>,
}

impl RecordedCall {
    /// Whether every fragment appears as a whole argument.
    pub fn matches(&self, tool: Tool, fragments: &[&str]) -> bool {
        self.tool == tool && fragments.iter().all(|f| self.args.iter().any(|a| a == f))
    }
}

struct Rule {
    tool: Tool,
    fragments: Vec<String>,
    responses: VecDeque<ToolOutput>,
}

impl Rule {
    fn matches(&self, tool: Tool, args: &[String]) -> bool {
        self.tool == tool && self.fragments.iter().all(|f| args.iter().any(|a| a == f))
    }

    fn next(&mut self) -> ToolOutput {
        if self.responses.len() > 1 {
            self.responses.pop_front().unwrap_or_default()
        } else {
            self.responses.front().cloned().unwrap_or_default()
        }
    }
}

/// Scripted stand-in for the real cluster tools.
pub struct ScriptedTools {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedTools {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer matching invocations with `output`.
    pub fn on(self, tool: Tool, fragments: &[&str], output: ToolOutput) -> Self {
        self.on_sequence(tool, fragments, vec![output])
    }

    /// Answer matching invocations with `outputs` in order, repeating the last.
    pub fn on_sequence(self, tool: Tool, fragments: &[&str], outputs: Vec<ToolOutput>) -> Self {
        self.push_rule(tool, fragments, outputs);
        self
    }

    fn push_rule(&self, tool: Tool, fragments: &[&str], outputs: Vec<ToolOutput>) {
        let rule = Rule {
            tool,
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            responses: outputs.into(),
        };
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(rule);
        }
    }

    /// Every invocation so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of invocations matching the tool and fragments.
    pub fn count(&self, tool: Tool, fragments: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.matches(tool, fragments))
            .count()
    }

    fn record(&self, config: &Path, tool: Tool, args: &[String], input: Option<&str>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                config: config.to_path_buf(),
                tool,
                args: args.to_vec(),
                input: input.map(str::to_string),
            });
        }
    }
}

#[async_trait]
impl ClusterTools for ScriptedTools {
    async fn run(&self, invocation: Invocation<'_>) -> ToolResult<ToolOutput> {
        self.record(
            invocation.config,
            invocation.tool,
            invocation.args,
            invocation.input,
        );
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(poisoned) => poisoned.into_inner(),
        };
        let output = rules
            .iter_mut()
            .find(|rule| rule.matches(invocation.tool, invocation.args))
            .map(Rule::next)
            .unwrap_or_else(|| ToolOutput::failed(1, UNSCRIPTED));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argv;

    #[tokio::test]
    async fn unmatched_invocation_uses_fallback() {
        let tools = ScriptedTools::new();
        let out = tools
            .kubectl(Path::new("/cfg"), &argv!["get", "pods"])
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.stderr, UNSCRIPTED);
    }

    #[tokio::test]
    async fn rules_match_on_every_fragment() {
        let tools = ScriptedTools::new()
            .on(Tool::Kubectl, &["get", "serviceaccounts"], ToolOutput::ok("default"))
            .on(Tool::Kubectl, &["get"], ToolOutput::ok("other"));

        let sa = tools
            .kubectl(Path::new("/cfg"), &argv!["get", "serviceaccounts", "-o=name"])
            .await
            .unwrap();
        assert_eq!(sa.stdout, "default");

        let pods = tools
            .kubectl(Path::new("/cfg"), &argv!["get", "pods"])
            .await
            .unwrap();
        assert_eq!(pods.stdout, "other");

        // Tool must match too.
        let helm = tools.helm(Path::new("/cfg"), &argv!["get"]).await.unwrap();
        assert!(!helm.success());
    }

    #[tokio::test]
    async fn sequence_repeats_last_response() {
        let tools = ScriptedTools::new().on_sequence(
            Tool::Kubectl,
            &["pods"],
            vec![ToolOutput::ok("0/1"), ToolOutput::ok("1/1")],
        );
        let cfg = Path::new("/cfg");
        let args = argv!["get", "pods"];
        assert_eq!(tools.kubectl(cfg, &args).await.unwrap().stdout, "0/1");
        assert_eq!(tools.kubectl(cfg, &args).await.unwrap().stdout, "1/1");
        assert_eq!(tools.kubectl(cfg, &args).await.unwrap().stdout, "1/1");
    }

    #[tokio::test]
    async fn calls_are_recorded() {
        let tools = ScriptedTools::new();
        tools
            .run(Invocation {
                config: Path::new("/cfg/one"),
                tool: Tool::Helm,
                args: &argv!["list"],
                input: Some("values"),
            })
            .await
            .unwrap();
        let calls = tools.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].config, PathBuf::from("/cfg/one"));
        assert_eq!(calls[0].input.as_deref(), Some("values"));
        assert_eq!(tools.count(Tool::Helm, &["list"]), 1);
        assert_eq!(tools.count(Tool::Kubectl, &["list"]), 0);
    }
}
