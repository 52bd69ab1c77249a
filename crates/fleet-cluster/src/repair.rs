//! Converging a drifted cluster.
//!
//! A repair always starts from a fresh consistency check and applies
//! exactly one strategy to its findings. Strategies sit behind
//! [`RepairStrategy`] so other mechanics can be plugged in without
//! touching the diffing in [`crate::reconcile`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use fleet_state::*;
use fleet_tools::{Invocation, Tool, argv};

use crate::control::ControlPlane;
use crate::error::{ControlError, ControlResult};
use crate::reconcile::{ConsistencyReport, ConsistencyStatus};

/// The built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairStrategyKind {
    /// Recreate what is missing and remove what is unexpected.
    #[default]
    Reinstall,
    /// Forget records of things the cluster no longer runs.
    Wipe,
}

impl RepairStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStrategyKind::Reinstall => "reinstall",
            RepairStrategyKind::Wipe => "wipe",
        }
    }
}

impl fmt::Display for RepairStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairStrategyKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reinstall" => Ok(RepairStrategyKind::Reinstall),
            "wipe" => Ok(RepairStrategyKind::Wipe),
            other => Err(ControlError::Validation(format!(
                "Unknown repair strategy: {other}"
            ))),
        }
    }
}

/// What a repair did.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub strategy: String,
    /// Status of the check the repair acted on.
    pub status: ConsistencyStatus,
    pub actions: Vec<String>,
    pub failures: Vec<String>,
}

/// Everything a strategy may act on.
pub struct RepairContext<'a> {
    pub control: &'a ControlPlane,
    pub cluster: &'a Cluster,
    pub config: PathBuf,
    pub findings: &'a ConsistencyReport,
}

/// Progress accumulated by a strategy.
#[derive(Debug, Default)]
pub struct RepairLog {
    pub actions: Vec<String>,
    pub failures: Vec<String>,
}

impl RepairLog {
    fn record(&mut self, action: String, outcome: Result<(), String>) {
        match outcome {
            Ok(()) => self.actions.push(action),
            Err(reason) => {
                warn!(%action, %reason, "repair action failed");
                self.failures.push(format!("{action}: {reason}"));
            }
        }
    }
}

#[async_trait]
pub trait RepairStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Act on the findings. Individual failures go into the log; an error
    /// aborts the repair.
    async fn apply(&self, context: &RepairContext<'_>) -> ControlResult<RepairLog>;
}

/// Removes records of missing instances and secrets.
pub struct Wipe;

#[async_trait]
impl RepairStrategy for Wipe {
    fn name(&self) -> &str {
        RepairStrategyKind::Wipe.as_str()
    }

    async fn apply(&self, context: &RepairContext<'_>) -> ControlResult<RepairLog> {
        let store = context.control.store();
        let mut log = RepairLog::default();
        for instance in &context.findings.missing_instances {
            let outcome = store
                .remove_instance(&instance.id)
                .map(|_| ())
                .map_err(|e| e.to_string());
            log.record(format!("forgot instance {}", instance.name), outcome);
        }
        for secret in &context.findings.missing_secrets {
            let outcome = store
                .remove_secret(&secret.id)
                .map(|_| ())
                .map_err(|e| e.to_string());
            log.record(format!("forgot secret {}", secret.name), outcome);
        }
        Ok(log)
    }
}

/// Reinstalls missing releases and secrets from their records and removes
/// unexpected ones from the cluster.
pub struct Reinstall;

impl Reinstall {
    async fn run(
        context: &RepairContext<'_>,
        tool: Tool,
        args: Vec<String>,
        input: Option<&str>,
    ) -> Result<(), String> {
        let invocation = Invocation {
            config: &context.config,
            tool,
            args: &args,
            input,
        };
        match context.control.tools.run(invocation).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(out.stderr.trim().to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn group_namespace(context: &RepairContext<'_>, group_id: &str) -> Result<String, String> {
        match context.control.store().find_group_by_id(group_id) {
            Ok(Some(group)) => Ok(group.namespace_name()),
            Ok(None) => Err(format!("group {group_id} not found")),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn install(context: &RepairContext<'_>, instance: &ApplicationInstance) -> Result<(), String> {
        let namespace = Self::group_namespace(context, &instance.owning_group)?;
        let chart = format!("{}/{}", context.control.chart_repository, instance.application);
        let mut args = argv![
            "install",
            chart,
            "--name",
            instance.name,
            "--namespace",
            namespace,
            "--tiller-namespace",
            context.cluster.system_namespace
        ];
        let values = (!instance.configuration.trim().is_empty()).then_some(instance.configuration.as_str());
        if values.is_some() {
            args.extend(argv!["--values", "-"]);
        }
        Self::run(context, Tool::Helm, args, values).await
    }

    async fn recreate_secret(context: &RepairContext<'_>, secret: &Secret) -> Result<(), String> {
        let namespace = Self::group_namespace(context, &secret.group)?;
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "Opaque",
            "metadata": { "name": secret.name, "namespace": namespace },
            "stringData": secret.contents,
        })
        .to_string();
        Self::run(context, Tool::Kubectl, argv!["apply", "-f", "-"], Some(&manifest)).await
    }
}

#[async_trait]
impl RepairStrategy for Reinstall {
    fn name(&self) -> &str {
        RepairStrategyKind::Reinstall.as_str()
    }

    async fn apply(&self, context: &RepairContext<'_>) -> ControlResult<RepairLog> {
        let findings = context.findings;
        let system_namespace = &context.cluster.system_namespace;
        let mut log = RepairLog::default();

        for release in &findings.unexpected_instances {
            let args = argv!["delete", "--purge", release, "--tiller-namespace", system_namespace];
            let outcome = Self::run(context, Tool::Helm, args, None).await;
            log.record(format!("deleted release {release}"), outcome);
        }
        for key in &findings.unexpected_secrets {
            let outcome = match key.split_once(':') {
                Some((group, name)) => {
                    let namespace = format!("{GROUP_NAMESPACE_PREFIX}{group}");
                    Self::run(
                        context,
                        Tool::Kubectl,
                        argv!["delete", "secret", name, "-n", namespace],
                        None,
                    )
                    .await
                }
                None => Err("malformed secret key".to_string()),
            };
            log.record(format!("deleted secret {key}"), outcome);
        }
        for instance in &findings.missing_instances {
            let outcome = Self::install(context, instance).await;
            log.record(format!("reinstalled instance {}", instance.name), outcome);
        }
        for secret in &findings.missing_secrets {
            let outcome = Self::recreate_secret(context, secret).await;
            log.record(format!("recreated secret {}", secret.name), outcome);
        }
        Ok(log)
    }
}

impl ControlPlane {
    /// Repair a cluster with one of the built-in strategies. Admins only.
    pub async fn repair_cluster(
        &self,
        user: &User,
        cluster_ref: &str,
        kind: RepairStrategyKind,
    ) -> ControlResult<RepairReport> {
        match kind {
            RepairStrategyKind::Reinstall => self.repair_with(user, cluster_ref, &Reinstall).await,
            RepairStrategyKind::Wipe => self.repair_with(user, cluster_ref, &Wipe).await,
        }
    }

    /// Repair a cluster with any strategy. Admins only.
    pub async fn repair_with(
        &self,
        user: &User,
        cluster_ref: &str,
        strategy: &dyn RepairStrategy,
    ) -> ControlResult<RepairReport> {
        info!(user = %user.name, cluster = %cluster_ref, strategy = strategy.name(), "repair requested");
        if !user.admin {
            return Err(ControlError::not_authorized());
        }
        let cluster = self.cluster(cluster_ref)?;

        let findings = self.check_consistency(&cluster).await?;
        match findings.status {
            ConsistencyStatus::Unreachable | ConsistencyStatus::HelmFailure => {
                warn!(cluster = %cluster, status = %findings.status, "cluster cannot be repaired");
                return Err(ControlError::Infrastructure(format!(
                    "Cluster cannot be repaired in its current state: {}",
                    findings.status
                )));
            }
            ConsistencyStatus::Consistent => {
                info!(cluster = %cluster, "cluster is consistent; nothing to repair");
                return Ok(RepairReport {
                    strategy: strategy.name().to_string(),
                    status: findings.status,
                    actions: Vec::new(),
                    failures: Vec::new(),
                });
            }
            ConsistencyStatus::Inconsistent => {}
        }

        let context = RepairContext {
            control: self,
            cluster: &cluster,
            config: self.config_path(&cluster)?,
            findings: &findings,
        };
        let log = strategy.apply(&context).await?;
        info!(
            cluster = %cluster,
            strategy = strategy.name(),
            actions = log.actions.len(),
            failures = log.failures.len(),
            "repair complete"
        );
        Ok(RepairReport {
            strategy: strategy.name().to_string(),
            status: findings.status,
            actions: log.actions,
            failures: log.failures,
        })
    }
}
