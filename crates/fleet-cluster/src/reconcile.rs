//! Drift detection between recorded and observed cluster state.
//!
//! Desired state is what the store says should be on a cluster; observed
//! state is what the tools report. Both inventories are read fresh on
//! every check and nothing is cached.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use tracing::{info, warn};

use fleet_state::*;
use fleet_tools::{argv, parse};

use crate::control::ControlPlane;
use crate::error::ControlResult;

/// Prefix of the token secrets the orchestrator creates in every namespace.
pub const DEFAULT_TOKEN_PREFIX: &str = "default-token-";

/// Overall health, in ascending severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConsistencyStatus {
    Consistent,
    Inconsistent,
    HelmFailure,
    Unreachable,
}

impl ConsistencyStatus {
    /// Keep the more severe of two statuses.
    pub fn escalate(self, other: ConsistencyStatus) -> ConsistencyStatus {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyStatus::Consistent => "Consistent",
            ConsistencyStatus::Inconsistent => "Inconsistent",
            ConsistencyStatus::HelmFailure => "HelmFailure",
            ConsistencyStatus::Unreachable => "Unreachable",
        }
    }
}

impl fmt::Display for ConsistencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one consistency check.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReport {
    pub status: ConsistencyStatus,
    /// Recorded instances with no deployed release.
    pub missing_instances: Vec<ApplicationInstance>,
    /// Deployed release names with no recorded instance.
    pub unexpected_instances: BTreeSet<String>,
    /// Recorded secrets absent from the cluster.
    pub missing_secrets: Vec<Secret>,
    /// `group:secret` keys present on the cluster but not recorded.
    pub unexpected_secrets: BTreeSet<String>,
}

impl ConsistencyReport {
    fn short_circuit(status: ConsistencyStatus) -> Self {
        Self {
            status,
            missing_instances: Vec::new(),
            unexpected_instances: BTreeSet::new(),
            missing_secrets: Vec::new(),
            unexpected_secrets: BTreeSet::new(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.status == ConsistencyStatus::Consistent
    }
}

/// Split a keyed desired inventory against an observed set of keys.
///
/// Returns the desired entries whose key was not observed and the observed
/// keys nothing desired accounts for.
pub fn diff<T>(desired: BTreeMap<String, T>, observed: &BTreeSet<String>) -> (Vec<T>, BTreeSet<String>) {
    let unexpected = observed
        .iter()
        .filter(|key| !desired.contains_key(*key))
        .cloned()
        .collect();
    let missing = desired
        .into_iter()
        .filter(|(key, _)| !observed.contains(key))
        .map(|(_, value)| value)
        .collect();
    (missing, unexpected)
}

/// `group:secret` key for a secret in a group's namespace.
pub fn secret_key(group_name: &str, secret_name: &str) -> String {
    format!("{group_name}:{secret_name}")
}

impl ControlPlane {
    /// Check a cluster by reference on behalf of a user.
    pub async fn verify_cluster(&self, user: &User, cluster_ref: &str) -> ControlResult<ConsistencyReport> {
        info!(user = %user.name, cluster = %cluster_ref, "consistency check requested");
        let cluster = self.cluster(cluster_ref)?;
        self.check_consistency(&cluster).await
    }

    /// Compare recorded instances and secrets with what the cluster runs.
    pub async fn check_consistency(&self, cluster: &Cluster) -> ControlResult<ConsistencyReport> {
        if !self.probe_reachability(cluster).await? {
            return Ok(ConsistencyReport::short_circuit(ConsistencyStatus::Unreachable));
        }
        let config = self.config_path(cluster)?;

        let Some(releases) = self.observed_releases(cluster, &config).await else {
            return Ok(ConsistencyReport::short_circuit(ConsistencyStatus::HelmFailure));
        };
        let desired_instances: BTreeMap<String, ApplicationInstance> = self
            .store
            .list_application_instances_by_cluster_or_group(None, Some(&cluster.id))?
            .into_iter()
            .map(|instance| (instance.name.clone(), instance))
            .collect();
        let (missing_instances, unexpected_instances) = diff(desired_instances, &releases);

        let mut status = ConsistencyStatus::Consistent;
        if !missing_instances.is_empty() || !unexpected_instances.is_empty() {
            status = status.escalate(ConsistencyStatus::Inconsistent);
        }

        let observed_secrets = self.observed_secrets(cluster, &config).await;
        let (missing_secrets, unexpected_secrets) = diff(self.desired_secrets(cluster)?, &observed_secrets);
        if !missing_secrets.is_empty() || !unexpected_secrets.is_empty() {
            status = status.escalate(ConsistencyStatus::Inconsistent);
        }

        info!(
            cluster = %cluster,
            %status,
            missing_instances = missing_instances.len(),
            unexpected_instances = unexpected_instances.len(),
            missing_secrets = missing_secrets.len(),
            unexpected_secrets = unexpected_secrets.len(),
            "consistency check complete"
        );
        Ok(ConsistencyReport {
            status,
            missing_instances,
            unexpected_instances,
            missing_secrets,
            unexpected_secrets,
        })
    }

    /// Release names the package manager reports, or `None` if listing failed.
    async fn observed_releases(&self, cluster: &Cluster, config: &Path) -> Option<BTreeSet<String>> {
        let args = argv!["list", "--tiller-namespace", cluster.system_namespace];
        match self.tools.helm(config, &args).await {
            Ok(out) if out.success() => Some(
                parse::first_column_after_header(&out.stdout)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            ),
            Ok(out) => {
                warn!(cluster = %cluster, stderr = %out.stderr.trim(), "unable to list helm releases");
                None
            }
            Err(e) => {
                warn!(cluster = %cluster, error = %e, "unable to list helm releases");
                None
            }
        }
    }

    /// Secret keys found in group namespaces. A failed namespace listing
    /// observes nothing, so every recorded secret counts as missing.
    /// Namespaces whose secrets cannot be listed are skipped.
    async fn observed_secrets(&self, cluster: &Cluster, config: &Path) -> BTreeSet<String> {
        let listing = argv!["get", "namespaces", "-o=jsonpath={.items[*].metadata.name}"];
        let namespaces = match self.tools.kubectl(config, &listing).await {
            Ok(out) if out.success() => out.stdout,
            Ok(out) => {
                warn!(cluster = %cluster, stderr = %out.stderr.trim(), "unable to list namespaces");
                return BTreeSet::new();
            }
            Err(e) => {
                warn!(cluster = %cluster, error = %e, "unable to list namespaces");
                return BTreeSet::new();
            }
        };

        let mut observed = BTreeSet::new();
        for namespace in parse::names(&namespaces) {
            let Some(group_name) = namespace.strip_prefix(GROUP_NAMESPACE_PREFIX) else {
                continue;
            };
            let args = argv![
                "get",
                "secrets",
                "-n",
                namespace,
                "-o=jsonpath={.items[*].metadata.name}"
            ];
            match self.tools.kubectl(config, &args).await {
                Ok(out) if out.success() => {
                    observed.extend(
                        parse::names(&out.stdout)
                            .into_iter()
                            .filter(|name| !name.starts_with(DEFAULT_TOKEN_PREFIX))
                            .map(|name| secret_key(group_name, name)),
                    );
                }
                Ok(out) => {
                    warn!(cluster = %cluster, %namespace, stderr = %out.stderr.trim(), "unable to list secrets");
                }
                Err(e) => {
                    warn!(cluster = %cluster, %namespace, error = %e, "unable to list secrets");
                }
            }
        }
        observed
    }

    fn desired_secrets(&self, cluster: &Cluster) -> ControlResult<BTreeMap<String, Secret>> {
        let mut group_names: BTreeMap<GroupId, String> = BTreeMap::new();
        let mut desired = BTreeMap::new();
        for secret in self.store.list_secrets(None, Some(&cluster.id))? {
            if !group_names.contains_key(&secret.group) {
                let name = match self.store.find_group_by_id(&secret.group)? {
                    Some(group) => group.name,
                    None => {
                        warn!(cluster = %cluster, secret_id = %secret.id, group_id = %secret.group, "secret belongs to an unknown group");
                        secret.group.clone()
                    }
                };
                group_names.insert(secret.group.clone(), name);
            }
            let key = secret_key(&group_names[&secret.group], &secret.name);
            desired.insert(key, secret);
        }
        Ok(desired)
    }
}
