//! Cluster teardown.
//!
//! Phases run strictly in order: instances (sequentially), secrets
//! (concurrently), group namespaces (concurrently, best-effort), and
//! finally the cluster record. Each concurrent phase is joined in full
//! before the next phase starts. Teardown is not transactional; completed
//! phases are never undone, and the record is removed last so a cluster
//! that failed part-way through stays discoverable for a retry.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use fleet_state::*;
use fleet_tools::{ClusterTools, argv};

use crate::control::ControlPlane;
use crate::error::{ControlError, ControlResult};

impl ControlPlane {
    /// Delete a cluster on behalf of a member of its owning group (or an admin).
    pub async fn delete_cluster(&self, user: &User, cluster_ref: &str, force: bool) -> ControlResult<()> {
        info!(user = %user.name, cluster = %cluster_ref, force, "cluster deletion requested");
        let cluster = self.cluster(cluster_ref)?;
        self.require_owner_or_admin(user, &cluster)?;
        self.teardown_cluster(&cluster, force).await
    }

    /// Tear down everything on a cluster and then forget it.
    ///
    /// Without `force`, the first instance or secret failure aborts the
    /// teardown (secret failures only after every secret task finished).
    /// With `force`, failures are logged and teardown continues.
    pub async fn teardown_cluster(&self, cluster: &Cluster, force: bool) -> ControlResult<()> {
        self.delete_instances(cluster, force).await?;
        self.delete_secrets(cluster, force).await?;
        self.delete_group_namespaces(cluster).await;

        info!(cluster = %cluster, "deleting cluster record");
        match self.store.remove_cluster(&cluster.id) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ControlError::Infrastructure("Cluster deletion failed".to_string())),
            Err(e) => {
                error!(cluster = %cluster, error = %e, "failed to remove cluster record");
                Err(ControlError::Infrastructure("Cluster deletion failed".to_string()))
            }
        }
    }

    async fn delete_instances(&self, cluster: &Cluster, force: bool) -> ControlResult<()> {
        let instances = self
            .store
            .list_application_instances_by_cluster_or_group(None, Some(&cluster.id))?;
        info!(cluster = %cluster, count = instances.len(), "deleting application instances");
        for instance in &instances {
            if let Err(e) = self.cleaner.delete_instance(instance, force).await {
                if !force {
                    return Err(ControlError::Infrastructure(format!(
                        "Failed to delete cluster due to failure deleting instance: {}",
                        e.public_message()
                    )));
                }
                warn!(cluster = %cluster, instance_id = %instance.id, error = %e, "ignoring instance deletion failure");
            }
        }
        Ok(())
    }

    async fn delete_secrets(&self, cluster: &Cluster, force: bool) -> ControlResult<()> {
        let secrets = self.store.list_secrets(None, Some(&cluster.id))?;
        info!(cluster = %cluster, count = secrets.len(), "deleting secrets");

        let mut tasks = JoinSet::new();
        for secret in secrets {
            let cleaner = self.cleaner.clone();
            tasks.spawn(async move {
                let result = cleaner.delete_secret(&secret, true).await;
                (secret.id, result)
            });
        }

        // Join every task before deciding anything.
        let mut first_failure = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((secret_id, Err(e))) => {
                    warn!(cluster = %cluster, %secret_id, error = %e, "secret deletion failed");
                    e.public_message()
                }
                Err(e) => {
                    error!(cluster = %cluster, error = %e, "secret deletion task failed");
                    "secret deletion task failed".to_string()
                }
            };
            first_failure.get_or_insert(failure);
        }

        match first_failure {
            Some(message) if !force => Err(ControlError::Infrastructure(format!(
                "Failed to delete cluster due to failure deleting secret: {message}"
            ))),
            _ => Ok(()),
        }
    }

    /// Remove every group's namespace from the cluster. Failures are logged
    /// and never abort the teardown.
    async fn delete_group_namespaces(&self, cluster: &Cluster) {
        info!(cluster = %cluster, "deleting group namespaces");
        let groups = match self.store.list_groups() {
            Ok(groups) => groups,
            Err(e) => {
                error!(cluster = %cluster, error = %e, "unable to list groups; skipping namespace cleanup");
                return;
            }
        };
        let config = match self.config_path(cluster) {
            Ok(config) => config,
            Err(_) => return,
        };

        let mut tasks = JoinSet::new();
        for group in groups {
            let tools = self.tools.clone();
            let config = config.clone();
            tasks.spawn(async move {
                let namespace = group.namespace_name();
                let result = delete_namespace(tools, config, &namespace).await;
                (namespace, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((namespace, Err(reason))) => {
                    error!(cluster = %cluster, %namespace, %reason, "failed to delete namespace");
                }
                Err(e) => error!(cluster = %cluster, error = %e, "namespace deletion task failed"),
            }
        }
    }
}

/// Delete a namespace if it exists.
async fn delete_namespace(
    tools: Arc<dyn ClusterTools>,
    config: PathBuf,
    namespace: &str,
) -> Result<(), String> {
    let present = tools
        .kubectl(&config, &argv!["get", "namespace", namespace])
        .await
        .map_err(|e| e.to_string())?;
    if !present.success() {
        return Ok(());
    }
    let deleted = tools
        .kubectl(&config, &argv!["delete", "namespace", namespace])
        .await
        .map_err(|e| e.to_string())?;
    if deleted.success() {
        info!(%namespace, "namespace deleted");
        Ok(())
    } else {
        Err(deleted.stderr.trim().to_string())
    }
}
