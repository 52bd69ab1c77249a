//! Instance and secret deletion procedures used during cluster teardown.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use fleet_state::*;
use fleet_tools::{ClusterTools, Tool, argv};

use crate::error::{ControlError, ControlResult};

/// Removes a workload from its cluster and from the store.
///
/// With `force`, the store record is removed even when the cluster-side
/// removal fails, and the call succeeds.
#[async_trait]
pub trait WorkloadCleaner: Send + Sync {
    async fn delete_instance(&self, instance: &ApplicationInstance, force: bool) -> ControlResult<()>;

    async fn delete_secret(&self, secret: &Secret, force: bool) -> ControlResult<()>;
}

/// Deletes releases with `helm delete --purge` and secrets with
/// `kubectl delete secret`.
pub struct ToolWorkloadCleaner {
    store: StateStore,
    tools: Arc<dyn ClusterTools>,
}

impl ToolWorkloadCleaner {
    pub fn new(store: StateStore, tools: Arc<dyn ClusterTools>) -> Self {
        Self { store, tools }
    }

    /// Run a removal against the workload's cluster, if it still exists.
    ///
    /// Returns the failure message, if any.
    async fn remove_from_cluster(
        &self,
        cluster_id: &str,
        what: &str,
        args: impl FnOnce(&Cluster) -> ControlResult<(Tool, Vec<String>)>,
    ) -> ControlResult<Option<String>> {
        let Some(cluster) = self.store.get_cluster(cluster_id)? else {
            warn!(%cluster_id, %what, "cluster no longer exists; only removing the record");
            return Ok(None);
        };
        let config = self.store.config_path_for_cluster(&cluster.id)?;
        let (tool, args) = args(&cluster)?;
        let output = match tool {
            Tool::Helm => self.tools.helm(&config, &args).await?,
            Tool::Kubectl => self.tools.kubectl(&config, &args).await?,
        };
        if output.success() {
            return Ok(None);
        }
        error!(cluster = %cluster, %what, stderr = %output.stderr.trim(), "cluster-side deletion failed");
        Ok(Some(format!("Failed to delete {what} from cluster {}", cluster.name)))
    }
}

#[async_trait]
impl WorkloadCleaner for ToolWorkloadCleaner {
    async fn delete_instance(&self, instance: &ApplicationInstance, force: bool) -> ControlResult<()> {
        info!(instance_id = %instance.id, name = %instance.name, force, "deleting application instance");
        let what = format!("instance {}", instance.name);
        let failure = self
            .remove_from_cluster(&instance.cluster, &what, |cluster| {
                Ok((
                    Tool::Helm,
                    argv![
                        "delete",
                        "--purge",
                        instance.name,
                        "--tiller-namespace",
                        cluster.system_namespace
                    ],
                ))
            })
            .await?;
        if let Some(message) = failure {
            if !force {
                return Err(ControlError::Infrastructure(message));
            }
        }
        self.store.remove_instance(&instance.id)?;
        Ok(())
    }

    async fn delete_secret(&self, secret: &Secret, force: bool) -> ControlResult<()> {
        info!(secret_id = %secret.id, name = %secret.name, force, "deleting secret");
        let what = format!("secret {}", secret.name);
        let group = self.store.find_group_by_id(&secret.group)?;
        let failure = self
            .remove_from_cluster(&secret.cluster, &what, |_| {
                let group = group.ok_or_else(|| {
                    ControlError::NotFound(format!("Group {} of secret not found", secret.group))
                })?;
                Ok((
                    Tool::Kubectl,
                    argv!["delete", "secret", secret.name, "-n", group.namespace_name()],
                ))
            })
            .await;
        let failure = match failure {
            Ok(failure) => failure,
            Err(e) if force => Some(e.to_string()),
            Err(e) => return Err(e),
        };
        if let Some(message) = failure {
            if !force {
                return Err(ControlError::Infrastructure(message));
            }
        }
        self.store.remove_secret(&secret.id)?;
        Ok(())
    }
}
