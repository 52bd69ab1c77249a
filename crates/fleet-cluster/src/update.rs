//! Partial updates to a registered cluster.

use tracing::{error, info};

use fleet_state::*;

use crate::control::ControlPlane;
use crate::error::{ControlError, ControlResult};
use crate::kubeconfig;

/// Fields a caller may change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ClusterUpdate {
    /// Replacement credential bundle, possibly escaped for transport.
    pub kubeconfig: Option<String>,
    pub owning_organization: Option<String>,
    pub locations: Option<Vec<GeoLocation>>,
}

impl ClusterUpdate {
    pub fn is_trivial(&self) -> bool {
        self.kubeconfig.is_none() && self.owning_organization.is_none() && self.locations.is_none()
    }
}

impl ControlPlane {
    /// Apply an update. A new credential bundle is re-checked for
    /// connectivity after it has been stored; a failed check is reported
    /// but the stored changes stay.
    pub async fn update_cluster(
        &self,
        user: &User,
        cluster_ref: &str,
        update: ClusterUpdate,
    ) -> ControlResult<()> {
        info!(user = %user.name, cluster = %cluster_ref, "cluster update requested");
        let mut cluster = self.cluster(cluster_ref)?;
        self.require_owner_or_admin(user, &cluster)?;

        if update.is_trivial() {
            info!(cluster = %cluster, "requested update is trivial");
            return Ok(());
        }

        // Derive everything before writing anything.
        let new_config = match &update.kubeconfig {
            Some(raw) => Some(kubeconfig::prepare(raw)?),
            None => None,
        };
        let recheck = new_config.is_some();
        let rewrite_record = new_config.is_some() || update.owning_organization.is_some();
        if let Some(prepared) = new_config {
            cluster.config = prepared.config;
            cluster.system_namespace = prepared.system_namespace;
        }
        if let Some(organization) = update.owning_organization {
            cluster.owning_organization = organization;
        }

        info!(cluster = %cluster, "updating cluster");
        if rewrite_record && !self.store.update_cluster(&cluster)? {
            error!(cluster = %cluster, "cluster vanished during update");
            return Err(ControlError::Infrastructure("Cluster update failed".to_string()));
        }
        if let Some(locations) = update.locations {
            self.store.set_locations_for_cluster(&cluster.id, &locations)?;
        }

        if recheck {
            let config = self.config_path(&cluster)?;
            info!(cluster = %cluster, "attempting to access cluster with updated configuration");
            if let Err(stderr) = self.contact(&config).await {
                error!(cluster = %cluster, stderr = %stderr.trim(), "failure contacting cluster with updated configuration");
                return Err(ControlError::Infrastructure(
                    "Unable to contact cluster with kubectl after configuration update".to_string(),
                ));
            }
            info!(cluster = %cluster, "cluster contacted with updated configuration");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use fleet_tools::{ScriptedTools, Tool};

    #[tokio::test]
    async fn trivial_update_is_noop() {
        let fx = Fixture::new();
        let cluster = fx.cluster("umich");
        fx.control
            .update_cluster(&fx.owner, &cluster.id, ClusterUpdate::default())
            .await
            .unwrap();
        assert_eq!(fx.store.get_cluster(&cluster.id).unwrap().unwrap(), cluster);
        assert!(fx.tools.calls().is_empty());
    }

    #[tokio::test]
    async fn organization_and_locations_without_recheck() {
        let fx = Fixture::new();
        let cluster = fx.cluster("umich");
        let update = ClusterUpdate {
            owning_organization: Some("Other University".to_string()),
            locations: Some(vec![GeoLocation { lat: 41.8, lon: -87.6 }]),
            ..Default::default()
        };
        fx.control.update_cluster(&fx.admin, &cluster.name, update).await.unwrap();

        let stored = fx.store.get_cluster(&cluster.id).unwrap().unwrap();
        assert_eq!(stored.owning_organization, "Other University");
        assert_eq!(fx.store.get_locations_for_cluster(&cluster.id).unwrap().len(), 1);
        assert!(fx.tools.calls().is_empty());
    }

    #[tokio::test]
    async fn new_config_rederives_namespace_and_rechecks() {
        let fx = Fixture::with_tools(reachable_tools("new-namespace"));
        let cluster = fx.cluster("umich");
        let update = ClusterUpdate {
            kubeconfig: Some(kubeconfig("new-namespace").replace('\n', "\\n")),
            ..Default::default()
        };
        fx.control.update_cluster(&fx.owner, &cluster.id, update).await.unwrap();

        let stored = fx.store.get_cluster(&cluster.id).unwrap().unwrap();
        assert_eq!(stored.system_namespace, "new-namespace");
        assert_eq!(stored.config, kubeconfig("new-namespace"));
        assert_eq!(fx.tools.count(Tool::Kubectl, &["serviceaccounts"]), 1);
    }

    #[tokio::test]
    async fn failed_recheck_keeps_applied_changes() {
        let fx = Fixture::with_tools(ScriptedTools::new());
        let cluster = fx.cluster("umich");
        let update = ClusterUpdate {
            kubeconfig: Some(kubeconfig("new-namespace")),
            ..Default::default()
        };
        let err = fx
            .control
            .update_cluster(&fx.owner, &cluster.id, update)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Infrastructure(_)));
        let stored = fx.store.get_cluster(&cluster.id).unwrap().unwrap();
        assert_eq!(stored.system_namespace, "new-namespace");
    }

    #[tokio::test]
    async fn bad_config_writes_nothing() {
        let fx = Fixture::new();
        let cluster = fx.cluster("umich");
        let update = ClusterUpdate {
            kubeconfig: Some("apiVersion: v1\nkind: Config\n".to_string()),
            owning_organization: Some("Changed".to_string()),
            ..Default::default()
        };
        let err = fx
            .control
            .update_cluster(&fx.owner, &cluster.id, update)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
        assert_eq!(fx.store.get_cluster(&cluster.id).unwrap().unwrap(), cluster);
    }

    #[tokio::test]
    async fn outsiders_cannot_update() {
        let fx = Fixture::new();
        let cluster = fx.cluster("umich");
        let update = ClusterUpdate {
            owning_organization: Some("Mine now".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            fx.control.update_cluster(&fx.outsider, &cluster.id, update).await,
            Err(ControlError::Authorization(_))
        ));
    }
}
