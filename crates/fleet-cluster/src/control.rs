//! The control plane handle shared by every workflow.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use fleet_state::*;
use fleet_tools::ClusterTools;

use crate::cleanup::{ToolWorkloadCleaner, WorkloadCleaner};
use crate::error::{ControlError, ControlResult};
use crate::registration::RegistrationTimings;

/// Default chart repository missing instances are reinstalled from.
pub const DEFAULT_CHART_REPOSITORY: &str = "fleet";

/// Orchestrates cluster workflows over the store and the cluster tools.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct ControlPlane {
    pub(crate) store: StateStore,
    pub(crate) tools: Arc<dyn ClusterTools>,
    pub(crate) cleaner: Arc<dyn WorkloadCleaner>,
    pub(crate) timings: RegistrationTimings,
    pub(crate) chart_repository: String,
}

/// Read model of a cluster for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub name: String,
    /// Display name of the owning group.
    pub owning_group: String,
    pub owning_organization: String,
    pub locations: Vec<GeoLocation>,
}

/// Read model of a group for access listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
}

impl ControlPlane {
    /// Create a control plane that cleans up workloads with the same tools.
    pub fn new(store: StateStore, tools: Arc<dyn ClusterTools>) -> Self {
        let cleaner = Arc::new(ToolWorkloadCleaner::new(store.clone(), tools.clone()));
        Self {
            store,
            tools,
            cleaner,
            timings: RegistrationTimings::default(),
            chart_repository: DEFAULT_CHART_REPOSITORY.to_string(),
        }
    }

    /// Replace the instance and secret deletion procedures.
    pub fn with_cleaner(mut self, cleaner: Arc<dyn WorkloadCleaner>) -> Self {
        self.cleaner = cleaner;
        self
    }

    /// Set the package-manager readiness polling schedule.
    pub fn with_timings(mut self, timings: RegistrationTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Set the chart repository used when reinstalling instances.
    pub fn with_chart_repository(mut self, repository: impl Into<String>) -> Self {
        self.chart_repository = repository.into();
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Resolve a cluster by id or name.
    pub fn cluster(&self, reference: &str) -> ControlResult<Cluster> {
        self.store
            .resolve_cluster(reference)?
            .ok_or_else(|| ControlError::NotFound("Cluster not found".to_string()))
    }

    /// Resolve a group by id or name.
    pub fn group(&self, reference: &str) -> ControlResult<Group> {
        self.store
            .get_group(reference)?
            .ok_or_else(|| ControlError::NotFound("Group not found".to_string()))
    }

    pub(crate) fn is_member(&self, user: &User, group_id: &str) -> ControlResult<bool> {
        Ok(self.store.user_in_group(&user.id, group_id)?)
    }

    /// Admins and members of the owning group pass.
    pub(crate) fn require_owner_or_admin(&self, user: &User, cluster: &Cluster) -> ControlResult<()> {
        if user.admin || self.is_member(user, &cluster.owning_group)? {
            Ok(())
        } else {
            Err(ControlError::not_authorized())
        }
    }

    /// Materialize the cluster's credential bundle for tool invocations.
    pub(crate) fn config_path(&self, cluster: &Cluster) -> ControlResult<PathBuf> {
        self.store.config_path_for_cluster(&cluster.id).map_err(|e| {
            error!(cluster = %cluster, error = %e, "failed to materialize credential bundle");
            ControlError::from(e)
        })
    }

    /// List clusters, optionally only those a group owns or may use.
    pub fn list_clusters(&self, user: &User, group: Option<&str>) -> ControlResult<Vec<ClusterSummary>> {
        info!(user = %user.name, ?group, "listing clusters");
        let clusters = match group {
            Some(reference) => match self.store.get_group(reference)? {
                Some(group) => self.store.list_clusters_by_group(&group.id)?,
                None => Vec::new(),
            },
            None => self.store.list_clusters()?,
        };
        clusters.iter().map(|c| self.summarize(c)).collect()
    }

    /// Details of a single cluster.
    pub fn cluster_info(&self, user: &User, reference: &str) -> ControlResult<ClusterSummary> {
        info!(user = %user.name, cluster = %reference, "cluster info requested");
        let cluster = self.cluster(reference)?;
        self.summarize(&cluster)
    }

    fn summarize(&self, cluster: &Cluster) -> ControlResult<ClusterSummary> {
        let owning_group = self
            .store
            .find_group_by_id(&cluster.owning_group)?
            .map(|g| g.name)
            .unwrap_or_default();
        Ok(ClusterSummary {
            id: cluster.id.clone(),
            name: cluster.name.clone(),
            owning_group,
            owning_organization: cluster.owning_organization.clone(),
            locations: self.store.get_locations_for_cluster(&cluster.id)?,
        })
    }
}
