//! Access control over clusters and applications.
//!
//! The owning group of a cluster always has implicit access to it and to
//! every application on it. Other groups need a grant; the grant set is
//! either the wildcard or a set of concrete groups (see `GrantSet`). A
//! group with cluster access may additionally be restricted to a set of
//! applications (see `AppPermissions`).

use tracing::{info, warn};

use fleet_state::*;

use crate::control::{ControlPlane, GroupSummary};
use crate::error::{ControlError, ControlResult};

impl ControlPlane {
    /// Whether a group may use a cluster at all.
    pub fn group_may_use_cluster(&self, group_id: &str, cluster: &Cluster) -> ControlResult<bool> {
        if cluster.owning_group == group_id {
            return Ok(true);
        }
        Ok(self
            .store
            .list_groups_allowed_on_cluster(&cluster.id)?
            .admits(group_id))
    }

    /// Whether a group may install an application on a cluster.
    pub fn group_may_use_application(
        &self,
        group_id: &str,
        cluster: &Cluster,
        application: &str,
    ) -> ControlResult<bool> {
        if cluster.owning_group == group_id {
            return Ok(true);
        }
        if !self.group_may_use_cluster(group_id, cluster)? {
            return Ok(false);
        }
        Ok(self
            .store
            .list_applications_group_may_use_on_cluster(group_id, &cluster.id)?
            .permits(application))
    }

    /// Grant a group (or every group) access to a cluster.
    pub fn grant_cluster_access(
        &self,
        user: &User,
        cluster_ref: &str,
        group_ref: &str,
    ) -> ControlResult<()> {
        info!(user = %user.name, cluster = %cluster_ref, group = %group_ref, "cluster access grant requested");
        let cluster = self.cluster(cluster_ref)?;
        self.require_owner_or_admin(user, &cluster)?;

        let target = if is_wildcard_reference(group_ref) {
            info!(cluster = %cluster, "granting all groups access");
            GrantTarget::Wildcard
        } else {
            let group = self.group(group_ref)?;
            if group.id == cluster.owning_group {
                // Owner access is implicit; nothing to record.
                return Ok(());
            }
            info!(cluster = %cluster, group = %group.name, "granting group access");
            GrantTarget::Group(group.id)
        };
        self.store.add_group_to_cluster(&cluster.id, &target)?;
        Ok(())
    }

    /// Withdraw a group's (or the wildcard's) access to a cluster.
    pub fn revoke_cluster_access(
        &self,
        user: &User,
        cluster_ref: &str,
        group_ref: &str,
    ) -> ControlResult<()> {
        info!(user = %user.name, cluster = %cluster_ref, group = %group_ref, "cluster access revocation requested");
        let cluster = self.cluster(cluster_ref)?;
        self.require_owner_or_admin(user, &cluster)?;

        let target = if is_wildcard_reference(group_ref) {
            info!(cluster = %cluster, "removing universal group access");
            GrantTarget::Wildcard
        } else {
            let group = self.group(group_ref)?;
            if group.id == cluster.owning_group {
                return Err(ControlError::Validation(
                    "Cannot deny cluster access to owning Group".to_string(),
                ));
            }
            info!(cluster = %cluster, group = %group.name, "removing group access");
            GrantTarget::Group(group.id)
        };
        self.store.remove_group_from_cluster(&cluster.id, &target)?;
        Ok(())
    }

    /// Groups that may use a cluster, owner included.
    ///
    /// A wildcard grant lists as a single synthetic entry. Grants naming
    /// groups that no longer exist are skipped.
    pub fn list_allowed_groups(&self, user: &User, cluster_ref: &str) -> ControlResult<Vec<GroupSummary>> {
        info!(user = %user.name, cluster = %cluster_ref, "listing groups with cluster access");
        let cluster = self.cluster(cluster_ref)?;

        let granted = match self.store.list_groups_allowed_on_cluster(&cluster.id)? {
            GrantSet::Wildcard => {
                return Ok(vec![GroupSummary {
                    id: WILDCARD.to_string(),
                    name: WILDCARD_NAME.to_string(),
                }]);
            }
            GrantSet::Concrete(groups) => groups,
        };

        let mut ids = granted;
        ids.insert(cluster.owning_group.clone());
        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.find_group_by_id(&id)? {
                Some(group) => result.push(GroupSummary {
                    id: group.id,
                    name: group.name,
                }),
                None => warn!(cluster = %cluster, group_id = %id, "grant references unknown group"),
            }
        }
        Ok(result)
    }

    /// Permit a group to install an application (`*` for all) on a cluster.
    pub fn grant_application_access(
        &self,
        user: &User,
        cluster_ref: &str,
        group_ref: &str,
        application: &str,
    ) -> ControlResult<()> {
        info!(user = %user.name, cluster = %cluster_ref, group = %group_ref, %application, "application grant requested");
        let cluster = self.cluster(cluster_ref)?;
        let group = self.group(group_ref)?;
        self.require_owner_or_admin(user, &cluster)?;

        info!(cluster = %cluster, group = %group.name, %application, "granting application use");
        self.store
            .allow_group_to_use_application(&group.id, &cluster.id, application)?;
        Ok(())
    }

    /// Withdraw a group's permission to install an application (`*` for all).
    pub fn revoke_application_access(
        &self,
        user: &User,
        cluster_ref: &str,
        group_ref: &str,
        application: &str,
    ) -> ControlResult<()> {
        info!(user = %user.name, cluster = %cluster_ref, group = %group_ref, %application, "application revocation requested");
        let cluster = self.cluster(cluster_ref)?;
        let group = self.group(group_ref)?;
        self.require_owner_or_admin(user, &cluster)?;

        info!(cluster = %cluster, group = %group.name, %application, "revoking application use");
        self.store
            .deny_group_use_of_application(&group.id, &cluster.id, application)?;
        Ok(())
    }

    /// Applications a group may install on a cluster; `*` means any.
    ///
    /// Visible to admins, owning-group members, and members of the group
    /// being asked about.
    pub fn list_allowed_applications(
        &self,
        user: &User,
        cluster_ref: &str,
        group_ref: &str,
    ) -> ControlResult<Vec<String>> {
        info!(user = %user.name, cluster = %cluster_ref, group = %group_ref, "listing allowed applications");
        let cluster = self.cluster(cluster_ref)?;
        let group = self.group(group_ref)?;
        if !user.admin
            && !self.is_member(user, &cluster.owning_group)?
            && !self.is_member(user, &group.id)?
        {
            return Err(ControlError::not_authorized());
        }
        Ok(self
            .store
            .list_applications_group_may_use_on_cluster(&group.id, &cluster.id)?
            .names())
    }
}
