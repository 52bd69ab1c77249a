//! Domain types for the fleet state store.
//!
//! These types represent the persisted state of clusters, groups, users,
//! application instances, and secrets, plus the two access-control
//! representations (`GrantSet`, `AppPermissions`). All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a cluster (`cluster_…`).
pub type ClusterId = String;

/// Unique identifier for a group (`group_…`).
pub type GroupId = String;

/// Unique identifier for a user (`user_…`).
pub type UserId = String;

pub const CLUSTER_ID_PREFIX: &str = "cluster_";
pub const GROUP_ID_PREFIX: &str = "group_";
pub const USER_ID_PREFIX: &str = "user_";
pub const INSTANCE_ID_PREFIX: &str = "instance_";
pub const SECRET_ID_PREFIX: &str = "secret_";

/// Reserved group identifier meaning "every group".
pub const WILDCARD: &str = "*";

/// Reserved display name for the wildcard group.
pub const WILDCARD_NAME: &str = "<all>";

/// Prefix of the namespace every group gets on every cluster.
pub const GROUP_NAMESPACE_PREFIX: &str = "fleet-group-";

/// Generate a fresh identifier with the given prefix.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}

/// Current time rendered the way records store creation times.
pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%b-%d %H:%M:%S UTC").to_string()
}

/// Whether a group reference names the wildcard, by id or display name.
pub fn is_wildcard_reference(reference: &str) -> bool {
    reference == WILDCARD || reference == WILDCARD_NAME
}

// ── User ──────────────────────────────────────────────────────────

/// An authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Bearer token presented as the `token` query parameter.
    pub token: String,
    /// System administrators bypass group-membership checks.
    pub admin: bool,
}

// ── Group ─────────────────────────────────────────────────────────

/// An administrative/ownership unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub email: String,
}

impl Group {
    /// The namespace this group owns on every cluster.
    pub fn namespace_name(&self) -> String {
        format!("{GROUP_NAMESPACE_PREFIX}{}", self.name)
    }
}

// ── Cluster ───────────────────────────────────────────────────────

/// A registered remote cluster.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub owning_group: GroupId,
    pub owning_organization: String,
    /// The credential bundle (kubeconfig) used to reach the cluster.
    pub config: String,
    /// Namespace the credential bundle defaults into.
    pub system_namespace: String,
    pub valid: bool,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owning_group", &self.owning_group)
            .field("owning_organization", &self.owning_organization)
            .field("system_namespace", &self.system_namespace)
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

/// A geographic location of a cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
}

// ── Application instance ──────────────────────────────────────────

/// One desired deployment of an application on a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationInstance {
    pub id: String,
    /// Group-qualified release name as seen by the package manager.
    pub name: String,
    pub application: String,
    pub owning_group: GroupId,
    pub cluster: ClusterId,
    pub created: String,
    /// Values the instance was installed with.
    #[serde(default)]
    pub configuration: String,
}

// ── Secret ────────────────────────────────────────────────────────

/// A group-owned secret placed in the group's namespace on a cluster.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Secret {
    pub id: String,
    pub name: String,
    pub group: GroupId,
    pub cluster: ClusterId,
    pub created: String,
    pub contents: BTreeMap<String, String>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("group", &self.group)
            .field("cluster", &self.cluster)
            .field("keys", &self.contents.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// ── Access grants ─────────────────────────────────────────────────

/// Which groups other than the owner may use a cluster.
///
/// The owning group is never stored here; it has implicit access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "groups", rename_all = "snake_case")]
pub enum GrantSet {
    Wildcard,
    Concrete(BTreeSet<GroupId>),
}

impl Default for GrantSet {
    fn default() -> Self {
        GrantSet::Concrete(BTreeSet::new())
    }
}

/// The subject of a grant or revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantTarget {
    Wildcard,
    Group(GroupId),
}

impl GrantSet {
    /// Apply a grant. Returns whether the set changed.
    ///
    /// A wildcard grant replaces any concrete grants. A concrete grant is
    /// absorbed by an existing wildcard.
    pub fn grant(&mut self, target: &GrantTarget) -> bool {
        match target {
            GrantTarget::Wildcard => {
                if self.is_wildcard() {
                    return false;
                }
                *self = GrantSet::Wildcard;
                true
            }
            GrantTarget::Group(id) => match self {
                GrantSet::Wildcard => false,
                GrantSet::Concrete(groups) => groups.insert(id.clone()),
            },
        }
    }

    /// Apply a revocation. Returns whether the set changed.
    pub fn revoke(&mut self, target: &GrantTarget) -> bool {
        match target {
            GrantTarget::Wildcard => {
                if !self.is_wildcard() {
                    return false;
                }
                *self = GrantSet::default();
                true
            }
            GrantTarget::Group(id) => match self {
                GrantSet::Wildcard => false,
                GrantSet::Concrete(groups) => groups.remove(id),
            },
        }
    }

    /// Whether the set (not counting implicit owner access) admits a group.
    pub fn admits(&self, group_id: &str) -> bool {
        match self {
            GrantSet::Wildcard => true,
            GrantSet::Concrete(groups) => groups.contains(group_id),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, GrantSet::Wildcard)
    }
}

/// Which applications a group may deploy on a cluster.
///
/// An absent record is equivalent to `Any`; cluster access is checked
/// separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "applications", rename_all = "snake_case")]
pub enum AppPermissions {
    Any,
    Only(BTreeSet<String>),
}

impl Default for AppPermissions {
    fn default() -> Self {
        AppPermissions::Any
    }
}

impl AppPermissions {
    /// Permit an application. `*` lifts all restrictions; a named
    /// application restricts an unrestricted set to just that application.
    pub fn allow(&mut self, application: &str) {
        if application == WILDCARD {
            *self = AppPermissions::Any;
            return;
        }
        match self {
            AppPermissions::Any => {
                *self = AppPermissions::Only(BTreeSet::from([application.to_string()]));
            }
            AppPermissions::Only(apps) => {
                apps.insert(application.to_string());
            }
        }
    }

    /// Withdraw an application. `*` denies everything. Returns whether the
    /// permissions changed.
    pub fn deny(&mut self, application: &str) -> bool {
        if application == WILDCARD {
            let changed = *self != AppPermissions::Only(BTreeSet::new());
            *self = AppPermissions::Only(BTreeSet::new());
            return changed;
        }
        match self {
            AppPermissions::Any => false,
            AppPermissions::Only(apps) => apps.remove(application),
        }
    }

    pub fn permits(&self, application: &str) -> bool {
        match self {
            AppPermissions::Any => true,
            AppPermissions::Only(apps) => apps.contains(application),
        }
    }

    /// Names for listing; an unrestricted set lists as the wildcard.
    pub fn names(&self) -> Vec<String> {
        match self {
            AppPermissions::Any => vec![WILDCARD.to_string()],
            AppPermissions::Only(apps) => apps.iter().cloned().collect(),
        }
    }
}

// ── Reachability cache ────────────────────────────────────────────

/// A cached reachability answer with its expiry (unix seconds).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ReachabilityRecord {
    pub reachable: bool,
    pub expires_at: u64,
}
