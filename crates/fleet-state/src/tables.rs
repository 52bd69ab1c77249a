//! redb table definitions for the fleet state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types,
//! or an empty value for pure set-membership tables).
//! Composite keys follow the pattern `{parent_id}:{child_id}`.

use redb::TableDefinition;

/// Shorthand for the single table shape used throughout the store.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Cluster records keyed by `{cluster_id}`.
pub const CLUSTERS: JsonTable = TableDefinition::new("clusters");

/// Cluster name index: `{cluster_name}` → `{cluster_id}`.
pub const CLUSTER_NAMES: JsonTable = TableDefinition::new("cluster_names");

/// Geographic locations keyed by `{cluster_id}`.
pub const CLUSTER_LOCATIONS: JsonTable = TableDefinition::new("cluster_locations");

/// Group access grants (a serialized `GrantSet`) keyed by `{cluster_id}`.
pub const CLUSTER_GRANTS: JsonTable = TableDefinition::new("cluster_grants");

/// Application permissions keyed by `{cluster_id}:{group_id}`.
pub const APP_PERMISSIONS: JsonTable = TableDefinition::new("app_permissions");

/// Group records keyed by `{group_id}`.
pub const GROUPS: JsonTable = TableDefinition::new("groups");

/// Group name index: `{group_name}` → `{group_id}`.
pub const GROUP_NAMES: JsonTable = TableDefinition::new("group_names");

/// User records keyed by `{user_id}`.
pub const USERS: JsonTable = TableDefinition::new("users");

/// Token index: `{token}` → `{user_id}`.
pub const USER_TOKENS: JsonTable = TableDefinition::new("user_tokens");

/// Group membership set keyed by `{group_id}:{user_id}` (empty values).
pub const GROUP_MEMBERS: JsonTable = TableDefinition::new("group_members");

/// Application instance records keyed by `{instance_id}`.
pub const INSTANCES: JsonTable = TableDefinition::new("instances");

/// Secret records keyed by `{secret_id}`.
pub const SECRETS: JsonTable = TableDefinition::new("secrets");

/// Reachability cache records keyed by `{cluster_id}`.
pub const REACHABILITY: JsonTable = TableDefinition::new("reachability");

/// Every table, so `ensure_tables` cannot miss one.
pub const ALL_TABLES: [JsonTable; 13] = [
    CLUSTERS,
    CLUSTER_NAMES,
    CLUSTER_LOCATIONS,
    CLUSTER_GRANTS,
    APP_PERMISSIONS,
    GROUPS,
    GROUP_NAMES,
    USERS,
    USER_TOKENS,
    GROUP_MEMBERS,
    INSTANCES,
    SECRETS,
    REACHABILITY,
];
