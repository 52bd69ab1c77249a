//! StateStore — redb-backed state persistence for the fleet control plane.
//!
//! Provides typed CRUD operations over clusters, groups, users, instances,
//! secrets, access grants, application permissions, and the reachability
//! cache. All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::{Path, PathBuf};
use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Default lifetime of a cached reachability answer.
pub const DEFAULT_REACHABILITY_TTL: Duration = Duration::from_secs(30 * 60);

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Directory holding materialized credential bundles.
    config_dir: PathBuf,
    /// Owns `config_dir` for in-memory stores; removed with the last clone.
    _scratch: Option<Arc<tempfile::TempDir>>,
    reachability_ttl: Duration,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// Credential bundles are materialized in a `kubeconfigs` directory next
    /// to the database file.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let config_dir = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("kubeconfigs");
        let store = Self {
            db: Arc::new(db),
            config_dir,
            _scratch: None,
            reachability_ttl: DEFAULT_REACHABILITY_TTL,
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    ///
    /// Credential bundles still need real files, so they go to a temporary
    /// directory that lives as long as the store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let scratch = tempfile::Builder::new()
            .prefix("fleet-kubeconfigs-")
            .tempdir()
            .map_err(StateError::bundle(std::env::temp_dir()))?;
        let store = Self {
            db: Arc::new(db),
            config_dir: scratch.path().to_path_buf(),
            _scratch: Some(Arc::new(scratch)),
            reachability_ttl: DEFAULT_REACHABILITY_TTL,
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Set how long cached reachability answers stay valid.
    pub fn with_reachability_ttl(mut self, ttl: Duration) -> Self {
        self.reachability_ttl = ttl;
        self
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in ALL_TABLES {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Read every value whose key passes `keep`.
    fn scan_json<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        keep: impl Fn(&str) -> bool,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if keep(key.value()) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn scan_keys(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                keys.push(key.value().to_string());
            }
        }
        Ok(keys)
    }

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn remove_key(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Read a value inside an open write transaction.
    fn txn_get<T: DeserializeOwned>(
        txn: &WriteTransaction,
        table: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let bytes = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        match bytes {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?,
            )),
            None => Ok(None),
        }
    }

    fn txn_put<T: Serialize>(
        txn: &WriteTransaction,
        table: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = txn.open_table(table).map_err(map_err!(Table))?;
        table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        Ok(())
    }

    fn txn_remove(txn: &WriteTransaction, table: JsonTable, key: &str) -> StateResult<bool> {
        let mut table = txn.open_table(table).map_err(map_err!(Table))?;
        Ok(table.remove(key).map_err(map_err!(Write))?.is_some())
    }

    /// Remove every key starting with `prefix` inside an open write transaction.
    fn txn_remove_prefix(txn: &WriteTransaction, table: JsonTable, prefix: &str) -> StateResult<u32> {
        let mut table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                keys.push(key.value().to_string());
            }
        }
        for key in &keys {
            table.remove(key.as_str()).map_err(map_err!(Write))?;
        }
        Ok(keys.len() as u32)
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert a new cluster. Returns false if the id or name is taken.
    pub fn add_cluster(&self, cluster: &Cluster) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        if Self::txn_get::<Cluster>(&txn, CLUSTERS, &cluster.id)?.is_some()
            || Self::txn_get::<String>(&txn, CLUSTER_NAMES, &cluster.name)?.is_some()
        {
            txn.abort().map_err(map_err!(Transaction))?;
            debug!(cluster_id = %cluster.id, name = %cluster.name, "cluster id or name already in use");
            return Ok(false);
        }
        Self::txn_put(&txn, CLUSTERS, &cluster.id, cluster)?;
        Self::txn_put(&txn, CLUSTER_NAMES, &cluster.name, &cluster.id)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %cluster.id, "cluster stored");
        Ok(true)
    }

    /// Overwrite an existing cluster record. Returns false if it does not exist.
    pub fn update_cluster(&self, cluster: &Cluster) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let Some(previous) = Self::txn_get::<Cluster>(&txn, CLUSTERS, &cluster.id)? else {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(false);
        };
        if previous.name != cluster.name {
            Self::txn_remove(&txn, CLUSTER_NAMES, &previous.name)?;
            Self::txn_put(&txn, CLUSTER_NAMES, &cluster.name, &cluster.id)?;
        }
        Self::txn_put(&txn, CLUSTERS, &cluster.id, cluster)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %cluster.id, "cluster updated");
        Ok(true)
    }

    /// Delete a cluster and everything keyed by it. Returns true if it existed.
    pub fn remove_cluster(&self, cluster_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let Some(cluster) = Self::txn_get::<Cluster>(&txn, CLUSTERS, cluster_id)? else {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(false);
        };
        Self::txn_remove(&txn, CLUSTERS, cluster_id)?;
        Self::txn_remove(&txn, CLUSTER_NAMES, &cluster.name)?;
        Self::txn_remove(&txn, CLUSTER_LOCATIONS, cluster_id)?;
        Self::txn_remove(&txn, CLUSTER_GRANTS, cluster_id)?;
        Self::txn_remove(&txn, REACHABILITY, cluster_id)?;
        Self::txn_remove_prefix(&txn, APP_PERMISSIONS, &format!("{cluster_id}:"))?;
        txn.commit().map_err(map_err!(Transaction))?;

        let config_path = self.config_dir.join(cluster_id);
        if config_path.exists() {
            if let Err(e) = std::fs::remove_file(&config_path) {
                warn!(error = %e, path = ?config_path, "failed to remove credential bundle file");
            }
        }
        debug!(%cluster_id, "cluster deleted");
        Ok(true)
    }

    /// Get a cluster by id.
    pub fn get_cluster(&self, cluster_id: &str) -> StateResult<Option<Cluster>> {
        self.get_json(CLUSTERS, cluster_id)
    }

    /// Get a cluster by its unique name.
    pub fn find_cluster_by_name(&self, name: &str) -> StateResult<Option<Cluster>> {
        match self.get_json::<String>(CLUSTER_NAMES, name)? {
            Some(id) => self.get_cluster(&id),
            None => Ok(None),
        }
    }

    /// Resolve a cluster reference that may be either an id or a name.
    pub fn resolve_cluster(&self, reference: &str) -> StateResult<Option<Cluster>> {
        if reference.starts_with(CLUSTER_ID_PREFIX) {
            if let Some(cluster) = self.get_cluster(reference)? {
                return Ok(Some(cluster));
            }
        }
        self.find_cluster_by_name(reference)
    }

    /// List all clusters.
    pub fn list_clusters(&self) -> StateResult<Vec<Cluster>> {
        self.scan_json(CLUSTERS, |_| true)
    }

    /// List clusters a group owns or may use.
    pub fn list_clusters_by_group(&self, group_id: &str) -> StateResult<Vec<Cluster>> {
        let mut results = Vec::new();
        for cluster in self.list_clusters()? {
            if cluster.owning_group == group_id
                || self.list_groups_allowed_on_cluster(&cluster.id)?.admits(group_id)
            {
                results.push(cluster);
            }
        }
        Ok(results)
    }

    /// Geographic locations recorded for a cluster.
    pub fn get_locations_for_cluster(&self, cluster_id: &str) -> StateResult<Vec<GeoLocation>> {
        Ok(self
            .get_json(CLUSTER_LOCATIONS, cluster_id)?
            .unwrap_or_default())
    }

    /// Replace the locations recorded for a cluster.
    pub fn set_locations_for_cluster(
        &self,
        cluster_id: &str,
        locations: &[GeoLocation],
    ) -> StateResult<()> {
        self.put_json(CLUSTER_LOCATIONS, cluster_id, &locations)
    }

    /// Materialize a cluster's credential bundle and return its path.
    ///
    /// The file is rewritten only when its contents differ from the record.
    /// A new copy is written beside the old one and renamed over it, so
    /// concurrent readers see either the old bundle or the new one.
    pub fn config_path_for_cluster(&self, cluster_id: &str) -> StateResult<PathBuf> {
        let cluster = self
            .get_cluster(cluster_id)?
            .ok_or_else(|| StateError::UnknownCluster(cluster_id.to_string()))?;
        std::fs::create_dir_all(&self.config_dir).map_err(StateError::bundle(&self.config_dir))?;
        let path = self.config_dir.join(cluster_id);
        let current = std::fs::read_to_string(&path).ok();
        if current.as_deref() != Some(cluster.config.as_str()) {
            // Created with owner-only permissions.
            let mut staged =
                tempfile::NamedTempFile::new_in(&self.config_dir).map_err(StateError::bundle(&path))?;
            staged
                .write_all(cluster.config.as_bytes())
                .map_err(StateError::bundle(&path))?;
            staged
                .persist(&path)
                .map_err(|e| StateError::bundle(&path)(e.error))?;
            debug!(%cluster_id, ?path, "credential bundle written");
        }
        Ok(path)
    }

    // ── Groups ─────────────────────────────────────────────────────

    /// Insert or update a group.
    pub fn put_group(&self, group: &Group) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        if let Some(previous) = Self::txn_get::<Group>(&txn, GROUPS, &group.id)? {
            if previous.name != group.name {
                Self::txn_remove(&txn, GROUP_NAMES, &previous.name)?;
            }
        }
        Self::txn_put(&txn, GROUPS, &group.id, group)?;
        Self::txn_put(&txn, GROUP_NAMES, &group.name, &group.id)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(group_id = %group.id, name = %group.name, "group stored");
        Ok(())
    }

    pub fn find_group_by_id(&self, group_id: &str) -> StateResult<Option<Group>> {
        self.get_json(GROUPS, group_id)
    }

    pub fn find_group_by_name(&self, name: &str) -> StateResult<Option<Group>> {
        match self.get_json::<String>(GROUP_NAMES, name)? {
            Some(id) => self.find_group_by_id(&id),
            None => Ok(None),
        }
    }

    /// Resolve a group reference that may be either an id or a name.
    pub fn get_group(&self, reference: &str) -> StateResult<Option<Group>> {
        if reference.starts_with(GROUP_ID_PREFIX) {
            if let Some(group) = self.find_group_by_id(reference)? {
                return Ok(Some(group));
            }
        }
        self.find_group_by_name(reference)
    }

    pub fn list_groups(&self) -> StateResult<Vec<Group>> {
        self.scan_json(GROUPS, |_| true)
    }

    // ── Users ──────────────────────────────────────────────────────

    /// Insert or update a user, keeping the token index current.
    pub fn put_user(&self, user: &User) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        if let Some(previous) = Self::txn_get::<User>(&txn, USERS, &user.id)? {
            if previous.token != user.token {
                Self::txn_remove(&txn, USER_TOKENS, &previous.token)?;
            }
        }
        Self::txn_put(&txn, USERS, &user.id, user)?;
        Self::txn_put(&txn, USER_TOKENS, &user.token, &user.id)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(user_id = %user.id, "user stored");
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> StateResult<Option<User>> {
        self.get_json(USERS, user_id)
    }

    /// Look up the user presenting a bearer token.
    pub fn find_user_by_token(&self, token: &str) -> StateResult<Option<User>> {
        match self.get_json::<String>(USER_TOKENS, token)? {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    pub fn add_user_to_group(&self, user_id: &str, group_id: &str) -> StateResult<()> {
        self.put_json(GROUP_MEMBERS, &format!("{group_id}:{user_id}"), &())
    }

    pub fn remove_user_from_group(&self, user_id: &str, group_id: &str) -> StateResult<bool> {
        self.remove_key(GROUP_MEMBERS, &format!("{group_id}:{user_id}"))
    }

    pub fn user_in_group(&self, user_id: &str, group_id: &str) -> StateResult<bool> {
        Ok(self
            .get_json::<()>(GROUP_MEMBERS, &format!("{group_id}:{user_id}"))?
            .is_some())
    }

    /// Ids of every member of a group.
    pub fn list_group_members(&self, group_id: &str) -> StateResult<Vec<UserId>> {
        let prefix = format!("{group_id}:");
        Ok(self
            .scan_keys(GROUP_MEMBERS, &prefix)?
            .into_iter()
            .map(|key| key[prefix.len()..].to_string())
            .collect())
    }

    // ── Application instances ──────────────────────────────────────

    pub fn put_instance(&self, instance: &ApplicationInstance) -> StateResult<()> {
        self.put_json(INSTANCES, &instance.id, instance)?;
        debug!(instance_id = %instance.id, name = %instance.name, "instance stored");
        Ok(())
    }

    pub fn get_instance(&self, instance_id: &str) -> StateResult<Option<ApplicationInstance>> {
        self.get_json(INSTANCES, instance_id)
    }

    pub fn remove_instance(&self, instance_id: &str) -> StateResult<bool> {
        let existed = self.remove_key(INSTANCES, instance_id)?;
        debug!(%instance_id, existed, "instance deleted");
        Ok(existed)
    }

    pub fn list_application_instances(&self) -> StateResult<Vec<ApplicationInstance>> {
        self.scan_json(INSTANCES, |_| true)
    }

    /// List instances, optionally filtered by owning group and/or cluster.
    pub fn list_application_instances_by_cluster_or_group(
        &self,
        group_id: Option<&str>,
        cluster_id: Option<&str>,
    ) -> StateResult<Vec<ApplicationInstance>> {
        Ok(self
            .list_application_instances()?
            .into_iter()
            .filter(|i| group_id.is_none_or(|g| i.owning_group == g))
            .filter(|i| cluster_id.is_none_or(|c| i.cluster == c))
            .collect())
    }

    // ── Secrets ────────────────────────────────────────────────────

    pub fn put_secret(&self, secret: &Secret) -> StateResult<()> {
        self.put_json(SECRETS, &secret.id, secret)?;
        debug!(secret_id = %secret.id, name = %secret.name, "secret stored");
        Ok(())
    }

    pub fn get_secret(&self, secret_id: &str) -> StateResult<Option<Secret>> {
        self.get_json(SECRETS, secret_id)
    }

    pub fn remove_secret(&self, secret_id: &str) -> StateResult<bool> {
        let existed = self.remove_key(SECRETS, secret_id)?;
        debug!(%secret_id, existed, "secret deleted");
        Ok(existed)
    }

    /// List secrets, optionally filtered by owning group and/or cluster.
    pub fn list_secrets(
        &self,
        group_id: Option<&str>,
        cluster_id: Option<&str>,
    ) -> StateResult<Vec<Secret>> {
        Ok(self
            .scan_json::<Secret>(SECRETS, |_| true)?
            .into_iter()
            .filter(|s| group_id.is_none_or(|g| s.group == g))
            .filter(|s| cluster_id.is_none_or(|c| s.cluster == c))
            .collect())
    }

    // ── Access grants ──────────────────────────────────────────────

    /// The explicit grants recorded for a cluster (owner not included).
    pub fn list_groups_allowed_on_cluster(&self, cluster_id: &str) -> StateResult<GrantSet> {
        Ok(self.get_json(CLUSTER_GRANTS, cluster_id)?.unwrap_or_default())
    }

    /// Grant access in a single transaction. Returns whether anything changed.
    pub fn add_group_to_cluster(&self, cluster_id: &str, target: &GrantTarget) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut grants: GrantSet = Self::txn_get(&txn, CLUSTER_GRANTS, cluster_id)?.unwrap_or_default();
        let changed = grants.grant(target);
        if changed {
            Self::txn_put(&txn, CLUSTER_GRANTS, cluster_id, &grants)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%cluster_id, ?target, changed, "cluster access granted");
        Ok(changed)
    }

    /// Revoke access in a single transaction. Revoking a concrete group also
    /// drops its application permissions on the cluster.
    pub fn remove_group_from_cluster(
        &self,
        cluster_id: &str,
        target: &GrantTarget,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut grants: GrantSet = Self::txn_get(&txn, CLUSTER_GRANTS, cluster_id)?.unwrap_or_default();
        let changed = grants.revoke(target);
        if changed {
            Self::txn_put(&txn, CLUSTER_GRANTS, cluster_id, &grants)?;
        }
        if let GrantTarget::Group(group_id) = target {
            Self::txn_remove(&txn, APP_PERMISSIONS, &format!("{cluster_id}:{group_id}"))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%cluster_id, ?target, changed, "cluster access revoked");
        Ok(changed)
    }

    // ── Application permissions ────────────────────────────────────

    pub fn list_applications_group_may_use_on_cluster(
        &self,
        group_id: &str,
        cluster_id: &str,
    ) -> StateResult<AppPermissions> {
        Ok(self
            .get_json(APP_PERMISSIONS, &format!("{cluster_id}:{group_id}"))?
            .unwrap_or_default())
    }

    pub fn allow_group_to_use_application(
        &self,
        group_id: &str,
        cluster_id: &str,
        application: &str,
    ) -> StateResult<()> {
        self.modify_app_permissions(group_id, cluster_id, |perms| {
            perms.allow(application);
            true
        })
        .map(|_| ())
    }

    /// Returns whether the permissions changed.
    pub fn deny_group_use_of_application(
        &self,
        group_id: &str,
        cluster_id: &str,
        application: &str,
    ) -> StateResult<bool> {
        self.modify_app_permissions(group_id, cluster_id, |perms| perms.deny(application))
    }

    fn modify_app_permissions(
        &self,
        group_id: &str,
        cluster_id: &str,
        apply: impl FnOnce(&mut AppPermissions) -> bool,
    ) -> StateResult<bool> {
        let key = format!("{cluster_id}:{group_id}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut perms: AppPermissions = Self::txn_get(&txn, APP_PERMISSIONS, &key)?.unwrap_or_default();
        let changed = apply(&mut perms);
        Self::txn_put(&txn, APP_PERMISSIONS, &key, &perms)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, ?perms, "application permissions stored");
        Ok(changed)
    }

    // ── Reachability cache ─────────────────────────────────────────

    /// Record a fresh reachability answer.
    pub fn cache_cluster_reachability(&self, cluster_id: &str, reachable: bool) -> StateResult<()> {
        let record = ReachabilityRecord {
            reachable,
            expires_at: epoch_secs() + self.reachability_ttl.as_secs(),
        };
        self.put_json(REACHABILITY, cluster_id, &record)
    }

    /// A cached reachability answer, if one exists and has not expired.
    pub fn get_cached_cluster_reachability(&self, cluster_id: &str) -> StateResult<Option<bool>> {
        let record: Option<ReachabilityRecord> = self.get_json(REACHABILITY, cluster_id)?;
        Ok(record
            .filter(|r| r.expires_at > epoch_secs())
            .map(|r| r.reachable))
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_cluster(id: &str, name: &str, group: &str) -> Cluster {
        Cluster {
            id: id.to_string(),
            name: name.to_string(),
            owning_group: group.to_string(),
            owning_organization: "Example University".to_string(),
            config: format!("apiVersion: v1\nkind: Config\n# {name}\n"),
            system_namespace: "fleet-system".to_string(),
            valid: true,
        }
    }

    fn test_group(id: &str, name: &str) -> Group {
        Group {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{name}@example.org"),
        }
    }

    fn test_instance(id: &str, name: &str, cluster: &str, group: &str) -> ApplicationInstance {
        ApplicationInstance {
            id: id.to_string(),
            name: name.to_string(),
            application: "nginx".to_string(),
            owning_group: group.to_string(),
            cluster: cluster.to_string(),
            created: "2026-Jan-01 00:00:00 UTC".to_string(),
            configuration: String::new(),
        }
    }

    fn test_secret(id: &str, name: &str, cluster: &str, group: &str) -> Secret {
        Secret {
            id: id.to_string(),
            name: name.to_string(),
            group: group.to_string(),
            cluster: cluster.to_string(),
            created: "2026-Jan-01 00:00:00 UTC".to_string(),
            contents: BTreeMap::from([("key".to_string(), "value".to_string())]),
        }
    }

    // ── Cluster CRUD ───────────────────────────────────────────────

    #[test]
    fn cluster_add_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = test_cluster("cluster_1", "umich", "group_a");

        assert!(store.add_cluster(&cluster).unwrap());
        assert_eq!(store.get_cluster("cluster_1").unwrap(), Some(cluster.clone()));
        assert_eq!(store.find_cluster_by_name("umich").unwrap(), Some(cluster));
    }

    #[test]
    fn cluster_add_rejects_duplicate_name() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.add_cluster(&test_cluster("cluster_1", "umich", "group_a")).unwrap());
        assert!(!store.add_cluster(&test_cluster("cluster_2", "umich", "group_a")).unwrap());
        assert!(store.get_cluster("cluster_2").unwrap().is_none());
    }

    #[test]
    fn cluster_update_and_remove() {
        let store = StateStore::open_in_memory().unwrap();
        let mut cluster = test_cluster("cluster_1", "umich", "group_a");
        store.add_cluster(&cluster).unwrap();

        cluster.owning_organization = "Other Org".to_string();
        assert!(store.update_cluster(&cluster).unwrap());
        assert_eq!(
            store.get_cluster("cluster_1").unwrap().unwrap().owning_organization,
            "Other Org"
        );

        assert!(store.remove_cluster("cluster_1").unwrap());
        assert!(!store.remove_cluster("cluster_1").unwrap());
        assert!(store.find_cluster_by_name("umich").unwrap().is_none());
        assert!(!store.update_cluster(&cluster).unwrap());
    }

    #[test]
    fn remove_cluster_drops_grants_and_permissions() {
        let store = StateStore::open_in_memory().unwrap();
        store.add_cluster(&test_cluster("cluster_1", "umich", "group_a")).unwrap();
        store
            .add_group_to_cluster("cluster_1", &GrantTarget::Group("group_b".into()))
            .unwrap();
        store
            .allow_group_to_use_application("group_b", "cluster_1", "nginx")
            .unwrap();
        store.remove_cluster("cluster_1").unwrap();

        assert_eq!(
            store.list_groups_allowed_on_cluster("cluster_1").unwrap(),
            GrantSet::default()
        );
        assert_eq!(
            store
                .list_applications_group_may_use_on_cluster("group_b", "cluster_1")
                .unwrap(),
            AppPermissions::Any
        );
    }

    #[test]
    fn resolve_cluster_by_id_or_name() {
        let store = StateStore::open_in_memory().unwrap();
        store.add_cluster(&test_cluster("cluster_1", "umich", "group_a")).unwrap();
        assert!(store.resolve_cluster("cluster_1").unwrap().is_some());
        assert!(store.resolve_cluster("umich").unwrap().is_some());
        assert!(store.resolve_cluster("nope").unwrap().is_none());
    }

    #[test]
    fn clusters_listed_by_group_include_grants() {
        let store = StateStore::open_in_memory().unwrap();
        store.add_cluster(&test_cluster("cluster_1", "owned", "group_a")).unwrap();
        store.add_cluster(&test_cluster("cluster_2", "granted", "group_b")).unwrap();
        store.add_cluster(&test_cluster("cluster_3", "open", "group_b")).unwrap();
        store.add_cluster(&test_cluster("cluster_4", "closed", "group_b")).unwrap();
        store
            .add_group_to_cluster("cluster_2", &GrantTarget::Group("group_a".into()))
            .unwrap();
        store
            .add_group_to_cluster("cluster_3", &GrantTarget::Wildcard)
            .unwrap();

        let mut names: Vec<String> = store
            .list_clusters_by_group("group_a")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["granted", "open", "owned"]);
    }

    #[test]
    fn locations_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_locations_for_cluster("cluster_1").unwrap().is_empty());
        let locations = vec![GeoLocation { lat: 42.28, lon: -83.74 }];
        store.set_locations_for_cluster("cluster_1", &locations).unwrap();
        assert_eq!(store.get_locations_for_cluster("cluster_1").unwrap(), locations);
    }

    #[test]
    fn config_path_materializes_bundle() {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = test_cluster("cluster_1", "umich", "group_a");
        store.add_cluster(&cluster).unwrap();

        let path = store.config_path_for_cluster("cluster_1").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), cluster.config);

        store.remove_cluster("cluster_1").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn config_path_for_missing_cluster_is_unknown() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.config_path_for_cluster("cluster_nope").unwrap_err();
        assert!(matches!(err, StateError::UnknownCluster(ref id) if id == "cluster_nope"));
    }

    #[test]
    fn in_memory_bundle_directory_is_removed_with_last_clone() {
        let store = StateStore::open_in_memory().unwrap();
        store.add_cluster(&test_cluster("cluster_1", "umich", "group_a")).unwrap();
        let path = store.config_path_for_cluster("cluster_1").unwrap();
        let dir = path.parent().unwrap().to_path_buf();

        let clone = store.clone();
        drop(store);
        assert!(path.exists());
        drop(clone);
        assert!(!dir.exists());
    }

    #[test]
    fn bundle_update_replaces_file() {
        let store = StateStore::open_in_memory().unwrap();
        let mut cluster = test_cluster("cluster_1", "umich", "group_a");
        store.add_cluster(&cluster).unwrap();
        let path = store.config_path_for_cluster("cluster_1").unwrap();

        cluster.config = "apiVersion: v1\nkind: Config\n# rotated\n".to_string();
        store.update_cluster(&cluster).unwrap();
        assert_eq!(store.config_path_for_cluster("cluster_1").unwrap(), path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), cluster.config);

        // Only the bundle itself remains; no staging files are left behind.
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[cfg(unix)]
    #[test]
    fn bundle_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let store = StateStore::open_in_memory().unwrap();
        store.add_cluster(&test_cluster("cluster_1", "umich", "group_a")).unwrap();
        let path = store.config_path_for_cluster("cluster_1").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    // ── Groups & users ─────────────────────────────────────────────

    #[test]
    fn group_lookup_by_id_and_name() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_group(&test_group("group_a", "physics")).unwrap();

        assert!(store.find_group_by_id("group_a").unwrap().is_some());
        assert!(store.find_group_by_name("physics").unwrap().is_some());
        assert_eq!(store.get_group("physics").unwrap().unwrap().id, "group_a");
        assert_eq!(store.get_group("group_a").unwrap().unwrap().name, "physics");
        assert!(store.get_group("chemistry").unwrap().is_none());
    }

    #[test]
    fn group_rename_moves_name_index() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_group(&test_group("group_a", "physics")).unwrap();
        store.put_group(&test_group("group_a", "astro")).unwrap();
        assert!(store.find_group_by_name("physics").unwrap().is_none());
        assert!(store.find_group_by_name("astro").unwrap().is_some());
    }

    #[test]
    fn user_token_and_membership() {
        let store = StateStore::open_in_memory().unwrap();
        let user = User {
            id: "user_1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.org".to_string(),
            token: "tok-1".to_string(),
            admin: false,
        };
        store.put_user(&user).unwrap();
        assert_eq!(store.find_user_by_token("tok-1").unwrap(), Some(user.clone()));
        assert!(store.find_user_by_token("tok-2").unwrap().is_none());

        assert!(!store.user_in_group("user_1", "group_a").unwrap());
        store.add_user_to_group("user_1", "group_a").unwrap();
        assert!(store.user_in_group("user_1", "group_a").unwrap());
        assert_eq!(store.list_group_members("group_a").unwrap(), vec!["user_1"]);
        assert!(store.remove_user_from_group("user_1", "group_a").unwrap());
        assert!(!store.user_in_group("user_1", "group_a").unwrap());
    }

    #[test]
    fn rotated_token_invalidates_old_one() {
        let store = StateStore::open_in_memory().unwrap();
        let mut user = User {
            id: "user_1".to_string(),
            name: "Ada".to_string(),
            email: String::new(),
            token: "old".to_string(),
            admin: true,
        };
        store.put_user(&user).unwrap();
        user.token = "new".to_string();
        store.put_user(&user).unwrap();
        assert!(store.find_user_by_token("old").unwrap().is_none());
        assert!(store.find_user_by_token("new").unwrap().is_some());
    }

    // ── Instances & secrets ────────────────────────────────────────

    #[test]
    fn instances_filtered_by_cluster_and_group() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("instance_1", "a", "cluster_1", "group_a")).unwrap();
        store.put_instance(&test_instance("instance_2", "b", "cluster_1", "group_b")).unwrap();
        store.put_instance(&test_instance("instance_3", "c", "cluster_2", "group_a")).unwrap();

        assert_eq!(store.list_application_instances().unwrap().len(), 3);
        assert_eq!(
            store
                .list_application_instances_by_cluster_or_group(None, Some("cluster_1"))
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            store
                .list_application_instances_by_cluster_or_group(Some("group_a"), Some("cluster_1"))
                .unwrap()
                .len(),
            1
        );
        assert!(store.remove_instance("instance_1").unwrap());
        assert!(store.get_instance("instance_1").unwrap().is_none());
    }

    #[test]
    fn secrets_filtered_by_cluster() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_secret(&test_secret("secret_1", "db", "cluster_1", "group_a")).unwrap();
        store.put_secret(&test_secret("secret_2", "api", "cluster_2", "group_a")).unwrap();

        let on_cluster = store.list_secrets(None, Some("cluster_1")).unwrap();
        assert_eq!(on_cluster.len(), 1);
        assert_eq!(on_cluster[0].name, "db");
        assert!(store.remove_secret("secret_1").unwrap());
        assert!(store.list_secrets(None, Some("cluster_1")).unwrap().is_empty());
    }

    // ── Grants & permissions ───────────────────────────────────────

    #[test]
    fn wildcard_grant_is_exclusive() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .add_group_to_cluster("cluster_1", &GrantTarget::Group("group_b".into()))
            .unwrap();
        assert!(store.add_group_to_cluster("cluster_1", &GrantTarget::Wildcard).unwrap());
        assert_eq!(
            store.list_groups_allowed_on_cluster("cluster_1").unwrap(),
            GrantSet::Wildcard
        );
        assert!(store.remove_group_from_cluster("cluster_1", &GrantTarget::Wildcard).unwrap());
        assert_eq!(
            store.list_groups_allowed_on_cluster("cluster_1").unwrap(),
            GrantSet::default()
        );
    }

    #[test]
    fn revoking_group_clears_its_application_permissions() {
        let store = StateStore::open_in_memory().unwrap();
        let group_b = GrantTarget::Group("group_b".into());
        store.add_group_to_cluster("cluster_1", &group_b).unwrap();
        store
            .allow_group_to_use_application("group_b", "cluster_1", "nginx")
            .unwrap();
        assert!(!store
            .list_applications_group_may_use_on_cluster("group_b", "cluster_1")
            .unwrap()
            .permits("mysql"));

        assert!(store.remove_group_from_cluster("cluster_1", &group_b).unwrap());
        assert_eq!(
            store
                .list_applications_group_may_use_on_cluster("group_b", "cluster_1")
                .unwrap(),
            AppPermissions::Any
        );
    }

    #[test]
    fn deny_application_reports_change() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .allow_group_to_use_application("group_b", "cluster_1", "nginx")
            .unwrap();
        assert!(store
            .deny_group_use_of_application("group_b", "cluster_1", "nginx")
            .unwrap());
        assert!(!store
            .deny_group_use_of_application("group_b", "cluster_1", "nginx")
            .unwrap());
    }

    // ── Reachability cache ─────────────────────────────────────────

    #[test]
    fn reachability_cache_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.get_cached_cluster_reachability("cluster_1").unwrap(), None);
        store.cache_cluster_reachability("cluster_1", true).unwrap();
        assert_eq!(store.get_cached_cluster_reachability("cluster_1").unwrap(), Some(true));
        store.cache_cluster_reachability("cluster_1", false).unwrap();
        assert_eq!(store.get_cached_cluster_reachability("cluster_1").unwrap(), Some(false));
    }

    #[test]
    fn expired_reachability_is_ignored() {
        let store = StateStore::open_in_memory()
            .unwrap()
            .with_reachability_ttl(Duration::ZERO);
        store.cache_cluster_reachability("cluster_1", true).unwrap();
        assert_eq!(store.get_cached_cluster_reachability("cluster_1").unwrap(), None);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fleet.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.add_cluster(&test_cluster("cluster_1", "umich", "group_a")).unwrap();
            store.put_group(&test_group("group_a", "physics")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let cluster = store.find_cluster_by_name("umich").unwrap();
        assert!(cluster.is_some());
        assert_eq!(cluster.unwrap().id, "cluster_1");
        assert!(store.find_group_by_name("physics").unwrap().is_some());
        let path = store.config_path_for_cluster("cluster_1").unwrap();
        assert!(path.starts_with(dir.path()));
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_clusters().unwrap().is_empty());
        assert!(store.list_groups().unwrap().is_empty());
        assert!(store.list_application_instances().unwrap().is_empty());
        assert!(store.list_secrets(None, None).unwrap().is_empty());
        assert!(!store.remove_cluster("nope").unwrap());
        assert!(!store.remove_instance("nope").unwrap());
        assert!(!store.remove_secret("nope").unwrap());
    }
}
