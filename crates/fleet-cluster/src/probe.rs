//! Reachability probing.

use std::path::Path;

use tracing::{info, warn};

use fleet_state::*;
use fleet_tools::{argv, parse};

use crate::control::ControlPlane;
use crate::error::ControlResult;

/// Service account every reachable cluster has.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

pub(crate) fn service_account_listing() -> Vec<String> {
    argv![
        "get",
        "serviceaccounts",
        "-o=jsonpath={.items[*].metadata.name}"
    ]
}

impl ControlPlane {
    /// List service accounts in the bundle's default namespace.
    ///
    /// Returns the names when the cluster answered with a listing that
    /// includes `default`, or the tool's stderr otherwise.
    pub(crate) async fn contact(&self, config: &Path) -> Result<Vec<String>, String> {
        match self.tools.kubectl(config, &service_account_listing()).await {
            Ok(out) if out.success() && out.stdout.contains(DEFAULT_SERVICE_ACCOUNT) => {
                Ok(parse::names(&out.stdout).into_iter().map(str::to_string).collect())
            }
            Ok(out) => Err(out.stderr),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Probe a cluster now and refresh its cached reachability.
    pub async fn probe_reachability(&self, cluster: &Cluster) -> ControlResult<bool> {
        let config = self.config_path(cluster)?;
        let reachable = match self.contact(&config).await {
            Ok(_) => {
                info!(cluster = %cluster, "cluster contacted");
                true
            }
            Err(stderr) => {
                warn!(cluster = %cluster, stderr = %stderr.trim(), "unable to contact cluster");
                false
            }
        };
        self.store.cache_cluster_reachability(&cluster.id, reachable)?;
        Ok(reachable)
    }

    /// Whether a cluster is reachable, optionally accepting a cached answer.
    pub async fn ping(&self, user: &User, cluster_ref: &str, use_cache: bool) -> ControlResult<bool> {
        info!(user = %user.name, cluster = %cluster_ref, use_cache, "ping requested");
        let cluster = self.cluster(cluster_ref)?;
        if use_cache {
            if let Some(reachable) = self.store.get_cached_cluster_reachability(&cluster.id)? {
                return Ok(reachable);
            }
        }
        self.probe_reachability(&cluster).await
    }
}
