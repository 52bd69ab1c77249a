//! Periodic reachability sweep.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_cluster::ControlPlane;

/// Probes every registered cluster on a fixed interval so cached
/// reachability answers stay fresh.
pub struct ReachabilitySweep {
    control: ControlPlane,
    interval: Duration,
}

impl ReachabilitySweep {
    pub fn new(control: ControlPlane, interval: Duration) -> Self {
        Self { control, interval }
    }

    /// Probe each cluster once. Returns how many answered.
    pub async fn sweep_once(&self) -> usize {
        let clusters = match self.control.store().list_clusters() {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!(error = %e, "reachability sweep could not list clusters");
                return 0;
            }
        };
        let mut reachable = 0;
        for cluster in &clusters {
            match self.control.probe_reachability(cluster).await {
                Ok(true) => reachable += 1,
                Ok(false) => {}
                Err(e) => warn!(cluster = %cluster, error = %e, "reachability probe failed"),
            }
        }
        debug!(total = clusters.len(), reachable, "reachability sweep complete");
        reachable
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "reachability sweep started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    info!("reachability sweep shutting down");
                    break;
                }
            }
        }
    }
}
