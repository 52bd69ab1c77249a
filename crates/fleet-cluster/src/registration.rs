//! Cluster registration.
//!
//! Registration is a gated sequence. The record is persisted before the
//! remote checks run (the tools need the materialized credential bundle),
//! so every check after the insert runs under a compensation list that
//! deletes the record again if the check fails. The readiness wait at the
//! end is not covered: a cluster whose package manager never reports ready
//! stays registered and is reported with `ready: false`.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};

use fleet_state::*;
use fleet_tools::{argv, parse};

use crate::control::ControlPlane;
use crate::error::{ControlError, ControlResult};
use crate::kubeconfig;

/// Deployment name of the package manager's server-side component.
pub const PACKAGE_MANAGER_DEPLOYMENT: &str = "tiller-deploy";
/// Printed by the package manager after a fresh install.
pub const FRESH_INSTALL_MESSAGE: &str = "Tiller (the Helm server-side component) has been installed";
/// Printed by the package manager when it finds an existing install.
pub const ALREADY_INSTALLED_MESSAGE: &str = "Tiller is already installed";
/// Printed when the existing install may live in another namespace.
const STRAY_INSTALL_WARNING: &str = "Warning: Tiller is already installed in the cluster";

/// How long to wait for the package manager to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationTimings {
    pub poll_interval: Duration,
    pub readiness_timeout: Duration,
}

impl Default for RegistrationTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            readiness_timeout: Duration::from_secs(120),
        }
    }
}

/// Input to [`ControlPlane::register_cluster`].
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub name: String,
    /// Owning group, by name or id.
    pub group: String,
    pub owning_organization: String,
    /// Credential bundle, possibly escaped for transport.
    pub kubeconfig: String,
}

/// Outcome of a registration that passed every verification step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub id: ClusterId,
    pub name: String,
    /// Whether the package manager reported ready before the wait ran out.
    pub ready: bool,
}

/// Undo actions for a partially completed registration.
enum Compensation {
    RemoveCluster(ClusterId),
}

/// Ordered undo list, unwound in reverse on the first failed step.
struct Compensations<'a> {
    store: &'a StateStore,
    actions: Vec<Compensation>,
}

impl<'a> Compensations<'a> {
    fn new(store: &'a StateStore) -> Self {
        Self {
            store,
            actions: Vec::new(),
        }
    }

    fn push(&mut self, action: Compensation) {
        self.actions.push(action);
    }

    fn unwind(self, reason: &ControlError) {
        for action in self.actions.into_iter().rev() {
            match action {
                Compensation::RemoveCluster(id) => {
                    info!(cluster_id = %id, %reason, "rolling back cluster record");
                    if let Err(e) = self.store.remove_cluster(&id) {
                        error!(cluster_id = %id, error = %e, "rollback failed to remove cluster record");
                    }
                }
            }
        }
    }
}

/// Reject names that collide with paths or identifiers.
pub fn validate_cluster_name(name: &str) -> ControlResult<()> {
    if name.is_empty() {
        return Err(ControlError::Validation("Cluster names may not be empty".to_string()));
    }
    if name.contains('/') {
        return Err(ControlError::Validation(
            "Cluster names may not contain slashes".to_string(),
        ));
    }
    if name.starts_with(CLUSTER_ID_PREFIX) {
        return Err(ControlError::Validation(format!(
            "Cluster names may not begin with {CLUSTER_ID_PREFIX}"
        )));
    }
    Ok(())
}

fn registration_failed(detail: &str) -> ControlError {
    ControlError::Infrastructure(format!("Cluster registration failed: {detail}"))
}

/// Whether a `kubectl get pods` listing shows the package manager fully ready.
///
/// Lines that are not rows for the deployment, or whose ready column does
/// not parse, are skipped.
pub fn package_manager_ready(pods: &str) -> bool {
    parse::lines(pods).any(|line| {
        let tokens = parse::columns(line, ' ');
        if tokens.len() < 3 || !tokens[0].contains(PACKAGE_MANAGER_DEPLOYMENT) {
            return false;
        }
        matches!(parse::replica_ratio(tokens[1]), Some((ready, desired)) if ready > 0 && ready == desired)
    })
}

impl ControlPlane {
    /// Bring a cluster under management.
    pub async fn register_cluster(
        &self,
        user: &User,
        request: RegistrationRequest,
    ) -> ControlResult<Registered> {
        info!(user = %user.name, name = %request.name, "cluster registration requested");

        let prepared = kubeconfig::prepare(&request.kubeconfig)?;

        // An unknown group is indistinguishable from one the caller is not in.
        let group = self
            .store
            .get_group(&request.group)?
            .ok_or_else(ControlError::not_authorized)?;
        if !self.is_member(user, &group.id)? {
            return Err(ControlError::not_authorized());
        }

        validate_cluster_name(&request.name)?;
        if self.store.find_cluster_by_name(&request.name)?.is_some() {
            return Err(ControlError::Validation(
                "Cluster name is already in use".to_string(),
            ));
        }

        let cluster = Cluster {
            id: generate_id(CLUSTER_ID_PREFIX),
            name: request.name,
            owning_group: group.id,
            owning_organization: request.owning_organization,
            config: prepared.config,
            system_namespace: prepared.system_namespace,
            valid: true,
        };

        info!(cluster = %cluster, "creating cluster record");
        match self.store.add_cluster(&cluster) {
            Ok(true) => {}
            Ok(false) => {
                return Err(ControlError::Validation(
                    "Cluster name is already in use".to_string(),
                ));
            }
            Err(e) => {
                error!(cluster = %cluster, error = %e, "failed to create cluster record");
                return Err(ControlError::Infrastructure("Cluster registration failed".to_string()));
            }
        }

        let mut undo = Compensations::new(&self.store);
        undo.push(Compensation::RemoveCluster(cluster.id.clone()));

        let config = match self.config_path(&cluster) {
            Ok(config) => config,
            Err(e) => {
                let e = registration_failed(&e.public_message());
                undo.unwind(&e);
                return Err(e);
            }
        };
        if let Err(e) = self.verify_new_cluster(&cluster, &config).await {
            undo.unwind(&e);
            return Err(e);
        }

        let ready = self.wait_for_package_manager(&cluster, &config).await;
        info!(cluster = %cluster, owning_group = %cluster.owning_group, user = %user.name, ready, "cluster registered");
        Ok(Registered {
            id: cluster.id,
            name: cluster.name,
            ready,
        })
    }

    /// Connectivity, namespace, and package-manager checks. Any error
    /// here must cause the record to be rolled back.
    async fn verify_new_cluster(&self, cluster: &Cluster, config: &Path) -> ControlResult<()> {
        info!(cluster = %cluster, "attempting to access cluster");
        let accounts = self.contact(config).await.map_err(|stderr| {
            error!(cluster = %cluster, stderr = %stderr.trim(), "failure contacting cluster");
            registration_failed("Unable to contact cluster with kubectl")
        })?;

        if !accounts.iter().any(|a| *a == cluster.system_namespace) {
            error!(cluster = %cluster, namespace = %cluster.system_namespace, ?accounts, "no service account matches the system namespace");
            return Err(registration_failed(
                "Unable to find matching service account in default namespace",
            ));
        }

        self.confirm_namespace(cluster, config).await?;
        self.bootstrap_package_manager(cluster, config).await
    }

    /// The service account named after the namespace must report living in it.
    async fn confirm_namespace(&self, cluster: &Cluster, config: &Path) -> ControlResult<()> {
        let out = self
            .tools
            .kubectl(
                config,
                &argv!["describe", "serviceaccount", cluster.system_namespace],
            )
            .await?;
        if !out.success() {
            error!(cluster = %cluster, stderr = %out.stderr.trim(), "failure confirming namespace name");
            return Err(registration_failed("Checking default namespace name failed"));
        }

        let mut reported = None;
        for line in parse::lines(&out.stdout) {
            let tokens = parse::columns(line, ' ');
            if tokens.len() == 2 && tokens[0] == "Namespace:" {
                if tokens[1] == cluster.system_namespace {
                    return Ok(());
                }
                reported = Some(tokens[1].to_string());
            }
        }
        let reported = reported.unwrap_or_default();
        error!(cluster = %cluster, expected = %cluster.system_namespace, %reported, "namespace does not match service account");
        Err(registration_failed(&format!(
            "Default namespace does not appear to match default ServiceAccount: {reported}, ServiceAccount: {}",
            cluster.system_namespace
        )))
    }

    /// Install the package manager's server component into the system namespace.
    async fn bootstrap_package_manager(&self, cluster: &Cluster, config: &Path) -> ControlResult<()> {
        let out = self
            .tools
            .helm(
                config,
                &argv![
                    "init",
                    "--service-account",
                    cluster.system_namespace,
                    "--tiller-namespace",
                    cluster.system_namespace
                ],
            )
            .await?;
        if !out.success()
            || !(out.stdout.contains(FRESH_INSTALL_MESSAGE)
                || out.stdout.contains(ALREADY_INSTALLED_MESSAGE))
        {
            error!(cluster = %cluster, status = out.status, stderr = %out.stderr.trim(), "problem initializing package manager");
            return Err(registration_failed("Unable to initialize helm"));
        }

        if out.stdout.contains(STRAY_INSTALL_WARNING) {
            // The existing install may belong to another namespace.
            let deployments = self
                .tools
                .kubectl(
                    config,
                    &argv![
                        "get",
                        "deployments",
                        "--namespace",
                        cluster.system_namespace,
                        "-o=jsonpath={.items[*].metadata.name}"
                    ],
                )
                .await?;
            let present = deployments.success()
                && parse::names(&deployments.stdout).contains(&PACKAGE_MANAGER_DEPLOYMENT);
            if !present {
                error!(cluster = %cluster, "package manager is installed outside the system namespace");
                return Err(registration_failed("Unable to initialize helm"));
            }
        }
        Ok(())
    }

    /// Poll until the package manager is ready or the wait runs out.
    ///
    /// Not cancellable: it always runs to readiness, a failed query, or the
    /// timeout.
    async fn wait_for_package_manager(&self, cluster: &Cluster, config: &Path) -> bool {
        info!(cluster = %cluster, "waiting for package manager readiness");
        let deadline = Instant::now() + self.timings.readiness_timeout;
        let args = argv!["get", "pods", "--namespace", cluster.system_namespace];
        loop {
            match self.tools.kubectl(config, &args).await {
                Ok(out) if out.success() => {
                    if package_manager_ready(&out.stdout) {
                        info!(cluster = %cluster, "package manager ready");
                        return true;
                    }
                }
                Ok(out) => {
                    error!(cluster = %cluster, stderr = %out.stderr.trim(), "checking package manager status failed");
                    return false;
                }
                Err(e) => {
                    error!(cluster = %cluster, error = %e, "checking package manager status failed");
                    return false;
                }
            }
            if Instant::now() >= deadline {
                warn!(cluster = %cluster, namespace = %cluster.system_namespace, "waiting for package manager readiness timed out");
                return false;
            }
            tokio::time::sleep(self.timings.poll_interval).await;
        }
    }
}
