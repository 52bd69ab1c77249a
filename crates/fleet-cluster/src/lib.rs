//! fleet-cluster — the cluster lifecycle control plane.
//!
//! Brings clusters under management, tears them down, decides who may use
//! them, and detects (and optionally repairs) drift between the store and
//! what each cluster actually runs.
//!
//! # Architecture
//!
//! ```text
//! ControlPlane
//!   ├── access        grants, application permissions, install predicates
//!   ├── registration  kubeconfig → record → contact → namespace check
//!   │                 → package manager bootstrap → readiness wait
//!   │                 (compensating delete on failure after insert)
//!   ├── update        partial field changes, connectivity re-check
//!   ├── deletion      instances → secrets (fan-out/join)
//!   │                 → namespaces (fan-out/join, best-effort) → record
//!   ├── probe         service-account listing, reachability cache
//!   ├── reconcile     desired vs observed releases and secrets
//!   └── repair        Reinstall | Wipe behind RepairStrategy
//!
//! StateStore (fleet-state) ◄── every workflow ──► ClusterTools (fleet-tools)
//! ```
//!
//! Every workflow takes the calling [`fleet_state::User`] and performs its
//! own authorization; callers only authenticate.

pub mod access;
pub mod cleanup;
pub mod control;
pub mod deletion;
pub mod error;
pub mod kubeconfig;
pub mod probe;
pub mod reconcile;
pub mod registration;
pub mod repair;
pub mod update;

#[cfg(test)]
mod testing;

pub use cleanup::{ToolWorkloadCleaner, WorkloadCleaner};
pub use control::{ClusterSummary, ControlPlane, DEFAULT_CHART_REPOSITORY, GroupSummary};
pub use error::{ControlError, ControlResult, ErrorKind};
pub use reconcile::{ConsistencyReport, ConsistencyStatus};
pub use registration::{Registered, RegistrationRequest, RegistrationTimings};
pub use repair::{RepairReport, RepairStrategy, RepairStrategyKind};
pub use update::ClusterUpdate;
