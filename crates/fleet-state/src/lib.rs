//! fleet-state — embedded state store for the fleet control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for clusters, groups, users, application instances, secrets,
//! access grants, application permissions, and the cluster reachability cache.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{cluster_id}:{group_id}`, `{group_id}:{user_id}`) enable
//! prefix scans for related records. Unique display names are kept in
//! separate name → id index tables, written in the same transaction as the
//! record they index.
//!
//! Credential bundles are stored inside the cluster record and materialized
//! on demand as files under a per-store config directory, because the cluster
//! tools take a kubeconfig path rather than its contents.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
