//! fleet-api — REST API for the fleet control plane.
//!
//! Every route requires a `token` query parameter. Failures are reported as
//! `{"kind": "Error", "message": ...}` with 400 (invalid input), 403
//! (unauthenticated or unauthorized), 404 (unknown cluster or group) or 500
//! (store or cluster tooling failure).
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/v1alpha3/clusters[?group=G]` | List clusters |
//! | POST | `/v1alpha3/clusters` | Register a cluster |
//! | GET | `/v1alpha3/clusters/{id}` | Cluster details |
//! | PUT | `/v1alpha3/clusters/{id}` | Update a cluster |
//! | DELETE | `/v1alpha3/clusters/{id}[?force]` | Delete a cluster |
//! | GET | `/v1alpha3/clusters/{id}/allowed_groups` | Groups with access |
//! | PUT/DELETE | `/v1alpha3/clusters/{id}/allowed_groups/{group}` | Grant/revoke access |
//! | GET | `/v1alpha3/clusters/{id}/allowed_groups/{group}/applications` | Permitted applications |
//! | GET/PUT/DELETE | `/v1alpha3/clusters/{id}/allowed_groups/{group}/applications/{app}` | Check/grant/revoke an application |
//! | GET | `/v1alpha3/clusters/{id}/ping[?cache]` | Reachability |
//! | GET | `/v1alpha3/clusters/{id}/verify` | Consistency check |
//! | POST | `/v1alpha3/clusters/{id}/repair[?strategy=]` | Repair drift (admins) |

pub mod access_handlers;
pub mod auth;
pub mod error;
pub mod handlers;

#[cfg(test)]
mod testing;

use axum::Router;
use axum::routing::{get, post};
use fleet_cluster::ControlPlane;

pub use error::ApiError;

/// Version string carried by every document.
pub const API_VERSION: &str = "v1alpha3";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub control: ControlPlane,
}

/// Build the complete API router.
pub fn build_router(control: ControlPlane) -> Router {
    let state = ApiState { control };

    let cluster_routes = Router::new()
        .route("/clusters", get(handlers::list_clusters).post(handlers::create_cluster))
        .route(
            "/clusters/{id}",
            get(handlers::get_cluster)
                .put(handlers::update_cluster)
                .delete(handlers::delete_cluster),
        )
        .route("/clusters/{id}/ping", get(handlers::ping_cluster))
        .route("/clusters/{id}/verify", get(handlers::verify_cluster))
        .route("/clusters/{id}/repair", post(handlers::repair_cluster))
        .route(
            "/clusters/{id}/allowed_groups",
            get(access_handlers::list_allowed_groups),
        )
        .route(
            "/clusters/{id}/allowed_groups/{group}",
            axum::routing::put(access_handlers::grant_cluster_access)
                .delete(access_handlers::revoke_cluster_access),
        )
        .route(
            "/clusters/{id}/allowed_groups/{group}/applications",
            get(access_handlers::list_allowed_applications),
        )
        .route(
            "/clusters/{id}/allowed_groups/{group}/applications/{app}",
            get(access_handlers::check_application_access)
                .put(access_handlers::grant_application_access)
                .delete(access_handlers::revoke_application_access),
        )
        .with_state(state);

    Router::new().nest(&format!("/{API_VERSION}"), cluster_routes)
}
