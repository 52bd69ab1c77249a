//! Handlers for cluster and application access grants.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde_json::{Value, json};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::{API_VERSION, ApiState};

/// GET /v1alpha3/clusters/{id}/allowed_groups
pub async fn list_allowed_groups(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let groups = state.control.list_allowed_groups(&user, &id)?;
    let items: Vec<Value> = groups
        .iter()
        .map(|group| {
            json!({
                "apiVersion": API_VERSION,
                "kind": "Group",
                "metadata": { "id": group.id, "name": group.name },
            })
        })
        .collect();
    Ok(Json(json!({ "apiVersion": API_VERSION, "items": items })))
}

/// PUT /v1alpha3/clusters/{id}/allowed_groups/{group}
pub async fn grant_cluster_access(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path((id, group)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.control.grant_cluster_access(&user, &id, &group)?;
    Ok(Json(json!({})))
}

/// DELETE /v1alpha3/clusters/{id}/allowed_groups/{group}
pub async fn revoke_cluster_access(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path((id, group)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.control.revoke_cluster_access(&user, &id, &group)?;
    Ok(Json(json!({})))
}

/// GET /v1alpha3/clusters/{id}/allowed_groups/{group}/applications
pub async fn list_allowed_applications(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path((id, group)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let applications = state.control.list_allowed_applications(&user, &id, &group)?;
    Ok(Json(json!({ "apiVersion": API_VERSION, "items": applications })))
}

/// PUT /v1alpha3/clusters/{id}/allowed_groups/{group}/applications/{app}
pub async fn grant_application_access(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path((id, group, app)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .control
        .grant_application_access(&user, &id, &group, &app)?;
    Ok(Json(json!({})))
}

/// DELETE /v1alpha3/clusters/{id}/allowed_groups/{group}/applications/{app}
pub async fn revoke_application_access(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path((id, group, app)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .control
        .revoke_application_access(&user, &id, &group, &app)?;
    Ok(Json(json!({})))
}

/// GET /v1alpha3/clusters/{id}/allowed_groups/{group}/applications/{app}
///
/// Whether the group may install the application on the cluster.
pub async fn check_application_access(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path((id, group, app)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(user = %user.name, cluster = %id, %group, %app, "application access check");
    let cluster = state.control.cluster(&id)?;
    let group = state.control.group(&group)?;
    let allowed = state.control.group_may_use_application(&group.id, &cluster, &app)?;
    Ok(Json(json!({ "apiVersion": API_VERSION, "allowed": allowed })))
}
