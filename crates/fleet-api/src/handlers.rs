//! Cluster lifecycle handlers.
//!
//! Request and response documents follow the `v1alpha3` shapes:
//! single objects carry `apiVersion`, `kind` and `metadata`; listings wrap
//! their members in `items`.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value, json};

use fleet_cluster::{
    ClusterSummary, ClusterUpdate, ConsistencyReport, RegistrationRequest, RepairReport,
    RepairStrategyKind,
};
use fleet_state::GeoLocation;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::{API_VERSION, ApiState};

/// Parse a cluster document body, reporting problems as validation errors.
/// Only `metadata` is required; `apiVersion` and `kind` are accepted but
/// not checked.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::validation("Invalid JSON in request body"))?;
    match value.get("metadata") {
        None => return Err(ApiError::validation("Missing cluster metadata in request")),
        Some(metadata) if !metadata.is_object() => {
            return Err(ApiError::validation("Incorrect type for metadata"));
        }
        Some(_) => {}
    }
    serde_json::from_value(value).map_err(|e| ApiError::validation(format!("Invalid request body: {e}")))
}

fn cluster_document(summary: &ClusterSummary) -> Value {
    json!({
        "apiVersion": API_VERSION,
        "kind": "Cluster",
        "metadata": {
            "id": summary.id,
            "name": summary.name,
            "owningGroup": summary.owning_group,
            "owningOrganization": summary.owning_organization,
            "location": summary.locations,
        },
    })
}

// ── Listing and info ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListParams {
    pub group: Option<String>,
}

/// GET /v1alpha3/clusters
pub async fn list_clusters(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let clusters = state.control.list_clusters(&user, params.group.as_deref())?;
    let items: Vec<Value> = clusters.iter().map(cluster_document).collect();
    Ok(Json(json!({ "apiVersion": API_VERSION, "items": items })))
}

/// GET /v1alpha3/clusters/{id}
pub async fn get_cluster(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.control.cluster_info(&user, &id)?;
    Ok(Json(cluster_document(&summary)))
}

// ── Registration ───────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateRequest {
    pub metadata: CreateMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMetadata {
    pub name: String,
    pub group: String,
    pub owning_organization: String,
    pub kubeconfig: String,
}

/// POST /v1alpha3/clusters
pub async fn create_cluster(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let CreateRequest { metadata } = parse_body(&body)?;
    let request = RegistrationRequest {
        name: metadata.name,
        group: metadata.group,
        owning_organization: metadata.owning_organization,
        kubeconfig: metadata.kubeconfig,
    };
    let registered = state.control.register_cluster(&user, request).await?;
    Ok(Json(json!({
        "apiVersion": API_VERSION,
        "kind": "Cluster",
        "metadata": { "id": registered.id, "name": registered.name },
        "ready": registered.ready,
    })))
}

// ── Update and deletion ────────────────────────────────────────

#[derive(Deserialize)]
pub struct UpdateRequest {
    pub metadata: UpdateMetadata,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetadata {
    pub kubeconfig: Option<String>,
    pub owning_organization: Option<String>,
    pub location: Option<Vec<GeoLocation>>,
}

/// PUT /v1alpha3/clusters/{id}
pub async fn update_cluster(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let UpdateRequest { metadata } = parse_body(&body)?;
    let update = ClusterUpdate {
        kubeconfig: metadata.kubeconfig,
        owning_organization: metadata.owning_organization,
        locations: metadata.location,
    };
    state.control.update_cluster(&user, &id, update).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
pub struct DeleteParams {
    pub force: Option<String>,
}

/// DELETE /v1alpha3/clusters/{id}[?force]
pub async fn delete_cluster(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .control
        .delete_cluster(&user, &id, params.force.is_some())
        .await?;
    Ok(Json(json!({})))
}

// ── Health ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PingParams {
    pub cache: Option<String>,
}

/// GET /v1alpha3/clusters/{id}/ping[?cache]
pub async fn ping_cluster(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(params): Query<PingParams>,
) -> Result<impl IntoResponse, ApiError> {
    let reachable = state
        .control
        .ping(&user, &id, params.cache.is_some())
        .await?;
    Ok(Json(json!({ "apiVersion": API_VERSION, "reachable": reachable })))
}

fn consistency_document(report: &ConsistencyReport) -> Value {
    let missing_instances: Vec<Value> = report
        .missing_instances
        .iter()
        .map(|instance| {
            json!({
                "id": instance.id,
                "name": instance.name,
                "application": instance.application,
                "group": instance.owning_group,
                "cluster": instance.cluster,
                "created": instance.created,
            })
        })
        .collect();
    json!({
        "apiVersion": API_VERSION,
        "status": report.status.as_str(),
        "missingInstances": missing_instances,
        "unexpectedInstances": report.unexpected_instances,
        "missingSecrets": report.missing_secrets.len(),
        "unexpectedSecrets": report.unexpected_secrets.len(),
    })
}

/// GET /v1alpha3/clusters/{id}/verify
pub async fn verify_cluster(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.control.verify_cluster(&user, &id).await?;
    Ok(Json(consistency_document(&report)))
}

#[derive(Deserialize)]
pub struct RepairParams {
    pub strategy: Option<String>,
}

fn repair_document(report: &RepairReport) -> Value {
    json!({
        "apiVersion": API_VERSION,
        "strategy": report.strategy,
        "status": report.status.as_str(),
        "actions": report.actions,
        "failures": report.failures,
    })
}

/// POST /v1alpha3/clusters/{id}/repair[?strategy=reinstall|wipe]
pub async fn repair_cluster(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(params): Query<RepairParams>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = match params.strategy.as_deref() {
        Some(strategy) => strategy.parse::<RepairStrategyKind>()?,
        None => RepairStrategyKind::default(),
    };
    let report = state.control.repair_cluster(&user, &id, kind).await?;
    Ok(Json(repair_document(&report)))
}
