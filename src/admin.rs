// Admin Surface (spec.md §4.G): read-only status/WAL/mapping endpoints
// plus one repair action (`create_mapping`) for operators to hand-fix a
// mapping the discovery probe couldn't resolve on its own.
//
// Grounded on the teacher's `api/rest/handlers/admin.rs` `get_health`/
// `get_config` shape, trimmed to the handful of endpoints this engine
// actually needs.

use crate::common::InstanceRole;
use crate::error::EngineError;
use crate::health::HealthMonitor;
use crate::mapping::MappingRegistry;
use crate::metrics::Metrics;
use crate::store::StoreGateway;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub struct AdminState {
    pub store: Arc<StoreGateway>,
    pub mapping: Arc<MappingRegistry>,
    pub health: Arc<HealthMonitor>,
    pub metrics: Arc<Metrics>,
}

pub fn build_admin_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/wal/status", get(wal_status))
        .route("/collection/mappings", get(list_mappings))
        .route("/admin/create_mapping", post(create_mapping))
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
    primary_health: String,
    replica_health: String,
    metrics: crate::metrics::MetricsSnapshot,
}

async fn status(State(state): State<Arc<AdminState>>) -> Json<StatusResponse> {
    let primary_health = format!("{:?}", state.health.cached_status(InstanceRole::Primary).await);
    let replica_health = format!("{:?}", state.health.cached_status(InstanceRole::Replica).await);
    Json(StatusResponse { primary_health, replica_health, metrics: state.metrics.snapshot() })
}

#[derive(Serialize)]
struct WalStatusResponse {
    counts_by_status: Vec<(String, i64)>,
}

async fn wal_status(State(state): State<Arc<AdminState>>) -> Response {
    match state.store.wal_status_counts().await {
        Ok(counts_by_status) => Json(WalStatusResponse { counts_by_status }).into_response(),
        Err(e) => admin_error_response(e),
    }
}

async fn list_mappings(State(state): State<Arc<AdminState>>) -> Response {
    match state.mapping.list().await {
        Ok(mappings) => Json(mappings).into_response(),
        Err(e) => admin_error_response(e),
    }
}

#[derive(Deserialize)]
struct CreateMappingRequest {
    name: String,
    primary_id: Option<String>,
    replica_id: Option<String>,
}

/// Manual repair endpoint: `create_mapping(name, primary_id, replica_id)`
/// lets an operator repair a full row in one call after an accidental
/// mapping loss (spec.md §4.H/§6). Either id may be omitted to repair
/// only one side; each side provided goes through the same
/// `ensure_mapping` path a normal collection-create would, so the result
/// is the same upsert-twice-to-complete a collection create produces.
async fn create_mapping(
    State(state): State<Arc<AdminState>>,
    Json(req): Json<CreateMappingRequest>,
) -> Response {
    if req.primary_id.is_none() && req.replica_id.is_none() {
        return (StatusCode::BAD_REQUEST, "at least one of primary_id/replica_id is required").into_response();
    }

    let mut last = None;
    if let Some(id) = &req.primary_id {
        match state.mapping.ensure_mapping(&req.name, InstanceRole::Primary, id).await {
            Ok(m) => last = Some(m),
            Err(e) => return admin_error_response(e),
        }
    }
    if let Some(id) = &req.replica_id {
        match state.mapping.ensure_mapping(&req.name, InstanceRole::Replica, id).await {
            Ok(m) => last = Some(m),
            Err(e) => return admin_error_response(e),
        }
    }

    Json(last.expect("at least one id was provided")).into_response()
}

fn admin_error_response(e: EngineError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}
