// Request Router/Proxy (spec.md §4.C): the axum surface clients talk to.
// Classifies each request, consults cached + real-time health, forwards
// to the chosen instance with a failover attempt on the other, and wires
// every accepted write through the Transaction Safety Ledger and WAL
// Engine before it is considered durable.
//
// Grounded on the teacher's `api/rest/server.rs` — `Router` + `State` +
// tower-http `TraceLayer`/`TimeoutLayer`/`CorsLayer` stack — trimmed to
// the one concern this engine has (proxying) instead of the teacher's
// many REST surfaces.

pub mod classify;

use crate::common::{HealthStatus, InstanceRole, TargetInstance};
use crate::error::EngineError;
use crate::governor::ConcurrencyGovernor;
use crate::health::HealthMonitor;
use crate::ledger::TransactionLedger;
use crate::mapping::MappingRegistry;
use crate::metrics::Metrics;
use crate::pathaddr;
use crate::upstream::UpstreamClient;
use crate::wal::WalEngine;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use classify::{classify, Mutation, OperationKind};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub struct AppState {
    pub upstream: Arc<UpstreamClient>,
    pub mapping: Arc<MappingRegistry>,
    pub health: Arc<HealthMonitor>,
    pub wal: Arc<WalEngine>,
    pub ledger: Arc<TransactionLedger>,
    pub governor: Arc<ConcurrencyGovernor>,
    pub metrics: Arc<Metrics>,
    pub read_preference_ratio: f64,
}

pub fn build_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/collections", any(proxy))
        .route("/collections/{*rest}", any(proxy))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::new().allow_methods(Any).allow_headers(Any).allow_origin(Any))
}

async fn proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.incr(&state.metrics.counters().requests_total);

    let permit = match state.governor.admit().await {
        Ok(p) => p,
        Err(_) => {
            state.metrics.incr(&state.metrics.counters().queue_rejections);
            return (StatusCode::SERVICE_UNAVAILABLE, "request queue full").into_response();
        }
    };

    let path = uri.path().to_string();
    let (kind, mutation) = classify(&method, &path);

    let result = match mutation {
        Mutation::Read => handle_read(&state, kind, &method, &path, headers, body).await,
        Mutation::Write => handle_write(&state, kind, &method, &path, headers, body).await,
    };

    drop(permit);

    match result {
        Ok(resp) => resp,
        Err(e) => {
            state.metrics.incr(&state.metrics.counters().requests_failed);
            error!(error = %e, %path, "request failed");
            engine_error_response(e)
        }
    }
}

fn engine_error_response(e: EngineError) -> Response {
    let status = match &e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::MappingMissing(_) => StatusCode::NOT_FOUND,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::QueueFull | EngineError::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Transient(_) => StatusCode::BAD_GATEWAY,
        EngineError::Protocol(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

/// Picks the instance a read should prefer: `read_preference_ratio` of
/// reads go to the replica when it's healthy, the rest (and all reads
/// when the replica is down) go to the primary.
async fn preferred_read_instance(state: &AppState) -> InstanceRole {
    let replica_healthy = state.health.cached_status(InstanceRole::Replica).await == HealthStatus::Healthy;
    if replica_healthy && rand::random::<f64>() < state.read_preference_ratio {
        InstanceRole::Replica
    } else {
        InstanceRole::Primary
    }
}

async fn handle_read(
    state: &AppState,
    kind: OperationKind,
    method: &Method,
    path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> crate::error::Result<Response> {
    let preferred = preferred_read_instance(state).await;
    let fallback = preferred.other();

    for instance in [preferred, fallback] {
        if state.health.cached_status(instance).await == HealthStatus::Unhealthy
            && state.health.real_time_check(instance).await != HealthStatus::Healthy
        {
            continue;
        }

        let rewritten = match kind {
            OperationKind::DocumentOp => pathaddr::rewrite_for_instance(&state.mapping, path, instance).await,
            _ => Ok(path.to_string()),
        };
        let rewritten = match rewritten {
            Ok(p) => p,
            Err(EngineError::MappingMissing(_)) if instance == fallback => continue,
            Err(e) => return Err(e),
        };

        match state.upstream.forward(instance, method, &rewritten, body.clone(), headers.clone(), None).await {
            Ok(resp) => return Ok(upstream_response_to_axum(resp)),
            Err(e) if instance == preferred => {
                warn!(%instance, error = %e, "read failed on preferred instance, trying fallback");
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(EngineError::Unavailable)
}

/// Real-time health check for the write path (spec.md §4.F): bypasses the
/// cache so a request never routes to an instance the cache hasn't yet
/// noticed went down.
async fn real_time_healthy(state: &AppState, instance: InstanceRole) -> bool {
    state.health.real_time_check(instance).await == HealthStatus::Healthy
}

async fn handle_write(
    state: &AppState,
    kind: OperationKind,
    method: &Method,
    path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> crate::error::Result<Response> {
    if kind == OperationKind::CollectionCreate {
        return handle_collection_create(state, method, path, headers, body).await;
    }

    let headers_json = headers_to_json(&headers);
    let transaction_id = state
        .ledger
        .begin(method.as_str(), path, &body, headers_json.clone(), None)
        .await?;

    // Write instance = primary if real-time healthy, else replica if
    // real-time healthy, else 503 (spec.md §4.F) — never forward blindly
    // to a replica that is also down.
    let executed_on = if real_time_healthy(state, InstanceRole::Primary).await {
        InstanceRole::Primary
    } else if real_time_healthy(state, InstanceRole::Replica).await {
        InstanceRole::Replica
    } else {
        state.ledger.fail(&transaction_id, "both instances unavailable").await?;
        return Err(EngineError::Unavailable);
    };

    let rewritten = match kind {
        OperationKind::DocumentOp => pathaddr::rewrite_for_instance(&state.mapping, path, executed_on).await?,
        _ => path.to_string(),
    };

    let outcome = state
        .upstream
        .forward(executed_on, method, &rewritten, body.clone(), headers.clone(), None)
        .await;

    let upstream_resp = match outcome {
        Ok(resp) if resp.is_success() => resp,
        Ok(resp) => {
            let reason = format!("upstream returned {}", resp.status);
            state.ledger.fail(&transaction_id, &reason).await?;
            return Ok(upstream_response_to_axum(resp));
        }
        Err(e) => {
            state.ledger.fail(&transaction_id, &e.to_string()).await?;
            return Err(e);
        }
    };

    state.ledger.complete(&transaction_id).await?;

    state
        .wal
        .record(
            method.clone(),
            path.to_string(),
            body,
            headers_json,
            executed_on,
            TargetInstance::Both,
            0,
        )
        .await?;
    state.metrics.incr(&state.metrics.counters().wal_entries_recorded);

    Ok(upstream_response_to_axum(upstream_resp))
}

/// `POST /collections` (spec.md §4.F/§6): issued to both instances
/// independently, collecting two identifiers, then upserting a complete
/// mapping. A side that is unreachable at dispatch time is caught up
/// later via a name-targeted WAL entry instead of failing the request
/// outright, matching the general failover rule in spec.md §4.F.
async fn handle_collection_create(
    state: &AppState,
    method: &Method,
    path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> crate::error::Result<Response> {
    let headers_json = headers_to_json(&headers);
    let transaction_id = state
        .ledger
        .begin(method.as_str(), path, &body, headers_json.clone(), None)
        .await?;

    let name = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("name").and_then(Value::as_str).map(str::to_string));

    let (primary_outcome, replica_outcome) = tokio::join!(
        state.upstream.forward(InstanceRole::Primary, method, path, body.clone(), headers.clone(), None),
        state.upstream.forward(InstanceRole::Replica, method, path, body.clone(), headers.clone(), None),
    );

    let primary_ok = matches!(&primary_outcome, Ok(r) if r.is_success());
    let replica_ok = matches!(&replica_outcome, Ok(r) if r.is_success());

    if !primary_ok && !replica_ok {
        let reason = "collection create failed on both instances".to_string();
        state.ledger.fail(&transaction_id, &reason).await?;
        return match primary_outcome {
            Ok(resp) => Ok(upstream_response_to_axum(resp)),
            Err(e) => Err(e),
        };
    }

    if let Some(name) = &name {
        if let Ok(resp) = &primary_outcome {
            if resp.is_success() {
                if let Some(id) = resp.body_json().ok().and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string)) {
                    state.mapping.ensure_mapping(name, InstanceRole::Primary, &id).await?;
                }
            }
        }
        if let Ok(resp) = &replica_outcome {
            if resp.is_success() {
                if let Some(id) = resp.body_json().ok().and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string)) {
                    state.mapping.ensure_mapping(name, InstanceRole::Replica, &id).await?;
                }
            }
        }
    }

    // Whichever side did not succeed is caught up later through the WAL
    // rather than retried synchronously here.
    if !primary_ok {
        warn!(error = ?primary_outcome.as_ref().err(), "collection create failed on primary, queuing wal catch-up");
        state
            .wal
            .record(method.clone(), path.to_string(), body.clone(), headers_json.clone(), InstanceRole::Replica, TargetInstance::Primary, 0)
            .await?;
        state.metrics.incr(&state.metrics.counters().wal_entries_recorded);
    }
    if !replica_ok {
        warn!(error = ?replica_outcome.as_ref().err(), "collection create failed on replica, queuing wal catch-up");
        state
            .wal
            .record(method.clone(), path.to_string(), body, headers_json, InstanceRole::Primary, TargetInstance::Replica, 0)
            .await?;
        state.metrics.incr(&state.metrics.counters().wal_entries_recorded);
    }

    state.ledger.complete(&transaction_id).await?;

    match primary_outcome {
        Ok(resp) if resp.is_success() => Ok(upstream_response_to_axum(resp)),
        _ => match replica_outcome {
            Ok(resp) => Ok(upstream_response_to_axum(resp)),
            Err(e) => Err(e),
        },
    }
}

fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            map.insert(name.as_str().to_string(), Value::String(v.to_string()));
        }
    }
    Value::Object(map)
}

fn upstream_response_to_axum(resp: crate::upstream::UpstreamResponse) -> Response {
    let mut builder = axum::http::Response::builder().status(resp.status);
    for (name, value) in resp.headers.iter() {
        builder = builder.header(name, value);
    }
    builder.body(axum::body::Body::from(resp.body)).unwrap().into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::HealthStatus;
    use crate::events::EventBus;
    use std::time::Duration;

    #[test]
    fn engine_error_response_maps_queue_full_to_503() {
        let response = engine_error_response(EngineError::QueueFull);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn engine_error_response_maps_not_found_to_404() {
        let response = engine_error_response(EngineError::NotFound("collection".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn headers_to_json_keeps_repeated_header_occurrences() {
        let mut headers = HeaderMap::new();
        headers.append("x-trace", "a".parse().unwrap());
        headers.append("x-trace", "b".parse().unwrap());
        let json = headers_to_json(&headers);
        // serde_json::Map collapses duplicate keys to the last write, but
        // the iteration itself must visit both occurrences without
        // panicking on the `Option<&HeaderName>` shape `.iter()` avoids.
        assert!(json.get("x-trace").is_some());
    }

    #[tokio::test]
    async fn fresh_health_monitor_reports_unknown_not_healthy() {
        // `preferred_read_instance` only routes to the replica when its
        // cached status reads exactly `Healthy`; a never-polled monitor
        // must not be mistaken for a healthy one.
        let upstream = Arc::new(
            UpstreamClient::new("http://127.0.0.1:1".into(), "http://127.0.0.1:2".into(), Duration::from_millis(50))
                .unwrap(),
        );
        let health = Arc::new(crate::health::HealthMonitor::new(
            crate::config::HealthConfig {
                check_interval: Duration::from_secs(30),
                realtime_timeout: Duration::from_millis(50),
                failure_threshold: 2,
            },
            upstream,
            EventBus::new(),
        ));
        assert_eq!(health.cached_status(InstanceRole::Replica).await, HealthStatus::Unknown);
    }
}
