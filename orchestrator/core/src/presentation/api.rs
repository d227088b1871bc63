//! Admission/Task HTTP Surface
//!
//! The externally consumed API of the coordination core: submit a
//! task, read its status, cancel it, plus liveness, readiness, and
//! Prometheus metrics endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::application::registry::CapabilityRegistry;
use crate::application::task_machine::{SubmitTask, TaskMachine};
use crate::domain::errors::KrakenError;
use crate::domain::task::TaskId;

pub struct AppState {
    pub machine: Arc<TaskMachine>,
    pub registry: Arc<CapabilityRegistry>,
    pub started_at: DateTime<Utc>,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/submit", post(submit_task))
        .route("/tasks/{id}", get(task_status))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics_endpoint))
        .layer(middleware::from_fn(propagate_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Attach an `X-Request-ID` to every request/response pair.
async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", value);
        return response;
    }
    next.run(request).await
}

async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitTask>,
) -> Response {
    match state.machine.submit(payload).await {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "task_id": task_id,
                "status": "pending",
                "message": "Task submitted successfully and queued for processing",
            })),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Some(task_id) = parse_task_id(&id) else {
        return error_response(&KrakenError::InvalidRequest {
            reason: format!("'{id}' is not a valid task id"),
        });
    };
    match state.machine.status(task_id).await {
        Some(view) => (StatusCode::OK, Json(view)).into_response(),
        None => error_response(&KrakenError::TaskNotFound { task_id }),
    }
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Some(task_id) = parse_task_id(&id) else {
        return error_response(&KrakenError::InvalidRequest {
            reason: format!("'{id}' is not a valid task id"),
        });
    };
    match state.machine.cancel(task_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "task_id": task_id,
                "message": "Cancellation requested",
            })),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": Utc::now()
                .signed_duration_since(state.started_at)
                .num_seconds(),
            "timestamp": Utc::now(),
        })),
    )
        .into_response()
}

async fn ready(State(state): State<Arc<AppState>>) -> Response {
    // Ready once at least one healthy worker can take dispatches.
    let capabilities = state.registry.catalogue().await;
    let workers_ready = !capabilities.is_empty();
    let checks = json!({
        "workers": workers_ready,
    });
    if workers_ready {
        (StatusCode::OK, Json(json!({ "ready": true, "checks": checks }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "checks": checks })),
        )
            .into_response()
    }
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

fn parse_task_id(raw: &str) -> Option<TaskId> {
    Uuid::parse_str(raw).ok().map(TaskId)
}

fn error_response(err: &KrakenError) -> Response {
    let status = match err {
        KrakenError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
        KrakenError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        KrakenError::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        KrakenError::PolicyViolation { .. } => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "error": err.to_string(),
            "code": err.code(),
        })),
    )
        .into_response()
}
