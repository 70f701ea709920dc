//! Administrative HTTP ingress: event delivery, rebuild triggers and health.

mod middleware;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, post},
};
use serde::Serialize;
use tracing::{error, info};

use crate::application::error::AppError;
use crate::cache::{EventRouter, ReconcileReport, Reconciler, RegenerationScheduler, RouteOutcome};
use crate::domain::events::ContentEvent;

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub router: Arc<EventRouter>,
    pub reconciler: Arc<Reconciler>,
    pub scheduler: Arc<RegenerationScheduler>,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(ingest_event))
        .route("/rebuild", post(rebuild_all))
        .route("/spaces/{key}/reconcile", post(reconcile_space))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthBody {
    configured: bool,
    pending: usize,
}

async fn health(State(state): State<AdminState>) -> Json<HealthBody> {
    Json(HealthBody {
        configured: state.scheduler.settings().is_configured(),
        pending: state.scheduler.pending_len(),
    })
}

async fn ingest_event(
    State(state): State<AdminState>,
    Json(event): Json<ContentEvent>,
) -> Result<(StatusCode, Json<RouteOutcome>), AppError> {
    let outcome = state.router.route(event).await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

#[derive(Debug, Serialize)]
struct RebuildAccepted {
    status: &'static str,
}

async fn rebuild_all(State(state): State<AdminState>) -> (StatusCode, Json<RebuildAccepted>) {
    let reconciler = Arc::clone(&state.reconciler);
    tokio::spawn(async move {
        match reconciler.reconcile_all().await {
            Ok(reports) => info!(spaces = reports.len(), "Requested rebuild finished"),
            Err(err) => error!(error = %err, "Requested rebuild failed"),
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(RebuildAccepted { status: "scheduled" }),
    )
}

async fn reconcile_space(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Result<Json<ReconcileReport>, AppError> {
    match state.reconciler.reconcile_key(&key).await? {
        Some(report) => Ok(Json(report)),
        None => Err(AppError::not_found(format!("space `{key}`"))),
    }
}
