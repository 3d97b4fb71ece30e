//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is the shared coordinator handle.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::PipelineCoordinator;
use crate::events::EventRecord;
use crate::types::{PipelineStatus, ThresholdState, WorkerHealth};

/// Shared state accessible by all route handlers.
pub type AppState = Arc<PipelineCoordinator>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// One manual pending-queue entry, flattened for display.
#[derive(Debug, Clone, Serialize)]
pub struct PendingEntry {
    pub decision_id: Uuid,
    pub opportunity_id: Uuid,
    pub token_pair: String,
    pub worker_id: String,
    pub confidence: f64,
    pub profit_estimate: f64,
    pub queued_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalBody {
    pub approved: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pipeline_state: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn get_status(State(coordinator): State<AppState>) -> Json<PipelineStatus> {
    Json(coordinator.status())
}

pub async fn get_workers(State(coordinator): State<AppState>) -> Json<Vec<WorkerHealth>> {
    Json(coordinator.worker_health())
}

pub async fn get_thresholds(State(coordinator): State<AppState>) -> Json<ThresholdState> {
    Json(coordinator.thresholds())
}

pub async fn get_pending(State(coordinator): State<AppState>) -> Json<Vec<PendingEntry>> {
    let entries = coordinator
        .pending_actions()
        .into_iter()
        .map(|p| PendingEntry {
            decision_id: p.decision.id,
            opportunity_id: p.opportunity.id,
            token_pair: p.opportunity.token_pair.clone(),
            worker_id: p.worker_id,
            confidence: p.decision.confidence,
            profit_estimate: p.opportunity.profit_estimate,
            queued_at: p.queued_at.to_rfc3339(),
        })
        .collect();
    Json(entries)
}

pub async fn get_events(State(coordinator): State<AppState>) -> Json<Vec<EventRecord>> {
    Json(coordinator.events().recent())
}

pub async fn health(State(coordinator): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pipeline_state: coordinator.state().to_string(),
    })
}

/// Deliver an approval or denial for a waiting supervised dispatch.
pub async fn post_approval(
    State(coordinator): State<AppState>,
    Path(decision_id): Path<Uuid>,
    Json(body): Json<ApprovalBody>,
) -> StatusCode {
    if coordinator.approve(decision_id, body.approved) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Clear a degraded worker back into rotation.
pub async fn post_worker_reset(
    State(coordinator): State<AppState>,
    Path(worker_id): Path<String>,
) -> StatusCode {
    match coordinator.reset_worker(&worker_id) {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

/// Clear the learner's divergence guard.
pub async fn post_learner_reset(State(coordinator): State<AppState>) -> StatusCode {
    coordinator.reset_learner();
    StatusCode::OK
}
