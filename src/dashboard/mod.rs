//! Dashboard — Axum web server for pipeline observability.
//!
//! Serves a read-only REST mirror of the coordinator's status surface
//! plus the operator intervention endpoints (approvals, worker reset,
//! learner reset). CORS enabled for local development.

pub mod routes;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// Start the dashboard web server.
///
/// This spawns a background task — it doesn't block.
pub fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind dashboard port");

        axum::serve(listener, app)
            .await
            .expect("Dashboard server error");
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Read-only mirror
        .route("/api/status", get(routes::get_status))
        .route("/api/workers", get(routes::get_workers))
        .route("/api/thresholds", get(routes::get_thresholds))
        .route("/api/pending", get(routes::get_pending))
        .route("/api/events", get(routes::get_events))
        .route("/health", get(routes::health))
        // Operator interventions
        .route("/api/approvals/:decision_id", post(routes::post_approval))
        .route("/api/workers/:worker_id/reset", post(routes::post_worker_reset))
        .route("/api/learner/reset", post(routes::post_learner_reset))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
