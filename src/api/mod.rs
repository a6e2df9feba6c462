//! HTTP API: Axum server exposing the pipeline operations.
//!
//! Every stage can be triggered on its own, which is how operators drive the
//! pipeline by hand and how an external scheduler can drive it instead of
//! the built-in interval loop. CORS enabled for local tooling.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{ApiState, AppState};

/// Start the API server.
///
/// Binding happens up front so a taken port fails startup; serving runs in
/// a background task.
pub async fn spawn_api(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Pipeline
        .route("/api/scan/:family", post(routes::scan))
        .route("/api/decide", post(routes::decide))
        .route("/api/execute", post(routes::execute))
        .route("/api/orchestrate", post(routes::orchestrate))
        // Safety
        .route("/api/safety", get(routes::get_safety).post(routes::post_safety))
        .route("/api/safety/audit", get(routes::get_safety_audit))
        // Strategies
        .route("/api/strategies", get(routes::get_strategies).put(routes::put_strategy))
        // Reads
        .route("/api/runs", get(routes::get_runs))
        .route("/api/cycles", get(routes::get_cycles))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
