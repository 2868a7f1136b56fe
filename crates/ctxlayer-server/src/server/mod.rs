//! HTTP surface for the context intelligence layer (stable v0 routes).

mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ctxlayer_core::Runtime;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

pub async fn run(runtime: Arc<Runtime>, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState { runtime };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v0/universal/augment", post(handlers::universal_augment))
        .route("/api/v0/context/resolve", post(handlers::context_resolve))
        .route("/api/v0/context/snapshot", get(handlers::context_snapshot))
        .route("/api/v0/context/update", post(handlers::context_update))
        .route("/api/v0/prompt/augment", post(handlers::prompt_augment))
        .route("/api/v0/drift/status", get(handlers::drift_status))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
