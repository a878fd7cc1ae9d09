//! Web server module
//!
//! Provides an HTTP server with a REST API for introspection and
//! WebSocket channels for streaming workflow execution.

pub mod api;
pub mod state;
pub mod ws;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::WorkflowEngine;
use state::AppState;

/// Configuration for the web server
pub struct WebConfig {
    pub port: u16,
}

/// Start the web server
pub async fn serve(engine: WorkflowEngine, config: WebConfig) -> Result<()> {
    let state = AppState::new(engine);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting web server on http://localhost:{}", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the router with all routes
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflows
        .route("/workflows", get(api::list_workflows))
        .route("/workflows/reload", post(api::reload_workflows))
        .route("/workflows/:workflow_id", get(api::get_workflow))
        // Agents
        .route("/agents", get(api::list_agents))
        // Health
        .route("/health", get(api::health_check));

    let ws_routes = Router::new()
        .route("/workflow/:workflow_id", get(ws::workflow_handler))
        .route("/agent/:agent_id", get(ws::agent_handler));

    Router::new()
        .nest("/api", api_routes)
        .nest("/ws", ws_routes)
        .layer(cors)
        .with_state(state)
}
