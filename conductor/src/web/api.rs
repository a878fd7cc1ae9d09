//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use super::state::AppState;
use crate::workflow::resolve;
use crate::workflow::schema::WorkflowDefinition;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub workflows: usize,
    pub agents: usize,
    pub default_workflow: Option<String>,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        workflows: state.engine.workflows().ids().len(),
        agents: state.engine.agents().len(),
        default_workflow: state.engine.default_workflow().map(str::to_string),
    })
}

/// List workflows response
#[derive(Debug, Serialize)]
pub struct WorkflowsListResponse {
    pub workflows: Vec<String>,
    pub total: usize,
}

/// List all loaded workflows
pub async fn list_workflows(State(state): State<AppState>) -> Json<WorkflowsListResponse> {
    let workflows = state.engine.workflows().ids();
    let total = workflows.len();
    Json(WorkflowsListResponse { workflows, total })
}

/// Single workflow response: the raw definition plus what it
/// resolves to
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub workflow_id: String,
    pub definition: WorkflowDefinition,
    /// Total agent steps after sub-workflow expansion
    pub agent_steps: usize,
}

/// Show one workflow definition
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowResponse>, (StatusCode, Json<ErrorResponse>)> {
    let definition = state.engine.workflows().get(&workflow_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!(
                "Workflow not found: {workflow_id}"
            ))),
        )
    })?;

    let agent_steps = match state.engine.workflows().flattened(&workflow_id) {
        Ok(steps) => resolve::agent_step_count(&steps),
        Err(e) => {
            tracing::error!(workflow_id, error = %e, "failed to resolve workflow");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            ));
        }
    };

    Ok(Json(WorkflowResponse {
        workflow_id,
        definition: (*definition).clone(),
        agent_steps,
    }))
}

/// List agents response
#[derive(Debug, Serialize)]
pub struct AgentsListResponse {
    pub agents: Vec<String>,
    pub total: usize,
}

/// List all registered agents
pub async fn list_agents(State(state): State<AppState>) -> Json<AgentsListResponse> {
    let agents = state.engine.agents().names();
    let total = agents.len();
    Json(AgentsListResponse { agents, total })
}

/// Reload response
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub reloaded: usize,
}

/// Re-read the workflow registry directory
pub async fn reload_workflows(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.engine.workflows().reload() {
        Ok(reloaded) => Ok(Json(ReloadResponse { reloaded })),
        Err(e) => {
            tracing::error!(error = %e, "workflow reload failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            ))
        }
    }
}
