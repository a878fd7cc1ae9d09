//! Shared application state

use crate::engine::WorkflowEngine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Engine handle; registries and sessions hang off it
    pub engine: WorkflowEngine,
}

impl AppState {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }
}
