//! Error types for workflow loading and execution

/// Errors produced by the workflow registry and engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Cyclic workflow reference: {0}")]
    CyclicReference(String),

    #[error("Invalid workflow '{workflow_id}': {reason}")]
    InvalidDefinition { workflow_id: String, reason: String },

    #[error("Agent '{agent_id}' failed: {source}")]
    AgentExecution {
        agent_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Agent '{agent_id}' timed out after {timeout_ms}ms")]
    AgentTimeout { agent_id: String, timeout_ms: u64 },

    /// A loop ran out of iterations without satisfying its exit
    /// condition. The engine treats this as non-fatal (the fallback
    /// agent, if any, absorbs it); the variant exists for callers
    /// whose policy is stricter.
    #[error("Loop on '{condition_key}' exhausted after {iterations} iterations")]
    LoopExhausted {
        condition_key: String,
        iterations: u32,
    },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
