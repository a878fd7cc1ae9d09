//! Workflow definitions, registry, and step resolution

pub mod registry;
pub mod resolve;
pub mod schema;

pub use registry::WorkflowRegistry;
pub use resolve::{flatten, WorkflowSet};
pub use schema::{LoopDirective, Step, SubWorkflowStep, WorkflowDefinition, DEFAULT_FALLBACK_MESSAGE};
