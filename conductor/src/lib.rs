//! Multi-agent workflow orchestration
//!
//! This crate provides:
//! - JSON workflow definitions with sub-workflow composition
//! - A workflow engine with bounded loops, fallback agents, and
//!   next-agent overrides
//! - An agent registry behind a small async trait, so any async
//!   collaborator can act as a step
//! - Progress event streaming over WebSocket and a REST API for
//!   introspection
//!
//! # Example
//!
//! ```rust,ignore
//! use conductor::{AgentRegistry, EngineConfig, ExecutionRequest, SessionStore, WorkflowEngine, WorkflowRegistry};
//!
//! let workflows = WorkflowRegistry::load_dir("workflows")?;
//! let mut agents = AgentRegistry::new();
//! agents.register("responder", || Arc::new(MyResponder::new()));
//!
//! let engine = WorkflowEngine::new(
//!     Arc::new(workflows),
//!     Arc::new(agents),
//!     SessionStore::new(),
//!     EngineConfig::default(),
//! );
//! let outcome = engine.run("MAIN_WORKFLOW", ExecutionRequest::new("hello")).await?;
//! ```

pub mod agents;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod session;
pub mod web;
pub mod workflow;

pub use agents::{AgentHandler, AgentRegistry, AgentReply, AgentRequest, FnAgent};
pub use engine::{EngineConfig, ExecutionOutcome, ExecutionRequest, WorkflowEngine};
pub use error::Error;
pub use events::{event_channel, EventReceiver, EventSender, ProgressEvent, ProgressSender};
pub use message::{Message, MessageRole, Metadata};
pub use session::{ChatSession, SessionStore};
pub use workflow::{LoopDirective, Step, WorkflowDefinition, WorkflowRegistry};
