//! Agent adapter seam and registry
//!
//! Agents are external collaborators (an LLM call behind a prompt, a
//! database-backed tool) invoked by id. The engine only sees the
//! `AgentHandler` contract: take a message with metadata, return an
//! updated message and an optional next-agent override. Failure is an
//! error, never a sentinel reply.
//!
//! The registry is an explicit registration table populated at
//! startup: a closed set of string ids mapped to factory closures.
//! Resolved handler instances are cached per id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Error;
use crate::events::ProgressSender;
use crate::message::Message;

/// Input for one agent invocation
#[derive(Clone)]
pub struct AgentRequest {
    /// Current message, carrying the accumulated metadata
    pub message: Message,
    /// Stable id for the client conversation
    pub session_id: String,
    /// Channel for intermediate output (thinking, partial content)
    pub events: ProgressSender,
}

/// Output of one agent invocation
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Updated message; its metadata is merged into the running map
    pub message: Message,
    /// Optional jump target: the named agent runs next instead of
    /// the positionally next step
    pub next_agent: Option<String>,
}

impl AgentReply {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            next_agent: None,
        }
    }

    pub fn with_next_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.next_agent = Some(agent_id.into());
        self
    }
}

/// The contract every agent implementation fulfils
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn execute(&self, request: AgentRequest) -> anyhow::Result<AgentReply>;
}

impl std::fmt::Debug for dyn AgentHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AgentHandler")
    }
}

/// Adapter turning an async closure into an [`AgentHandler`].
/// The workhorse for tests and embedders wiring small agents.
pub struct FnAgent<F> {
    f: F,
}

impl<F> FnAgent<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> AgentHandler for FnAgent<F>
where
    F: Fn(AgentRequest) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<AgentReply>> + Send,
{
    async fn execute(&self, request: AgentRequest) -> anyhow::Result<AgentReply> {
        (self.f)(request).await
    }
}

type AgentFactory = Box<dyn Fn() -> Arc<dyn AgentHandler> + Send + Sync>;

/// Registry of available agents: id -> factory, with an instance
/// cache so each agent is constructed once per process.
#[derive(Default)]
pub struct AgentRegistry {
    factories: HashMap<String, AgentFactory>,
    instances: Mutex<HashMap<String, Arc<dyn AgentHandler>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent factory under an id
    pub fn register<F>(&mut self, agent_id: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn AgentHandler> + Send + Sync + 'static,
    {
        self.factories.insert(agent_id.into(), Box::new(factory));
    }

    /// Register an already-constructed handler under an id
    pub fn register_handler(&mut self, agent_id: impl Into<String>, handler: Arc<dyn AgentHandler>) {
        self.factories
            .insert(agent_id.into(), Box::new(move || handler.clone()));
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.factories.contains_key(agent_id)
    }

    /// All registered agent ids, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Get the handler for an id, constructing and caching it on
    /// first use
    pub fn resolve(&self, agent_id: &str) -> Result<Arc<dyn AgentHandler>, Error> {
        {
            let instances = self.instances.lock().expect("agent cache poisoned");
            if let Some(handler) = instances.get(agent_id) {
                return Ok(handler.clone());
            }
        }

        let factory = self
            .factories
            .get(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;

        let handler = factory();
        tracing::debug!(agent_id, "instantiated agent");

        let mut instances = self.instances.lock().expect("agent cache poisoned");
        instances.insert(agent_id.to_string(), handler.clone());
        Ok(handler)
    }
}
