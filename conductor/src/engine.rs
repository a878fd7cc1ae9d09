//! Workflow execution engine
//!
//! Runs a flattened workflow step by step: agents execute in order,
//! each reply's metadata merges into the accumulated map, loop
//! directives repeat their body until a metadata condition is met or
//! the iteration cap diverts to the fallback agent, and an agent can
//! override the next step by naming another agent. Progress events
//! stream out continuously and are also collected into a trace that
//! ships with the final result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::agents::{AgentRegistry, AgentReply, AgentRequest};
use crate::error::Error;
use crate::events::{ProgressEvent, ProgressSender};
use crate::message::{keys, Message, Metadata};
use crate::session::SessionStore;
use crate::workflow::schema::{LoopDirective, Step};
use crate::workflow::WorkflowRegistry;

const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock budget for a single agent invocation
    pub agent_timeout: Duration,
    /// Workflow used when a caller does not name one
    pub default_workflow: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            default_workflow: None,
        }
    }
}

/// One execution request
#[derive(Clone, Default)]
pub struct ExecutionRequest {
    /// User input handed to the first step
    pub content: String,
    /// Reuse an existing conversation; a missing id gets a new one
    pub session_id: Option<String>,
    /// Initial metadata, merged over any session-persisted markers
    pub metadata: Metadata,
    /// Progress observer; [`ProgressSender::none`] for fire-and-forget
    pub events: ProgressSender,
}

impl ExecutionRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_events(mut self, events: ProgressSender) -> Self {
        self.events = events;
        self
    }
}

/// Final result of a workflow execution
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Content of the last reply
    pub content: String,
    pub session_id: String,
    /// Metadata accumulated across all steps
    pub metadata: Metadata,
    /// Every progress event the run emitted, in order
    pub trace: Vec<ProgressEvent>,
}

/// Shared, clonable engine handle
#[derive(Clone)]
pub struct WorkflowEngine {
    workflows: Arc<WorkflowRegistry>,
    agents: Arc<AgentRegistry>,
    sessions: SessionStore,
    config: EngineConfig,
}

/// What an agent step asks the driver to do next
enum StepFlow {
    /// Advance to the positionally next step
    Next,
    /// Jump to the step at this index in the top-level list
    JumpTo(usize),
    /// Stop the workflow; the current content is the final answer
    Halt,
}

/// Per-execution mutable state
struct ExecContext {
    session_id: String,
    /// Content flowing from reply to reply
    content: String,
    /// The user's original input, preserved for fallback rewrites
    original_content: String,
    metadata: Metadata,
    events: ProgressSender,
    trace: Vec<ProgressEvent>,
}

impl ExecContext {
    fn emit(&mut self, event: ProgressEvent) {
        self.trace.push(event.clone());
        self.events.send(event);
    }
}

impl WorkflowEngine {
    pub fn new(
        workflows: Arc<WorkflowRegistry>,
        agents: Arc<AgentRegistry>,
        sessions: SessionStore,
        config: EngineConfig,
    ) -> Self {
        Self {
            workflows,
            agents,
            sessions,
            config,
        }
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn default_workflow(&self) -> Option<&str> {
        self.config.default_workflow.as_deref()
    }

    /// Execute a workflow to completion.
    ///
    /// Progress events stream to `request.events` as they happen and
    /// are also collected into the outcome's trace. A failing agent
    /// aborts the run after a `step_completed` (success = false) and
    /// a `workflow_error` event.
    pub async fn run(
        &self,
        workflow_id: &str,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome, Error> {
        let started = Instant::now();

        let steps = match self.workflows.flattened(workflow_id) {
            Ok(steps) => steps,
            Err(e) => {
                request.events.send(ProgressEvent::WorkflowError {
                    workflow_id: workflow_id.to_string(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let session_id = self
            .sessions
            .get_or_create(request.session_id.as_deref(), "anonymous");

        // Session markers persist across turns; the request's own
        // metadata wins on conflicts.
        let mut metadata = self
            .sessions
            .get(&session_id)
            .map(|s| s.metadata)
            .unwrap_or_default();
        metadata.merge(&request.metadata);

        let mut ctx = ExecContext {
            session_id: session_id.clone(),
            content: request.content.clone(),
            original_content: request.content.clone(),
            metadata,
            events: request.events,
            trace: Vec::new(),
        };

        ctx.emit(ProgressEvent::WorkflowStarted {
            workflow_id: workflow_id.to_string(),
            step_count: steps.len(),
        });

        self.sessions
            .append_message(&session_id, Message::user(&request.content));

        let result = self.drive(&mut ctx, &steps).await;

        match result {
            Ok(()) => {
                ctx.emit(ProgressEvent::WorkflowCompleted {
                    workflow_id: workflow_id.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });

                self.sessions.append_message(
                    &session_id,
                    Message::assistant(&ctx.content).with_metadata(ctx.metadata.clone()),
                );
                self.sessions.set_metadata(&session_id, ctx.metadata.clone());

                tracing::info!(
                    workflow_id,
                    session_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "workflow completed"
                );

                Ok(ExecutionOutcome {
                    content: ctx.content,
                    session_id,
                    metadata: ctx.metadata,
                    trace: ctx.trace,
                })
            }
            Err(e) => {
                ctx.emit(ProgressEvent::WorkflowError {
                    workflow_id: workflow_id.to_string(),
                    message: e.to_string(),
                });
                // Markers accumulated before the failure still land in
                // the session so callers can report them with the error.
                self.sessions.set_metadata(&session_id, ctx.metadata.clone());
                tracing::error!(workflow_id, session_id, error = %e, "workflow failed");
                Err(e)
            }
        }
    }

    /// Run a single agent outside any workflow. Backs the per-agent
    /// transport channel and ad-hoc CLI invocations.
    pub async fn run_agent(
        &self,
        agent_id: &str,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome, Error> {
        let session_id = self
            .sessions
            .get_or_create(request.session_id.as_deref(), "anonymous");

        let mut metadata = self
            .sessions
            .get(&session_id)
            .map(|s| s.metadata)
            .unwrap_or_default();
        metadata.merge(&request.metadata);

        let mut ctx = ExecContext {
            session_id: session_id.clone(),
            content: request.content.clone(),
            original_content: request.content.clone(),
            metadata,
            events: request.events,
            trace: Vec::new(),
        };

        self.sessions
            .append_message(&session_id, Message::user(&request.content));

        match self.invoke_observed(&mut ctx, agent_id, 0, None).await {
            Ok(_) => {
                self.sessions.append_message(
                    &session_id,
                    Message::assistant(&ctx.content).with_metadata(ctx.metadata.clone()),
                );
                self.sessions.set_metadata(&session_id, ctx.metadata.clone());
                Ok(ExecutionOutcome {
                    content: ctx.content,
                    session_id,
                    metadata: ctx.metadata,
                    trace: ctx.trace,
                })
            }
            Err(e) => {
                self.sessions.set_metadata(&session_id, ctx.metadata.clone());
                tracing::error!(agent_id, session_id, error = %e, "agent invocation failed");
                Err(e)
            }
        }
    }

    /// Step driver for the top-level flattened list. Only this level
    /// supports positional jumps from a next-agent override.
    async fn drive(&self, ctx: &mut ExecContext, steps: &[Step]) -> Result<(), Error> {
        let mut index = 0;
        let mut observer_gone = false;
        while index < steps.len() {
            // An observer that disconnected mid-run stops receiving
            // events; the run itself continues for the session.
            if !observer_gone && ctx.events.is_closed() {
                observer_gone = true;
                tracing::debug!(step_index = index, "progress receiver dropped mid-run");
            }
            match &steps[index] {
                Step::Agent(agent_id) => {
                    match self.run_agent_step(ctx, agent_id, index, steps).await? {
                        StepFlow::Next => index += 1,
                        StepFlow::JumpTo(target) => index = target,
                        StepFlow::Halt => return Ok(()),
                    }
                }
                Step::Loop(loop_step) => {
                    match self.run_loop_step(ctx, &loop_step.directive, index).await? {
                        StepFlow::Halt => return Ok(()),
                        _ => index += 1,
                    }
                }
                // Flattening removed every sub-workflow reference
                Step::SubWorkflow(_) => index += 1,
            }
        }
        Ok(())
    }

    /// Run one agent step, merge its metadata, and decide the flow.
    async fn run_agent_step(
        &self,
        ctx: &mut ExecContext,
        agent_id: &str,
        index: usize,
        steps: &[Step],
    ) -> Result<StepFlow, Error> {
        let reply = self.invoke_observed(ctx, agent_id, index, None).await?;

        if ctx.metadata.blocked() {
            tracing::warn!(agent_id, "agent blocked the workflow");
            return Ok(StepFlow::Halt);
        }

        if let Some(target) = reply.next_agent {
            if !self.agents.contains(&target) {
                return Err(Error::AgentNotFound(target));
            }
            // Jump when the target has a position in this workflow;
            // a target outside it runs inline as an extra step.
            if let Some(pos) = steps
                .iter()
                .position(|s| matches!(s, Step::Agent(id) if *id == target))
            {
                tracing::debug!(from = agent_id, to = %target, "next-agent jump");
                return Ok(StepFlow::JumpTo(pos));
            }
            tracing::debug!(from = agent_id, to = %target, "next-agent inline run");
            self.invoke_observed(ctx, &target, index, None).await?;
            if ctx.metadata.blocked() {
                return Ok(StepFlow::Halt);
            }
        }

        Ok(StepFlow::Next)
    }

    /// Run a loop directive: body passes while the condition holds,
    /// up to the cap, then the fallback agent exactly once if the
    /// exit condition was never satisfied. Exhaustion never fails
    /// the workflow.
    async fn run_loop_step(
        &self,
        ctx: &mut ExecContext,
        directive: &LoopDirective,
        index: usize,
    ) -> Result<StepFlow, Error> {
        let step_started = Instant::now();
        ctx.emit(ProgressEvent::StepStarted {
            step_id: "loop".to_string(),
            step_index: index,
        });

        let mut satisfied = false;
        for iteration in 1..=directive.max_iterations {
            ctx.emit(ProgressEvent::LoopIteration {
                condition_key: directive.condition_key.clone(),
                iteration,
                max_iterations: directive.max_iterations,
            });

            if let Err(e) = self.run_body(ctx, &directive.steps, index).await {
                ctx.emit(ProgressEvent::StepCompleted {
                    step_id: "loop".to_string(),
                    step_index: index,
                    duration_ms: step_started.elapsed().as_millis() as u64,
                    summary: None,
                    success: false,
                });
                return Err(e);
            }

            if ctx.metadata.blocked() {
                return Ok(StepFlow::Halt);
            }

            if condition_satisfied(&ctx.metadata, directive) {
                satisfied = true;
                break;
            }
        }

        if !satisfied {
            if let Some(fallback_agent) = &directive.fallback_agent {
                ctx.emit(ProgressEvent::FallbackTriggered {
                    agent_id: fallback_agent.clone(),
                    condition_key: directive.condition_key.clone(),
                    iteration: directive.max_iterations,
                });
                self.run_fallback(ctx, directive, fallback_agent, index)
                    .await?;
                if ctx.metadata.blocked() {
                    return Ok(StepFlow::Halt);
                }
            } else {
                tracing::warn!(
                    condition_key = %directive.condition_key,
                    iterations = directive.max_iterations,
                    "loop exhausted without a fallback agent"
                );
            }
        }

        ctx.emit(ProgressEvent::StepCompleted {
            step_id: "loop".to_string(),
            step_index: index,
            duration_ms: step_started.elapsed().as_millis() as u64,
            summary: Some(if satisfied {
                "condition satisfied".to_string()
            } else {
                format!("exhausted after {} iterations", directive.max_iterations)
            }),
            success: true,
        });

        Ok(StepFlow::Next)
    }

    /// One pass over a loop body. Bodies may hold nested loops (on
    /// other condition keys), hence the boxed recursion. Next-agent
    /// overrides inside a body run inline; positional jumps only
    /// exist at the top level.
    fn run_body<'a>(
        &'a self,
        ctx: &'a mut ExecContext,
        steps: &'a [Step],
        index: usize,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            for step in steps {
                match step {
                    Step::Agent(agent_id) => {
                        let reply = self.invoke_observed(ctx, agent_id, index, None).await?;
                        if ctx.metadata.blocked() {
                            return Ok(());
                        }
                        if let Some(target) = reply.next_agent {
                            if !self.agents.contains(&target) {
                                return Err(Error::AgentNotFound(target));
                            }
                            self.invoke_observed(ctx, &target, index, None).await?;
                            if ctx.metadata.blocked() {
                                return Ok(());
                            }
                        }
                    }
                    Step::Loop(inner) => {
                        self.run_loop_step(ctx, &inner.directive, index).await?;
                    }
                    Step::SubWorkflow(_) => {}
                }
            }
            Ok(())
        })
    }

    /// Divert to the fallback agent with the directive's message.
    /// Rewrite markers land in the metadata first so the agent (and
    /// later steps) can tell a diverted pass from a normal one.
    async fn run_fallback(
        &self,
        ctx: &mut ExecContext,
        directive: &LoopDirective,
        fallback_agent: &str,
        index: usize,
    ) -> Result<(), Error> {
        if !ctx.metadata.contains(keys::ORIGINAL_QUERY) {
            let original = ctx.original_content.clone();
            ctx.metadata.insert(keys::ORIGINAL_QUERY, original);
        }
        ctx.metadata.insert(keys::QUERY_REWRITE_ATTEMPTED, true);
        let rewrites = ctx
            .metadata
            .get(keys::REWRITE_COUNT)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        ctx.metadata.insert(keys::REWRITE_COUNT, rewrites + 1);

        let message = directive.fallback_message().to_string();
        self.invoke_observed(ctx, fallback_agent, index, Some(message))
            .await?;
        Ok(())
    }

    /// Invoke one agent with step events around it, merging reply
    /// metadata and content into the context. `content_override`
    /// substitutes the message content for fallback diversions.
    async fn invoke_observed(
        &self,
        ctx: &mut ExecContext,
        agent_id: &str,
        index: usize,
        content_override: Option<String>,
    ) -> Result<AgentReply, Error> {
        let started = Instant::now();
        ctx.emit(ProgressEvent::StepStarted {
            step_id: agent_id.to_string(),
            step_index: index,
        });

        let content = content_override.unwrap_or_else(|| ctx.content.clone());
        let message = Message::user(content).with_metadata(ctx.metadata.clone());
        let request = AgentRequest {
            message,
            session_id: ctx.session_id.clone(),
            events: ctx.events.clone(),
        };

        match self.invoke(agent_id, request).await {
            Ok(reply) => {
                ctx.metadata.merge(&reply.message.metadata);
                ctx.content = reply.message.content.clone();

                ctx.emit(ProgressEvent::StepCompleted {
                    step_id: agent_id.to_string(),
                    step_index: index,
                    duration_ms: started.elapsed().as_millis() as u64,
                    summary: step_summary(&ctx.metadata),
                    success: true,
                });
                Ok(reply)
            }
            Err(e) => {
                ctx.emit(ProgressEvent::StepCompleted {
                    step_id: agent_id.to_string(),
                    step_index: index,
                    duration_ms: started.elapsed().as_millis() as u64,
                    summary: None,
                    success: false,
                });
                Err(e)
            }
        }
    }

    /// Resolve and execute a single agent under the timeout budget
    async fn invoke(&self, agent_id: &str, request: AgentRequest) -> Result<AgentReply, Error> {
        let handler = self.agents.resolve(agent_id)?;

        match tokio::time::timeout(self.config.agent_timeout, handler.execute(request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(source)) => Err(Error::AgentExecution {
                agent_id: agent_id.to_string(),
                source,
            }),
            Err(_) => Err(Error::AgentTimeout {
                agent_id: agent_id.to_string(),
                timeout_ms: self.config.agent_timeout.as_millis() as u64,
            }),
        }
    }
}

/// Exit check run after each body pass. With a condition value the
/// loop keeps going while the key still equals it (the value names
/// the not-yet-satisfied state); without one it keeps going while
/// the key is falsy or absent.
fn condition_satisfied(metadata: &Metadata, directive: &LoopDirective) -> bool {
    match &directive.condition_value {
        Some(value) => match metadata.get(&directive.condition_key) {
            Some(current) => current != value,
            None => {
                tracing::warn!(
                    condition_key = %directive.condition_key,
                    "condition key absent from metadata, exiting loop"
                );
                true
            }
        },
        None => metadata.is_truthy(&directive.condition_key),
    }
}

/// Short human summary of a step from well-known metadata keys
fn step_summary(metadata: &Metadata) -> Option<String> {
    if let Some(count) = metadata.result_count() {
        return Some(format!("{count} results"));
    }
    if let Some(passed) = metadata.safety_check_passed() {
        return Some(if passed {
            "safety check passed".to_string()
        } else {
            "safety check failed".to_string()
        });
    }
    metadata.assessment().map(|a| a.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::FnAgent;
    use crate::workflow::schema::WorkflowDefinition;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine_with(
        agents: AgentRegistry,
        workflows: &[(&str, &str)],
        config: EngineConfig,
    ) -> WorkflowEngine {
        let registry = WorkflowRegistry::new();
        for (id, json) in workflows {
            registry.insert(*id, WorkflowDefinition::from_json(json).unwrap());
        }
        WorkflowEngine::new(
            Arc::new(registry),
            Arc::new(agents),
            SessionStore::new(),
            config,
        )
    }

    fn tagging_agent(tag: &'static str) -> Arc<dyn crate::agents::AgentHandler> {
        Arc::new(FnAgent::new(move |req: AgentRequest| async move {
            Ok(AgentReply::new(Message::assistant(format!(
                "{} {tag}",
                req.message.content
            ))))
        }))
    }

    #[tokio::test]
    async fn test_sequential_execution_threads_content() {
        let mut agents = AgentRegistry::new();
        agents.register_handler("a", tagging_agent("a"));
        agents.register_handler("b", tagging_agent("b"));

        let engine = engine_with(
            agents,
            &[("MAIN", r#"{"steps": ["a", "b"]}"#)],
            EngineConfig::default(),
        );

        let outcome = engine
            .run("MAIN", ExecutionRequest::new("start"))
            .await
            .unwrap();
        assert_eq!(outcome.content, "start a b");
    }

    #[tokio::test]
    async fn test_unknown_workflow_fails_before_any_step() {
        let engine = engine_with(AgentRegistry::new(), &[], EngineConfig::default());
        match engine.run("MISSING", ExecutionRequest::new("x")).await {
            Err(Error::WorkflowNotFound(id)) => assert_eq!(id, "MISSING"),
            other => panic!("expected WorkflowNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_agent_timeout() {
        let mut agents = AgentRegistry::new();
        agents.register("slow", || {
            Arc::new(FnAgent::new(|req: AgentRequest| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(AgentReply::new(req.message))
            }))
        });

        let engine = engine_with(
            agents,
            &[("MAIN", r#"{"steps": ["slow"]}"#)],
            EngineConfig {
                agent_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );

        match engine.run("MAIN", ExecutionRequest::new("x")).await {
            Err(Error::AgentTimeout { agent_id, .. }) => assert_eq!(agent_id, "slow"),
            other => panic!("expected AgentTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blocked_marker_halts_workflow() {
        let mut agents = AgentRegistry::new();
        agents.register("guard", || {
            Arc::new(FnAgent::new(|_req: AgentRequest| async move {
                let mut meta = Metadata::new();
                meta.insert(keys::BLOCKED, true);
                Ok(AgentReply::new(
                    Message::assistant("request rejected").with_metadata(meta),
                ))
            }))
        });
        let reached = Arc::new(AtomicUsize::new(0));
        let reached_inner = reached.clone();
        agents.register_handler(
            "after",
            Arc::new(FnAgent::new(move |req: AgentRequest| {
                let reached = reached_inner.clone();
                async move {
                    reached.fetch_add(1, Ordering::SeqCst);
                    Ok(AgentReply::new(req.message))
                }
            })),
        );

        let engine = engine_with(
            agents,
            &[("MAIN", r#"{"steps": ["guard", "after"]}"#)],
            EngineConfig::default(),
        );

        let outcome = engine
            .run("MAIN", ExecutionRequest::new("bad input"))
            .await
            .unwrap();
        assert_eq!(outcome.content, "request rejected");
        assert_eq!(reached.load(Ordering::SeqCst), 0);
        assert!(matches!(
            outcome.trace.last(),
            Some(ProgressEvent::WorkflowCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn test_metadata_accumulates_across_steps() {
        let mut agents = AgentRegistry::new();
        agents.register("counter", || {
            Arc::new(FnAgent::new(|req: AgentRequest| async move {
                let mut meta = Metadata::new();
                meta.insert(keys::RESULT_COUNT, 4);
                Ok(AgentReply::new(
                    Message::assistant(req.message.content).with_metadata(meta),
                ))
            }))
        });
        agents.register("reader", || {
            Arc::new(FnAgent::new(|req: AgentRequest| async move {
                let count = req.message.metadata.result_count().unwrap_or(0);
                Ok(AgentReply::new(Message::assistant(format!(
                    "saw {count}"
                ))))
            }))
        });

        let engine = engine_with(
            agents,
            &[("MAIN", r#"{"steps": ["counter", "reader"]}"#)],
            EngineConfig::default(),
        );

        let outcome = engine.run("MAIN", ExecutionRequest::new("q")).await.unwrap();
        assert_eq!(outcome.content, "saw 4");
        assert_eq!(outcome.metadata.result_count(), Some(4));
    }

    #[tokio::test]
    async fn test_loop_body_that_never_sets_the_key_runs_once() {
        let body_runs = Arc::new(AtomicUsize::new(0));
        let fallback_runs = Arc::new(AtomicUsize::new(0));

        let mut agents = AgentRegistry::new();
        let body_inner = body_runs.clone();
        agents.register_handler(
            "search",
            Arc::new(FnAgent::new(move |req: AgentRequest| {
                let body = body_inner.clone();
                async move {
                    body.fetch_add(1, Ordering::SeqCst);
                    Ok(AgentReply::new(req.message))
                }
            })),
        );
        let fallback_inner = fallback_runs.clone();
        agents.register_handler(
            "rewriter",
            Arc::new(FnAgent::new(move |req: AgentRequest| {
                let fallback = fallback_inner.clone();
                async move {
                    fallback.fetch_add(1, Ordering::SeqCst);
                    Ok(AgentReply::new(req.message))
                }
            })),
        );

        let engine = engine_with(
            agents,
            &[(
                "MAIN",
                r#"{"steps": [{"loop": {
                    "condition_key": "result_count",
                    "condition_value": 0,
                    "steps": ["search"],
                    "max_iterations": 3,
                    "fallback_agent": "rewriter"
                }}]}"#,
            )],
            EngineConfig::default(),
        );

        engine.run("MAIN", ExecutionRequest::new("q")).await.unwrap();
        assert_eq!(body_runs.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_condition_satisfied_conventions() {
        let directive = LoopDirective {
            condition_key: "n".to_string(),
            condition_value: Some(serde_json::json!(0)),
            steps: vec![],
            max_iterations: 3,
            fallback_agent: None,
            fallback_message: None,
        };

        // An absent key under the equality form exits rather than spins
        let mut meta = Metadata::new();
        assert!(condition_satisfied(&meta, &directive));
        meta.insert("n", 0);
        assert!(!condition_satisfied(&meta, &directive));
        meta.insert("n", 5);
        assert!(condition_satisfied(&meta, &directive));

        let falsy_form = LoopDirective {
            condition_value: None,
            ..directive
        };
        let mut meta = Metadata::new();
        assert!(!condition_satisfied(&meta, &falsy_form));
        meta.insert("n", 0);
        assert!(!condition_satisfied(&meta, &falsy_form));
        meta.insert("n", 1);
        assert!(condition_satisfied(&meta, &falsy_form));
    }
}
