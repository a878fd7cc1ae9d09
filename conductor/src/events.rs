//! Progress events for real-time visibility into a workflow run
//!
//! The engine pushes events onto an mpsc channel; a transport task
//! (the WebSocket handler, the CLI printer) drains the channel and
//! forwards events outward. The engine guarantees in-order emission
//! within one execution; delivery beyond the channel is the
//! transport's concern.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted at every step boundary of a workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Execution is starting
    WorkflowStarted {
        workflow_id: String,
        /// Number of top-level flattened steps
        step_count: usize,
    },

    /// A step is about to run
    StepStarted {
        /// Agent id for agent steps, "loop" for loop steps
        step_id: String,
        step_index: usize,
    },

    /// A step finished (also emitted when the step's agent failed)
    StepCompleted {
        step_id: String,
        step_index: usize,
        duration_ms: u64,
        /// Short human summary for a UI timeline, when one applies
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        success: bool,
    },

    /// A loop is starting another pass over its body
    LoopIteration {
        condition_key: String,
        iteration: u32,
        max_iterations: u32,
    },

    /// A loop exhausted its budget and is diverting to its fallback
    FallbackTriggered {
        agent_id: String,
        condition_key: String,
        iteration: u32,
    },

    /// The whole workflow finished
    WorkflowCompleted {
        workflow_id: String,
        duration_ms: u64,
    },

    /// The workflow aborted with an error
    WorkflowError {
        workflow_id: String,
        message: String,
    },
}

impl ProgressEvent {
    /// The serialized tag name of this event
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::WorkflowStarted { .. } => "workflow_started",
            ProgressEvent::StepStarted { .. } => "step_started",
            ProgressEvent::StepCompleted { .. } => "step_completed",
            ProgressEvent::LoopIteration { .. } => "loop_iteration",
            ProgressEvent::FallbackTriggered { .. } => "fallback_triggered",
            ProgressEvent::WorkflowCompleted { .. } => "workflow_completed",
            ProgressEvent::WorkflowError { .. } => "workflow_error",
        }
    }

    /// The agent/step the event concerns, for transports that key
    /// their frames by agent id. Workflow-level events report the
    /// engine itself.
    pub fn subject(&self) -> &str {
        match self {
            ProgressEvent::StepStarted { step_id, .. }
            | ProgressEvent::StepCompleted { step_id, .. } => step_id,
            ProgressEvent::FallbackTriggered { agent_id, .. } => agent_id,
            _ => "workflow_manager",
        }
    }

    /// One-line description suitable for a status feed
    pub fn describe(&self) -> String {
        match self {
            ProgressEvent::WorkflowStarted {
                workflow_id,
                step_count,
            } => format!("Starting workflow {workflow_id} ({step_count} steps)"),
            ProgressEvent::StepStarted { step_id, .. } => {
                format!("Starting {step_id}")
            }
            ProgressEvent::StepCompleted {
                step_id, summary, ..
            } => match summary {
                Some(s) => format!("Completed {step_id}: {s}"),
                None => format!("Completed {step_id}"),
            },
            ProgressEvent::LoopIteration {
                condition_key,
                iteration,
                max_iterations,
            } => format!("Loop on '{condition_key}': iteration {iteration}/{max_iterations}"),
            ProgressEvent::FallbackTriggered {
                agent_id,
                iteration,
                ..
            } => format!("Loop exhausted after {iteration} iterations, diverting to {agent_id}"),
            ProgressEvent::WorkflowCompleted { workflow_id, .. } => {
                format!("Workflow {workflow_id} completed")
            }
            ProgressEvent::WorkflowError {
                workflow_id,
                message,
            } => format!("Workflow {workflow_id} failed: {message}"),
        }
    }
}

/// Sender half of the progress channel
pub type EventSender = mpsc::UnboundedSender<ProgressEvent>;

/// Receiver half of the progress channel
pub type EventReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Create a new progress channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Helper wrapping an optional sender: absence of an observer is a
/// no-op, never an error, and a dropped receiver is ignored.
#[derive(Clone, Default)]
pub struct ProgressSender {
    sender: Option<EventSender>,
}

impl ProgressSender {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// No-op sender; events are discarded
    pub fn none() -> Self {
        Self { sender: None }
    }

    /// True once the receiving side has gone away. Used to notice a
    /// disconnected observer between steps.
    pub fn is_closed(&self) -> bool {
        match &self.sender {
            Some(s) => s.is_closed(),
            None => false,
        }
    }

    pub fn send(&self, event: ProgressEvent) {
        if let Some(ref sender) = self.sender {
            // Receiver may have dropped; nothing to do about it here
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_channel() {
        let (tx, mut rx) = event_channel();
        let sender = ProgressSender::new(tx);

        sender.send(ProgressEvent::StepStarted {
            step_id: "router".to_string(),
            step_index: 0,
        });

        match rx.recv().await.unwrap() {
            ProgressEvent::StepStarted { step_id, .. } => assert_eq!(step_id, "router"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_noop_sender() {
        let sender = ProgressSender::none();
        assert!(!sender.is_closed());

        // Must not panic without a receiver
        sender.send(ProgressEvent::WorkflowCompleted {
            workflow_id: "w".to_string(),
            duration_ms: 1,
        });
    }

    #[test]
    fn test_closed_detection() {
        let (tx, rx) = event_channel();
        let sender = ProgressSender::new(tx);
        assert!(!sender.is_closed());

        drop(rx);
        assert!(sender.is_closed());
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent::LoopIteration {
            condition_key: "result_count".to_string(),
            iteration: 2,
            max_iterations: 3,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"loop_iteration\""));
        assert!(json.contains("\"iteration\":2"));

        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ProgressEvent::LoopIteration { iteration, .. } => assert_eq!(iteration, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_subject() {
        let step = ProgressEvent::StepStarted {
            step_id: "query_writer".to_string(),
            step_index: 1,
        };
        assert_eq!(step.subject(), "query_writer");

        let wf = ProgressEvent::WorkflowStarted {
            workflow_id: "w".to_string(),
            step_count: 2,
        };
        assert_eq!(wf.subject(), "workflow_manager");
    }
}
