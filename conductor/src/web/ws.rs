//! WebSocket handlers for streaming workflow and agent execution
//!
//! Two channels: `/ws/workflow/:workflow_id` runs full workflows,
//! `/ws/agent/:agent_id` invokes a single agent. Both speak the same
//! frame protocol: progress events stream as `stream_update`, the
//! final answer arrives as `workflow_result`, and every frame carries
//! an ISO-8601 timestamp. A client disconnect aborts the in-flight
//! execution.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

use super::state::AppState;
use crate::engine::{ExecutionOutcome, ExecutionRequest};
use crate::error::Error;
use crate::events::{event_channel, EventReceiver, ProgressEvent, ProgressSender};
use crate::message::Metadata;
use crate::session::SessionStore;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Progress descriptions collected while a run streams, so error
/// frames can carry the trace even when the engine returns no outcome
type SharedTrace = Arc<StdMutex<Vec<String>>>;

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Connection query parameters
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Stable client identity; generated when absent
    pub client_id: Option<String>,
}

impl ConnectParams {
    fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("client_{}", uuid::Uuid::new_v4()))
    }
}

/// Incoming WebSocket request from client
#[derive(Debug, Deserialize)]
pub struct ClientRequest {
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Reuse an existing conversation
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Outgoing WebSocket message to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established
    Connected {
        client_id: String,
        channel: String,
        message: String,
        timestamp: String,
    },
    /// Intermediate progress from a running execution
    StreamUpdate {
        agent_id: String,
        message_type: String,
        content: String,
        /// The full progress event for structured consumers
        data: ProgressEvent,
        timestamp: String,
    },
    /// Final result of an execution
    WorkflowResult {
        content: String,
        metadata: Metadata,
        /// Human-readable progress trace of the whole run
        trace_logs: Vec<String>,
        session_id: String,
        timestamp: String,
    },
    /// The execution failed. Metadata accumulated before the failure
    /// still rides along so clients can inspect markers.
    WorkflowError {
        error: String,
        metadata: Metadata,
        trace_logs: Vec<String>,
        session_id: String,
        timestamp: String,
    },
    /// Informational status line
    Status {
        status: String,
        message: String,
        timestamp: String,
    },
    /// Protocol-level error (bad request, unknown channel)
    Error { message: String, timestamp: String },
}

async fn send_message(sender: &WsSender, msg: &ServerMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize server message");
            return false;
        }
    };
    sender
        .lock()
        .await
        .send(Message::Text(json))
        .await
        .is_ok()
}

/// Forward progress events to the client as stream updates, keeping
/// a copy of each description for the final trace
async fn forward_events(mut event_rx: EventReceiver, sender: WsSender, trace: SharedTrace) {
    while let Some(event) = event_rx.recv().await {
        let content = event.describe();
        trace.lock().expect("trace poisoned").push(content.clone());

        let msg = ServerMessage::StreamUpdate {
            agent_id: event.subject().to_string(),
            message_type: event.kind().to_string(),
            content,
            data: event,
            timestamp: timestamp(),
        };
        if !send_message(&sender, &msg).await {
            break;
        }
    }
}

/// Workflow channel handler
pub async fn workflow_handler(
    ws: WebSocketUpgrade,
    Path(workflow_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let client_id = params.client_id();
    ws.on_upgrade(move |socket| handle_workflow_socket(socket, workflow_id, client_id, state))
}

/// Single-agent channel handler
pub async fn agent_handler(
    ws: WebSocketUpgrade,
    Path(agent_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let client_id = params.client_id();
    ws.on_upgrade(move |socket| handle_agent_socket(socket, agent_id, client_id, state))
}

async fn handle_workflow_socket(
    socket: WebSocket,
    workflow_id: String,
    client_id: String,
    state: AppState,
) {
    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sender));

    if !state.engine.workflows().contains(&workflow_id) {
        let msg = ServerMessage::Error {
            message: format!("Workflow not found: {workflow_id}"),
            timestamp: timestamp(),
        };
        send_message(&sender, &msg).await;
        return;
    }

    let connected = ServerMessage::Connected {
        client_id: client_id.clone(),
        channel: format!("workflow/{workflow_id}"),
        message: format!("Connected to workflow {workflow_id}"),
        timestamp: timestamp(),
    };
    if !send_message(&sender, &connected).await {
        return;
    }

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let request = match serde_json::from_str::<ClientRequest>(&text) {
                    Ok(r) => r,
                    Err(e) => {
                        let msg = ServerMessage::Error {
                            message: format!("Invalid request: {e}"),
                            timestamp: timestamp(),
                        };
                        if !send_message(&sender, &msg).await {
                            return;
                        }
                        continue;
                    }
                };

                let status = ServerMessage::Status {
                    status: "running".to_string(),
                    message: format!("Running workflow {workflow_id}"),
                    timestamp: timestamp(),
                };
                if !send_message(&sender, &status).await {
                    return;
                }

                // Resolve the session now so the error frame can name
                // it even when the client did not send an id.
                let session_id = state
                    .engine
                    .sessions()
                    .get_or_create(request.session_id.as_deref(), &client_id);

                let engine = state.engine.clone();
                let wf = workflow_id.clone();
                let job_session = session_id.clone();
                let still_connected = run_streamed(
                    &sender,
                    &mut receiver,
                    state.engine.sessions().clone(),
                    session_id,
                    move |events| async move {
                        engine
                            .run(
                                &wf,
                                ExecutionRequest {
                                    content: request.message,
                                    session_id: Some(job_session),
                                    metadata: request.metadata,
                                    events,
                                },
                            )
                            .await
                    },
                )
                .await;
                if !still_connected {
                    return;
                }
            }
            Message::Close(_) => {
                tracing::info!(workflow_id, client_id, "websocket closed");
                break;
            }
            _ => {}
        }
    }
}

async fn handle_agent_socket(
    socket: WebSocket,
    agent_id: String,
    client_id: String,
    state: AppState,
) {
    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sender));

    if !state.engine.agents().contains(&agent_id) {
        let msg = ServerMessage::Error {
            message: format!("Agent not found: {agent_id}"),
            timestamp: timestamp(),
        };
        send_message(&sender, &msg).await;
        return;
    }

    let connected = ServerMessage::Connected {
        client_id: client_id.clone(),
        channel: format!("agent/{agent_id}"),
        message: format!("Connected to agent {agent_id}"),
        timestamp: timestamp(),
    };
    if !send_message(&sender, &connected).await {
        return;
    }

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let request = match serde_json::from_str::<ClientRequest>(&text) {
                    Ok(r) => r,
                    Err(e) => {
                        let msg = ServerMessage::Error {
                            message: format!("Invalid request: {e}"),
                            timestamp: timestamp(),
                        };
                        if !send_message(&sender, &msg).await {
                            return;
                        }
                        continue;
                    }
                };

                let status = ServerMessage::Status {
                    status: "running".to_string(),
                    message: format!("Invoking agent {agent_id}"),
                    timestamp: timestamp(),
                };
                if !send_message(&sender, &status).await {
                    return;
                }

                let session_id = state
                    .engine
                    .sessions()
                    .get_or_create(request.session_id.as_deref(), &client_id);

                let engine = state.engine.clone();
                let id = agent_id.clone();
                let job_session = session_id.clone();
                let still_connected = run_streamed(
                    &sender,
                    &mut receiver,
                    state.engine.sessions().clone(),
                    session_id,
                    move |events| async move {
                        engine
                            .run_agent(
                                &id,
                                ExecutionRequest {
                                    content: request.message,
                                    session_id: Some(job_session),
                                    metadata: request.metadata,
                                    events,
                                },
                            )
                            .await
                    },
                )
                .await;
                if !still_connected {
                    return;
                }
            }
            Message::Close(_) => {
                tracing::info!(agent_id, client_id, "websocket closed");
                break;
            }
            _ => {}
        }
    }
}

/// Drive one execution while streaming its events, watching for the
/// client going away. Returns false when the connection is gone (the
/// execution is aborted in that case).
async fn run_streamed<F, Fut>(
    sender: &WsSender,
    receiver: &mut SplitStream<WebSocket>,
    sessions: SessionStore,
    session_id: String,
    exec: F,
) -> bool
where
    F: FnOnce(ProgressSender) -> Fut,
    Fut: std::future::Future<Output = Result<ExecutionOutcome, Error>> + Send + 'static,
{
    let (event_tx, event_rx) = event_channel();
    let trace: SharedTrace = Arc::new(StdMutex::new(Vec::new()));
    let forward_task = tokio::spawn(forward_events(event_rx, sender.clone(), trace.clone()));

    let mut job = tokio::spawn(exec(ProgressSender::new(event_tx)));

    let result = loop {
        tokio::select! {
            result = &mut job => break result,
            incoming = receiver.next() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {
                    tracing::info!("client disconnected, aborting execution");
                    job.abort();
                    forward_task.abort();
                    return false;
                }
                // Frames arriving mid-run are ignored
                Some(Ok(_)) => {}
            },
        }
    };

    // The job dropped its event sender, so the forwarder drains the
    // channel and exits on its own.
    let _ = forward_task.await;
    let trace_logs = trace.lock().expect("trace poisoned").clone();

    match result {
        Ok(Ok(outcome)) => {
            let msg = ServerMessage::WorkflowResult {
                content: outcome.content,
                metadata: outcome.metadata,
                trace_logs,
                session_id: outcome.session_id,
                timestamp: timestamp(),
            };
            send_message(sender, &msg).await
        }
        Ok(Err(e)) => {
            // Failed runs persist their accumulated metadata to the
            // session, which is where the error frame picks it up.
            let metadata = sessions
                .get(&session_id)
                .map(|s| s.metadata)
                .unwrap_or_default();
            let msg = ServerMessage::WorkflowError {
                error: e.to_string(),
                metadata,
                trace_logs,
                session_id,
                timestamp: timestamp(),
            };
            send_message(sender, &msg).await
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "execution task failed");
            let msg = ServerMessage::Error {
                message: "Internal execution failure".to_string(),
                timestamp: timestamp(),
            };
            send_message(sender, &msg).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_request_parses_minimal() {
        let req: ClientRequest = serde_json::from_str(r#"{"message": "hello"}"#).unwrap();
        assert_eq!(req.message, "hello");
        assert!(req.metadata.is_empty());
        assert!(req.session_id.is_none());
    }

    #[test]
    fn test_client_request_with_metadata() {
        let req: ClientRequest = serde_json::from_str(
            r#"{"message": "q", "metadata": {"result_count": 0}, "session_id": "s1"}"#,
        )
        .unwrap();
        assert_eq!(req.metadata.result_count(), Some(0));
        assert_eq!(req.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_generated_client_id() {
        let params = ConnectParams { client_id: None };
        assert!(params.client_id().starts_with("client_"));

        let params = ConnectParams {
            client_id: Some("c-17".to_string()),
        };
        assert_eq!(params.client_id(), "c-17");
    }

    #[test]
    fn test_server_message_frames() {
        let msg = ServerMessage::StreamUpdate {
            agent_id: "router".to_string(),
            message_type: "step_started".to_string(),
            content: "Starting router".to_string(),
            data: ProgressEvent::StepStarted {
                step_id: "router".to_string(),
                step_index: 0,
            },
            timestamp: timestamp(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"stream_update\""));
        assert!(json.contains("\"message_type\":\"step_started\""));
        assert!(json.contains("\"timestamp\""));

        let msg = ServerMessage::Connected {
            client_id: "c1".to_string(),
            channel: "workflow/MAIN".to_string(),
            message: "Connected to workflow MAIN".to_string(),
            timestamp: timestamp(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"channel\":\"workflow/MAIN\""));
    }

    #[test]
    fn test_workflow_error_frame_carries_session_state() {
        // The frame is built from the session the run left behind
        let sessions = SessionStore::new();
        let session_id = sessions.get_or_create(None, "client_test");
        let mut meta = Metadata::new();
        meta.insert("stage", "ready");
        sessions.set_metadata(&session_id, meta);

        let metadata = sessions
            .get(&session_id)
            .map(|s| s.metadata)
            .unwrap_or_default();
        let msg = ServerMessage::WorkflowError {
            error: "Agent 'boom' failed: backend unavailable".to_string(),
            metadata,
            trace_logs: vec!["Starting boom".to_string()],
            session_id: session_id.clone(),
            timestamp: timestamp(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"workflow_error\""));
        assert!(json.contains(&format!("\"session_id\":\"{session_id}\"")));
        assert!(json.contains("\"stage\":\"ready\""));
    }
}
