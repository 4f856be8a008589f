use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use weft_core::events::{Event, EventType};
use weft_core::types::{Workflow, WorkflowId};

use crate::api::ApiResult;
use crate::config::AppState;

/// Messages pushed to an event stream client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Stored state at the moment the stream opened
    Snapshot { workflow: Workflow },
    /// A transition of the watched workflow
    Event { event: Event },
    /// The client fell behind and missed this many events
    Lagged { skipped: u64 },
}

/// Stream the transitions of one workflow
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = WorkflowId::from(id);
    // Subscribe before reading the snapshot so no transition falls in between.
    let events = state.engine.events().subscribe();
    let workflow = state.engine.get_status(&id)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, workflow, events)))
}

fn closes_stream(event_type: &EventType) -> bool {
    matches!(
        event_type,
        EventType::WorkflowCompleted { .. }
            | EventType::WorkflowFailed { .. }
            | EventType::WorkflowCancelled { .. }
    )
}

async fn send(socket: &mut WebSocket, message: &WsMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to encode WS message: {}", e);
            false
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(
    mut socket: WebSocket,
    workflow: Workflow,
    mut events: broadcast::Receiver<Event>,
) {
    let id = workflow.id.clone();
    let finished = workflow.is_terminal();
    tracing::info!("Client subscribed to workflow: {}", id);

    if !send(&mut socket, &WsMessage::Snapshot { workflow }).await || finished {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if event.workflow_id == id => {
                    let last = closes_stream(&event.event_type);
                    if !send(&mut socket, &WsMessage::Event { event }).await {
                        break;
                    }
                    if last {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("WS client for workflow {} lagged by {} events", id, skipped);
                    if !send(&mut socket, &WsMessage::Lagged { skipped }).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Ping(_))) => {
                    let _ = socket.send(Message::Pong(Bytes::new())).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("WebSocket connection closed");
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!("WebSocket connection terminated");
}
