//! WebSocket progress delivery
//!
//! Each connection serves one task. The server greets with a `connected`
//! frame, replays a snapshot of the task's current state, then forwards
//! broadcast progress events until the client disconnects. A lagged
//! subscriber is resynced from the store rather than dropped.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use lecture_common::ProgressEvent;
use lecture_orchestrator::snapshot_event;

use crate::ApiState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Upgrade handler for `/ws/progress/{task_id}`
pub async fn progress_socket(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, task_id))
}

async fn send_json(
    socket: &mut WebSocket,
    value: &serde_json::Value,
) -> Result<(), axum::Error> {
    socket
        .send(Message::Text(Utf8Bytes::from(value.to_string())))
        .await
}

/// The first frame of every connection
fn greeting_frame(task_id: &str) -> serde_json::Value {
    json!({
        "type": "connected",
        "task_id": task_id,
        "message": "progress stream connected",
    })
}

fn event_json(event: &ProgressEvent) -> serde_json::Value {
    json!({
        "type": "progress",
        "task_id": event.task_id,
        "stage": event.stage,
        "progress": event.progress,
        "message": event.message,
        "stages": event.stages,
    })
}

/// Clients keep the stream alive with a literal `ping` text frame
fn pong_reply(text: &str) -> Option<&'static str> {
    (text == "ping").then_some("pong")
}

async fn handle_socket(mut socket: WebSocket, state: ApiState, task_id: String) {
    // Subscribe before the snapshot so no event falls in between
    let mut rx = state.orchestrator.progress().subscribe(&task_id).await;

    if send_json(&mut socket, &greeting_frame(&task_id)).await.is_err() {
        return;
    }

    if let Ok(task) = state.store.get(&task_id).await {
        let snapshot = snapshot_event(&task);
        if send_json(&mut socket, &event_json(&snapshot)).await.is_err() {
            return;
        }
    }

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = pong_reply(text.as_str()) {
                            if socket.send(Message::Text(Utf8Bytes::from_static(reply))).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error for {}: {}", task_id, e);
                        break;
                    }
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_json(&mut socket, &event_json(&event)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed events; resend current state from the store
                        warn!("Progress stream for {} lagged by {} events", task_id, skipped);
                        if let Ok(task) = state.store.get(&task_id).await {
                            let snapshot = snapshot_event(&task);
                            if send_json(&mut socket, &event_json(&snapshot)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = keepalive.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Progress stream for {} closed", task_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lecture_common::Task;
    use std::path::PathBuf;

    fn sample_task() -> Task {
        Task::new(
            "t1".to_string(),
            "intro.mp4".to_string(),
            PathBuf::from("/uploads/intro_t1.mp4"),
            PathBuf::from("/outputs/intro_t1"),
            vec![],
        )
    }

    #[test]
    fn test_greeting_frame_shape() {
        let frame = greeting_frame("t1");
        assert_eq!(frame["type"], "connected");
        assert_eq!(frame["task_id"], "t1");
    }

    #[test]
    fn test_connect_snapshot_reflects_store_state() {
        let frame = event_json(&snapshot_event(&sample_task()));
        assert_eq!(frame["type"], "progress");
        assert_eq!(frame["stage"], "extract_audio");
        assert_eq!(frame["progress"], 0);
        assert_eq!(frame["stages"].as_array().unwrap().len(), 7);
    }

    #[test]
    fn test_event_frame_carries_full_stage_snapshot() {
        let task = sample_task();
        let event = ProgressEvent {
            task_id: task.task_id.clone(),
            stage: "asr".to_string(),
            progress: 100,
            message: "Speech recognition completed".to_string(),
            stages: task.stages,
        };
        let frame = event_json(&event);
        assert_eq!(frame["type"], "progress");
        assert_eq!(frame["task_id"], "t1");
        assert_eq!(frame["stage"], "asr");
        assert_eq!(frame["progress"], 100);
        assert_eq!(frame["stages"][1]["stage_name"], "asr");
    }

    #[test]
    fn test_pong_reply_only_answers_ping() {
        assert_eq!(pong_reply("ping"), Some("pong"));
        assert_eq!(pong_reply("pong"), None);
        assert_eq!(pong_reply(""), None);
        assert_eq!(pong_reply("{\"type\":\"ping\"}"), None);
    }
}
