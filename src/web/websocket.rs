//! WebSocket push channel
//!
//! Duplex event stream at `/ws`. The server pushes the bus events from
//! [`crate::events::BusEvent`]; a newly connected client receives the
//! current catalog snapshot first, then future events only. Client commands
//! mirror the HTTP endpoints one-to-one.
//!
//! Outbound delivery uses a bounded queue with a drop policy: a client too
//! slow to drain its queue is disconnected rather than allowed to apply
//! backpressure to the bus.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::BusEvent;
use crate::jobs::JobState;
use crate::models::Platform;
use crate::web::middleware::API_KEY_HEADER;
use crate::web::AppState;

/// Per-client outbound queue; overflowing it drops the client.
const CLIENT_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// API key for browser clients that cannot set headers on the upgrade.
    pub key: Option<String>,
}

/// Commands a client may send; payloads match the HTTP bodies.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    StartCapture {
        platform: String,
        streamer_id: String,
        max_duration: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    CreateClip {
        clip_id: Uuid,
        start_time: f64,
        duration: f64,
        title: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GeneratePreview {
        clip_id: Uuid,
        num_frames: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    UploadClip { clip_id: Uuid },
    RefreshStreamers { platform: Option<String> },
    #[serde(rename_all = "camelCase")]
    GetJobStatus { job_id: Uuid },
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(expected) = state.config.auth.api_key.as_deref() {
        let presented = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or(query.key.clone());
        if presented.as_deref() != Some(expected) {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing API key",
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("push channel client connected");
    let (mut sink, mut source) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE_DEPTH);

    // Outbound pump: queue -> socket.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // A late subscriber sees the current catalog, then future events.
    let snapshot = state.store.latest();
    if send_event(&tx, &BusEvent::CatalogSnapshot(snapshot)).is_err() {
        writer.abort();
        return;
    }

    // Bus forwarder: every event the backend publishes, in order. try_send
    // keeps the bus non-blocking; a full queue means the client is too slow
    // and gets dropped.
    let bus_tx = tx.clone();
    let mut bus_rx = state.bus.subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match bus_rx.recv().await {
                Ok(event) => {
                    if send_event(&bus_tx, &event).is_err() {
                        debug!("push channel client too slow, dropping");
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "push channel subscriber lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Inbound loop: client commands, same semantics as the HTTP endpoints.
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => handle_command(&state, &tx, command).await,
                Err(err) => {
                    let _ = send_error(&tx, &format!("unrecognized command: {err}"));
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    forwarder.abort();
    drop(tx);
    let _ = writer.await;
    info!("push channel client disconnected");
}

async fn handle_command(state: &AppState, tx: &mpsc::Sender<String>, command: ClientCommand) {
    match command {
        ClientCommand::StartCapture {
            platform,
            streamer_id,
            max_duration,
        } => {
            let result = platform
                .parse::<Platform>()
                .map_err(|e| e.to_string())
                .and_then(|platform| {
                    state
                        .start_capture(platform, &streamer_id, max_duration)
                        .map_err(|e| e.to_string())
                });
            if let Err(reason) = result {
                let _ = send_error(tx, &reason);
            }
        }
        ClientCommand::CreateClip {
            clip_id,
            start_time,
            duration,
            title,
        } => {
            if let Err(err) = state.extractor.validate_range(start_time, duration) {
                let _ = send_error(tx, &err.to_string());
                return;
            }
            let extractor = state.extractor.clone();
            tokio::spawn(async move {
                let _ = extractor
                    .extract_clip(clip_id, start_time, duration, title)
                    .await;
            });
        }
        ClientCommand::GeneratePreview {
            clip_id,
            num_frames,
        } => {
            let extractor = state.extractor.clone();
            let frames = num_frames.unwrap_or(state.config.media.default_preview_frames);
            let error_tx = tx.clone();
            tokio::spawn(async move {
                if let Err(err) = extractor.generate_previews(clip_id, frames).await {
                    let _ = send_error(&error_tx, &err.to_string());
                }
            });
        }
        ClientCommand::UploadClip { clip_id } => {
            let job = state.broker.get(clip_id);
            match job {
                Some(job) if job.state == JobState::Completed => {
                    let uploader = state.uploader.clone();
                    tokio::spawn(async move {
                        let _ = uploader.upload(clip_id).await;
                    });
                }
                Some(job) => {
                    let _ = send_error(tx, &format!("job is {}, expected completed", job.state));
                }
                None => {
                    let _ = send_error(tx, "unknown job");
                }
            }
        }
        ClientCommand::RefreshStreamers { platform } => {
            match platform.as_deref().map(str::parse::<Platform>).transpose() {
                Ok(platform) => state.trigger_refresh(platform),
                Err(err) => {
                    let _ = send_error(tx, &err.to_string());
                }
            }
        }
        ClientCommand::GetJobStatus { job_id } => match state.broker.get(job_id) {
            Some(job) => {
                let _ = send_event(tx, &BusEvent::JobUpdated(job));
            }
            None => {
                let _ = send_error(tx, "unknown job");
            }
        },
    }
}

fn send_event(tx: &mpsc::Sender<String>, event: &BusEvent) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|_| ())?;
    tx.try_send(text).map_err(|_| ())
}

fn send_error(tx: &mpsc::Sender<String>, message: &str) -> Result<(), ()> {
    let frame = json!({
        "type": "command_error",
        "data": { "message": message },
    });
    tx.try_send(frame.to_string()).map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_deserialize_from_camel_case_payloads() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"action":"start_capture","platform":"twitch","streamerId":"kai","maxDuration":120}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::StartCapture { max_duration: Some(120), .. }
        ));

        let cmd: ClientCommand = serde_json::from_str(&format!(
            r#"{{"action":"create_clip","clipId":"{}","startTime":10.0,"duration":30.0}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        assert!(matches!(cmd, ClientCommand::CreateClip { .. }));

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"action":"refresh_streamers"}"#).unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::RefreshStreamers { platform: None }
        ));
    }
}
