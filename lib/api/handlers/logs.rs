//! The `/logstream` WebSocket endpoint.
//!
//! One cooperative task runs per connected client; a disconnect drops the
//! task and with it the tailer's file handle. The wire protocol is JSON text
//! frames in both directions: the client drives with `{"from": <line>}`
//! cursors, the server answers with `{<line_number>: <raw line>}` frames and
//! an in-band `{"code": 4000}` when the timeout passes without new lines.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    logs::{log_path, LogTailer, TailEvent, IDLE_FRAME_CODE, NO_FILE_CLOSE_CODE},
    models::{DaemonID, IdKind},
};

use super::super::AppState;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Idle window when the client does not pass `timeout`.
const DEFAULT_TIMEOUT_SECS: f64 = 60.0;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct StreamQuery {
    #[serde(default)]
    timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FromMessage {
    from: u64,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `WS /logstream/{workspace_id}/{log_id}?timeout=`: tail a log file.
pub(crate) async fn logstream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((workspace_id, log_id)): Path<(DaemonID, DaemonID)>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let timeout = Duration::from_secs_f64(query.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS));
    ws.on_upgrade(move |socket| stream(socket, state, workspace_id, log_id, timeout))
}

/// Runs the framing protocol over one accepted socket.
async fn stream(
    mut socket: WebSocket,
    state: Arc<AppState>,
    workspace_id: DaemonID,
    log_id: DaemonID,
    timeout: Duration,
) {
    // Workspace log ids read the workspace's own log; any other kind resolves
    // its owning workspace through the store router first.
    let owning_workspace = if log_id.kind() == IdKind::Workspace {
        log_id
    } else {
        match state.stores.workspace_of(&log_id).await {
            Ok(id) => id,
            Err(_) => workspace_id,
        }
    };

    let workdir = state.stores.workspaces.workdir(&owning_workspace);
    let mut tailer = LogTailer::new(log_path(&workdir, &log_id));

    if !tailer.exists() {
        close_no_file(&mut socket).await;
        return;
    }

    // The client opens the conversation with its first cursor.
    while let Some(from) = next_cursor(&mut socket).await {
        if tailer.seek_to_line(from).await.is_err() {
            close_no_file(&mut socket).await;
            return;
        }

        loop {
            match tailer.next_event(timeout).await {
                Ok(TailEvent::Line { number, line }) => {
                    let frame = json!({ number.to_string(): line });
                    if send_json(&mut socket, &frame).await.is_err() {
                        return;
                    }
                }
                Ok(TailEvent::Idle) => {
                    let frame = json!({ "code": IDLE_FRAME_CODE });
                    if send_json(&mut socket, &frame).await.is_err() {
                        return;
                    }
                    // Back to waiting for the client's next cursor.
                    break;
                }
                Ok(TailEvent::FileGone) | Err(_) => {
                    close_no_file(&mut socket).await;
                    return;
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Waits for the next `{"from": n}` message; `None` when the client is gone.
async fn next_cursor(socket: &mut WebSocket) -> Option<u64> {
    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<FromMessage>(&text) {
                    Ok(message) => return Some(message.from),
                    Err(e) => {
                        tracing::debug!("ignoring unparseable client frame: {}", e);
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

async fn send_json(socket: &mut WebSocket, frame: &serde_json::Value) -> Result<(), axum::Error> {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
}

async fn close_no_file(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: NO_FILE_CLOSE_CODE,
            reason: "log file not found".into(),
        })))
        .await;
}
