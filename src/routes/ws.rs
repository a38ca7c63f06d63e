use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::board::events::BoardEvent;
use crate::board::models::{BoardId, UserId};
use crate::error::AppResult;
use crate::extractors::Viewer;
use crate::realtime::{ConnectionError, DetachReason, ViewerConnection};
use crate::routes::require_participant;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/boards/{board}/ws", get(board_socket))
}

/// Outbound half of a websocket, written as `{"type", "data"}` text frames.
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl ViewerConnection for WsConnection {
    async fn write_event(&self, event: &BoardEvent) -> Result<(), ConnectionError> {
        let text = serde_json::to_string(&event.encode()?)?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
    }
}

async fn board_socket(
    State(state): State<AppState>,
    Viewer(user): Viewer,
    Path(board): Path<BoardId>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    require_participant(&state, board, user).await?;
    Ok(ws.on_upgrade(move |socket| serve_viewer(state, board, user, socket)))
}

/// Attach the socket to the board hub and hold it until the client leaves.
async fn serve_viewer(
    state: AppState,
    board: BoardId,
    user: UserId,
    socket: WebSocket,
) {
    let (sink, mut inbound) = socket.split();
    let connection = Arc::new(WsConnection::new(sink));

    let attachment = match state.hub.attach(board, user, connection.clone()).await {
        Ok(attachment) => attachment,
        Err(e) => {
            tracing::error!(%board, %user, error = %e, "Failed to attach viewer");
            connection.close().await;
            return;
        }
    };

    // clients only ever talk to us through HTTP; inbound frames just keep the
    // socket alive until it closes
    let reason = loop {
        match inbound.next().await {
            Some(Ok(Message::Close(_))) | None => break DetachReason::Closed,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(%board, %user, error = %e, "Websocket read failed");
                break DetachReason::TransportError;
            }
        }
    };

    state.hub.detach(attachment, reason).await;
}
