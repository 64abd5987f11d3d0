use crate::bridge::SessionError;
use crate::identity::new_identity;
use crate::state::AppState;
use crate::transport::{ClientSink, ClientSource, CloseReason, TransportError};
use async_trait::async_trait;
use axum::extract::{
    State,
    ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_chat_socket(socket, state))
}

async fn handle_chat_socket(socket: WebSocket, state: AppState) {
    let session_id = new_identity();
    let (write, read) = socket.split();
    let sink = WsSink { write };
    let source = WsSource { read };

    match state
        .bridge
        .serve(session_id.clone(), sink, source, state.shutdown_signal())
        .await
    {
        Ok(outcome) => {
            info!(
                session_id = %outcome.session_id,
                exit = %outcome.exit,
                published = outcome.published,
                delivered = outcome.delivered,
                "session finished"
            );
        }
        Err(SessionError::Transport(e)) => {
            debug!(session_id = %session_id, error = %e, "client gone during setup");
        }
        Err(SessionError::Broker(e)) => {
            warn!(session_id = %session_id, error = %e, "client rejected: broker unavailable");
        }
    }
}

/// Write half of an axum WebSocket.
struct WsSink {
    write: SplitSink<WebSocket, Message>,
}

/// Read half of an axum WebSocket.
struct WsSource {
    read: SplitStream<WebSocket>,
}

#[async_trait]
impl ClientSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) {
        let frame = CloseFrame {
            code: reason.code(),
            reason: reason.description().into(),
        };
        let _ = self.write.send(Message::Close(Some(frame))).await;
        let _ = self.write.close().await;
    }
}

#[async_trait]
impl ClientSource for WsSource {
    async fn recv_text(&mut self) -> Result<String, TransportError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Binary(_))) => return Err(TransportError::NonText),
                // Pings are answered by axum itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }
}
