//! `GET /ws` -- one websocket per live observer.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::state::AppState;
use crate::live::LiveEvent;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    // Subscribe before the upgrade so nothing sent meanwhile is missed.
    let rx = state.orchestrator.live().subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(socket: WebSocket, mut rx: broadcast::Receiver<LiveEvent>) {
    debug!("live observer connected");
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "failed to encode live event");
                            continue;
                        }
                    };
                    // A failed send means the observer is gone.
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "live observer fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("live observer disconnected");
}
