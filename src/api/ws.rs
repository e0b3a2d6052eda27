//! WebSocket subscription to hub events.
//!
//! Each socket is one hub client. Hub messages go out as text frames;
//! anything the client sends is read and ignored until it closes.

use super::handlers::AppState;
use crate::hub::HubHandle;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

/// GET /ws
pub async fn upgrade(State(ctx): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = ctx.hub.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub))
}

async fn serve_socket(socket: WebSocket, hub: HubHandle) {
    let mut subscription = match hub.register().await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Rejecting WebSocket client");
            return;
        }
    };
    let client_id = subscription.id;
    debug!(client_id, "WebSocket client connected");

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            if sink.send(Message::Text(message.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.unregister(client_id).await;
    debug!(client_id, "WebSocket client disconnected");
}
