use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;

use crate::core::server::AppState;
use crate::models::EventMessage;

/// `GET /ws`: upgrade the connection and attach a subscriber
pub async fn ws_entry(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let start = Instant::now();
    let socket_state = state.clone();
    let response = ws.on_upgrade(move |socket| handle_socket(socket_state, socket, peer));

    state
        .stats
        .record("/ws", start.elapsed(), response.status().as_u16());
    response
}

async fn handle_socket(state: AppState, socket: WebSocket, peer: SocketAddr) {
    tracing::info!(peer = %peer, "websocket subscriber connected");

    let mut subscription = state.hub.subscribe();
    let (mut sink, mut stream) = socket.split();

    // Initial push: config snapshot first, then stats
    if let Some(config) = state.store.snapshot().await {
        if send_event(&mut sink, &EventMessage::config_snapshot(&config))
            .await
            .is_err()
        {
            state.hub.unsubscribe(subscription.id);
            return;
        }
    }
    if send_event(&mut sink, &EventMessage::stats_snapshot(&state.stats.snapshot()))
        .await
        .is_err()
    {
        state.hub.unsubscribe(subscription.id);
        return;
    }

    loop {
        tokio::select! {
            event = subscription.rx.recv() => match event {
                Some(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                // Dropped by the hub (overflow or shutdown)
                None => break,
            },

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let parsed: Value = match serde_json::from_str(&text) {
                        Ok(value) => value,
                        // Unreadable frames close the connection
                        Err(_) => break,
                    };
                    if handle_client_message(&state, &mut sink, &parsed).await.is_err() {
                        break;
                    }
                }
                // Binary frames are not part of the protocol
                Some(Ok(Message::Binary(_))) => break,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(peer = %peer, error = %e, "websocket read error");
                    break;
                }
            },
        }
    }

    state.hub.unsubscribe(subscription.id);
    tracing::info!(peer = %peer, "websocket subscriber disconnected");
}

/// Answer `get_config` / `get_stats` requests; anything else is ignored
async fn handle_client_message(
    state: &AppState,
    sink: &mut SplitSink<WebSocket, Message>,
    message: &Value,
) -> Result<(), axum::Error> {
    match message.get("type").and_then(Value::as_str) {
        Some("get_config") => {
            if let Some(config) = state.store.snapshot().await {
                send_event(sink, &EventMessage::config_snapshot(&config)).await?;
            }
        }
        Some("get_stats") => {
            send_event(sink, &EventMessage::stats_snapshot(&state.stats.snapshot())).await?;
        }
        _ => {}
    }
    Ok(())
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &EventMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_else(|_| "null".to_string());
    sink.send(Message::Text(text)).await
}
