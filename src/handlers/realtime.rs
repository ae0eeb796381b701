//! WebSocket endpoint for the realtime bus.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::realtime::{BusMessage, ClientMessage, Subscription};
use crate::AppState;

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn wire(event: &str, data: serde_json::Value) -> String {
    BusMessage {
        event: event.to_string(),
        library_id: None,
        data,
    }
    .to_wire()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.bus.subscribe();

    let mut subscription = Subscription::default();
    // With auth disabled every connection is the operator.
    let mut authenticated = !state.auth.enabled();

    let hello = wire(
        "connection_established",
        serde_json::json!({ "auth_required": !authenticated }),
    );
    if sender.send(Message::Text(hello)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            bus_msg = rx.recv() => match bus_msg {
                Ok(message) => {
                    if authenticated && subscription.matches(&message) {
                        if sender.send(Message::Text(message.to_wire())).await.is_err() {
                            break;
                        }
                    }
                }
                // Slow consumer: drop the missed window, the client reconciles
                // by polling the progress snapshot.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "websocket client lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            },
            frame = receiver.next() => {
                let Some(Ok(frame)) = frame else { break };
                match frame {
                    Message::Text(text) => {
                        let reply = handle_client_frame(
                            &text,
                            &state,
                            &mut subscription,
                            &mut authenticated,
                        );
                        if let Some(reply) = reply {
                            if sender.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
}

fn handle_client_frame(
    text: &str,
    state: &AppState,
    subscription: &mut Subscription,
    authenticated: &mut bool,
) -> Option<String> {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(err) => {
            return Some(wire(
                "connection_error",
                serde_json::json!({ "code": "BAD_MESSAGE", "message": err.to_string() }),
            ))
        }
    };

    match parsed {
        ClientMessage::Ping => Some(wire("pong", serde_json::json!({}))),
        ClientMessage::Authenticate { token } => {
            if !state.auth.enabled() || state.auth.verify_token(&token).is_ok() {
                *authenticated = true;
                Some(wire(
                    "system_notification",
                    serde_json::json!({ "message": "authenticated" }),
                ))
            } else {
                Some(wire(
                    "connection_error",
                    serde_json::json!({ "code": "AUTH_TOKEN_INVALID", "message": "invalid token" }),
                ))
            }
        }
        _ if !*authenticated => Some(wire(
            "connection_error",
            serde_json::json!({ "code": "AUTH_TOKEN_REQUIRED", "message": "authenticate first" }),
        )),
        ClientMessage::Subscribe { events, filters } => {
            subscription.subscribe(events, filters);
            None
        }
        ClientMessage::Unsubscribe { events } => {
            subscription.unsubscribe(events);
            None
        }
        ClientMessage::JoinLibrary { library_id } => {
            subscription.rooms.insert(library_id);
            None
        }
        ClientMessage::LeaveLibrary { library_id } => {
            subscription.rooms.remove(&library_id);
            None
        }
        // Opaque to this core.
        ClientMessage::AiChatMessage { .. } => Some(wire(
            "system_notification",
            serde_json::json!({ "message": "ai chat is not wired on this deployment" }),
        )),
    }
}
