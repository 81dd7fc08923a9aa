//! WebSocket endpoint.
//!
//! Each connection registers a bounded outbound queue with the hub and
//! splits into a reader and a writer. The writer owns the sink, which
//! serializes all writes for the session and applies the per-write
//! deadline; on failure it unregisters the session. The reader accepts
//! `place_bet`, `cashout`, and `ping` and replies on the same queue.

use crate::api::handlers::AppState;
use crate::hub::Event;
use crate::round::{BetRequest, CashoutRequest};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Messages clients may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    PlaceBet {
        amount: f64,
        #[serde(default)]
        auto_cashout: f64,
    },
    Cashout {
        bet_id: String,
    },
    Ping,
}

/// GET /ws?user_id=...
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = query.user_id.unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: Arc<AppState>) {
    info!("new connection from user: {}", user_id);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.config.hub.session_queue_capacity);
    let session_id = state.hub.register(user_id.clone(), tx.clone()).await;

    // Writer task: sole owner of the sink, so session writes are
    // serialized. A missed deadline or a dead peer unregisters the
    // session.
    let write_timeout = state.hub.write_timeout();
    let writer_hub = state.hub.clone();
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let send = sink.send(Message::Text(payload.to_string()));
            match tokio::time::timeout(write_timeout, send).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("write error for session {}: {}", session_id, e);
                    break;
                }
                Err(_) => {
                    warn!("write deadline exceeded for session {}", session_id);
                    break;
                }
            }
        }
        writer_hub.unregister(session_id).await;
    });

    // Snapshot straight to this session before any broadcast arrives.
    if let Some(snapshot) = state.round.current_round() {
        if let Ok(payload) = (Event::InitialState { data: snapshot }).to_payload() {
            let _ = tx.send(payload).await;
        }
    }

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("read error for user {}: {}", user_id, e);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                    continue;
                };

                match client_msg {
                    ClientMessage::PlaceBet {
                        amount,
                        auto_cashout,
                    } => {
                        let resp = state
                            .round
                            .place_bet(BetRequest {
                                user_id: user_id.clone(),
                                amount,
                                auto_cashout,
                            })
                            .await;
                        send_json(&tx, &resp).await;
                    }
                    ClientMessage::Cashout { bet_id } => {
                        let resp = state
                            .round
                            .cashout(CashoutRequest {
                                user_id: user_id.clone(),
                                bet_id,
                            })
                            .await;
                        send_json(&tx, &resp).await;
                    }
                    ClientMessage::Ping => {
                        if let Ok(payload) = Event::Pong.to_payload() {
                            let _ = tx.send(payload).await;
                        }
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!("connection closed for user: {}", user_id);
    state.hub.unregister(session_id).await;
    // Dropping our sender closes the writer's queue once the hub's clone
    // goes with the unregister.
}

async fn send_json<T: Serialize>(tx: &mpsc::Sender<Arc<str>>, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => {
            let _ = tx.send(Arc::from(json)).await;
        }
        Err(e) => debug!("failed to serialize reply: {}", e),
    }
}
