//! WebSocket fan-out hub.
//!
//! One coordinator task owns the session registry; register, unregister,
//! and broadcast requests arrive on dedicated channels, so the set is
//! mutated from exactly one place. Broadcasting marshals the event once
//! and hands the shared payload to every session's bounded queue with a
//! non-blocking send: a slow client drops ticks instead of stalling the
//! round engine, and the next tick supersedes whatever was lost.

use crate::config::HubConfig;
use crate::round::{RoundSnapshot, RoundStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Every message the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RoundStart {
        status: RoundStatus,
        round_id: String,
        commitment: String,
        time_left: f64,
    },
    RoundRunning {
        status: RoundStatus,
        round_id: String,
    },
    Update {
        multiplier: f64,
        round_id: String,
    },
    Crash {
        multiplier: f64,
        server_seed: String,
        round_id: String,
    },
    BetPlaced {
        data: BetPlacedData,
    },
    Cashout {
        data: CashoutData,
    },
    InitialState {
        data: RoundSnapshot,
    },
    Pong,
}

#[derive(Debug, Clone, Serialize)]
pub struct BetPlacedData {
    pub user_id: String,
    pub amount: f64,
    pub bet_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashoutData {
    pub user_id: String,
    pub bet_id: String,
    pub multiplier: f64,
    pub payout: f64,
}

impl Event {
    /// Marshal once; broadcasts share the resulting payload across
    /// sessions.
    pub fn to_payload(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

pub type SessionId = u64;

struct Session {
    user_id: String,
    tx: mpsc::Sender<Arc<str>>,
}

enum Control {
    Register(SessionId, Session),
    Unregister(SessionId),
}

/// Handle to the hub coordinator. Cheap to clone; all methods are safe to
/// call from any task.
#[derive(Clone)]
pub struct Hub {
    control_tx: mpsc::Sender<Control>,
    broadcast_tx: mpsc::Sender<Event>,
    client_count: Arc<AtomicU64>,
    next_session: Arc<AtomicU64>,
    write_timeout: std::time::Duration,
}

impl Hub {
    /// Spawn the coordinator task and return its handle.
    pub fn spawn(config: &HubConfig) -> Self {
        let (control_tx, control_rx) = mpsc::channel(64);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity);
        let client_count = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_coordinator(
            control_rx,
            broadcast_rx,
            client_count.clone(),
        ));

        Self {
            control_tx,
            broadcast_tx,
            client_count,
            next_session: Arc::new(AtomicU64::new(1)),
            write_timeout: config.write_timeout(),
        }
    }

    /// Register a session and return its id. `tx` is the session's bounded
    /// outbound queue; its receiving end belongs to the connection's writer
    /// task.
    pub async fn register(&self, user_id: String, tx: mpsc::Sender<Arc<str>>) -> SessionId {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .control_tx
            .send(Control::Register(id, Session { user_id, tx }))
            .await;
        id
    }

    /// Remove a session. Idempotent.
    pub async fn unregister(&self, id: SessionId) {
        let _ = self.control_tx.send(Control::Unregister(id)).await;
    }

    /// Queue an event for fan-out. Never blocks: a full intake drops the
    /// event with a warning, which is safe because ticks are superseded by
    /// the next tick and lifecycle events are emitted under low pressure.
    pub fn broadcast(&self, event: Event) {
        if let Err(e) = self.broadcast_tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("broadcast queue full, dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!("broadcast channel closed");
                }
            }
        }
    }

    pub fn client_count(&self) -> u64 {
        self.client_count.load(Ordering::SeqCst)
    }

    /// Deadline a connection writer applies to each WebSocket write.
    pub fn write_timeout(&self) -> std::time::Duration {
        self.write_timeout
    }
}

async fn run_coordinator(
    mut control_rx: mpsc::Receiver<Control>,
    mut broadcast_rx: mpsc::Receiver<Event>,
    client_count: Arc<AtomicU64>,
) {
    let mut sessions: HashMap<SessionId, Session> = HashMap::new();

    loop {
        tokio::select! {
            control = control_rx.recv() => match control {
                Some(Control::Register(id, session)) => {
                    info!(
                        "client connected: {} (total: {})",
                        session.user_id,
                        sessions.len() + 1
                    );
                    sessions.insert(id, session);
                    client_count.store(sessions.len() as u64, Ordering::SeqCst);
                }
                Some(Control::Unregister(id)) => {
                    if let Some(session) = sessions.remove(&id) {
                        info!(
                            "client disconnected: {} (total: {})",
                            session.user_id,
                            sessions.len()
                        );
                        client_count.store(sessions.len() as u64, Ordering::SeqCst);
                    }
                }
                None => break,
            },
            event = broadcast_rx.recv() => match event {
                Some(event) => {
                    let payload = match event.to_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!("failed to marshal broadcast event: {}", e);
                            continue;
                        }
                    };

                    for (id, session) in &sessions {
                        // Non-blocking: a full or closed session queue loses
                        // this event; the writer task notices closure and
                        // unregisters.
                        if session.tx.try_send(payload.clone()).is_err() {
                            debug!("session {} not keeping up, dropping event", id);
                        }
                    }
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_hub() -> Hub {
        Hub::spawn(&HubConfig::default())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn broadcast_reaches_all_sessions() {
        let hub = test_hub();

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        hub.register("alice".to_string(), tx_a).await;
        hub.register("bob".to_string(), tx_b).await;
        settle().await;
        assert_eq!(hub.client_count(), 2);

        hub.broadcast(Event::Update {
            multiplier: 1.25,
            round_id: "R1-1".to_string(),
        });
        settle().await;

        let got_a = rx_a.try_recv().expect("alice should receive the event");
        let got_b = rx_b.try_recv().expect("bob should receive the event");
        assert_eq!(&*got_a, &*got_b);

        let parsed: serde_json::Value = serde_json::from_str(&got_a).unwrap();
        assert_eq!(parsed["type"], "update");
        assert_eq!(parsed["multiplier"], 1.25);
    }

    #[tokio::test]
    async fn slow_session_drops_events_without_blocking() {
        let hub = test_hub();

        // Capacity-1 queue that is never drained.
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        hub.register("slow".to_string(), slow_tx).await;
        hub.register("fast".to_string(), fast_tx).await;
        settle().await;

        for i in 0..5 {
            hub.broadcast(Event::Update {
                multiplier: 1.0 + i as f64 / 100.0,
                round_id: "R1-1".to_string(),
            });
        }
        settle().await;

        // The fast session saw everything despite the stalled peer.
        let mut received = 0;
        while fast_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let hub = test_hub();

        let (tx, _rx) = mpsc::channel(4);
        let id = hub.register("carol".to_string(), tx).await;
        settle().await;
        assert_eq!(hub.client_count(), 1);

        hub.unregister(id).await;
        hub.unregister(id).await;
        settle().await;
        assert_eq!(hub.client_count(), 0);
    }

    #[test]
    fn event_wire_shapes() {
        let crash = Event::Crash {
            multiplier: 2.31,
            server_seed: "abc".to_string(),
            round_id: "R9-4".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&crash.to_payload().unwrap()).unwrap();
        assert_eq!(json["type"], "crash");
        assert_eq!(json["server_seed"], "abc");

        let pong: serde_json::Value =
            serde_json::from_str(&Event::Pong.to_payload().unwrap()).unwrap();
        assert_eq!(pong["type"], "pong");

        let bet = Event::BetPlaced {
            data: BetPlacedData {
                user_id: "u".to_string(),
                amount: 10.0,
                bet_id: "BET-x".to_string(),
            },
        };
        let json: serde_json::Value =
            serde_json::from_str(&bet.to_payload().unwrap()).unwrap();
        assert_eq!(json["type"], "bet_placed");
        assert_eq!(json["data"]["bet_id"], "BET-x");
    }
}
