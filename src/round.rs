//! Crash round engine.
//!
//! Exactly one round is live per process. A single engine task owns the
//! round state machine (BETTING -> RUNNING -> CRASHED) and serializes every
//! bet and cashout against it: callers hand their request plus a oneshot
//! reply channel to a bounded queue and block with a timeout, so no two
//! mutations ever interleave. The commitment hash goes out before betting
//! opens and the server seed is revealed in the crash event, making every
//! round verifiable after the fact.

use crate::config::GameConfig;
use crate::fair;
use crate::history::{FinishedRound, HistorySink};
use crate::hub::{BetPlacedData, CashoutData, Event, Hub};
use crate::ledger::{BalanceLedger, LedgerError};
use crate::store::{keys, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Nominal curve-time advance per tick, in seconds.
const CURVE_STEP_SECS: f64 = 0.1;

/// Round lifecycle phase. Advances strictly forward within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    Betting,
    Running,
    Crashed,
}

/// Full round state. Only the engine task mutates it; everyone else reads
/// through [`Round::snapshot`], which omits the secrets.
#[derive(Debug, Clone)]
pub struct Round {
    pub round_id: String,
    pub server_seed: String,
    pub hash_commitment: String,
    pub client_seed: String,
    pub crash_multiplier: f64,
    pub current_multiplier: f64,
    pub status: RoundStatus,
    pub start_time: DateTime<Utc>,
    pub crash_time: Option<DateTime<Utc>>,
    pub nonce: u64,
}

/// Client-facing projection of a round. `server_seed` and
/// `crash_multiplier` have no fields here, so they cannot leak through any
/// serialization path.
#[derive(Debug, Clone, Serialize)]
pub struct RoundSnapshot {
    pub round_id: String,
    pub hash_commitment: String,
    pub client_seed: String,
    pub current_multiplier: f64,
    pub status: RoundStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_time: Option<DateTime<Utc>>,
    pub nonce: u64,
}

impl Round {
    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            round_id: self.round_id.clone(),
            hash_commitment: self.hash_commitment.clone(),
            client_seed: self.client_seed.clone(),
            current_multiplier: self.current_multiplier,
            status: self.status,
            start_time: self.start_time,
            crash_time: self.crash_time,
            nonce: self.nonce,
        }
    }
}

/// A bet tracked for the duration of one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveBet {
    pub bet_id: String,
    pub user_id: String,
    pub amount: f64,
    pub auto_cashout: f64,
    pub placed_at: DateTime<Utc>,
    pub cashed_out: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetRequest {
    pub user_id: String,
    pub amount: f64,
    #[serde(default)]
    pub auto_cashout: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BetResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
}

impl BetResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            bet_id: None,
            balance: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CashoutRequest {
    pub user_id: String,
    pub bet_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashoutResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
}

impl CashoutResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            multiplier: None,
            payout: None,
            balance: None,
        }
    }
}

struct BetCommand {
    req: BetRequest,
    reply: oneshot::Sender<BetResponse>,
}

struct CashoutCommand {
    req: CashoutRequest,
    /// Absent for auto-cashouts the engine enqueues against itself.
    reply: Option<oneshot::Sender<CashoutResponse>>,
}

/// Cloneable front door to the engine task.
#[derive(Clone)]
pub struct RoundHandle {
    bet_tx: mpsc::Sender<BetCommand>,
    cashout_tx: mpsc::Sender<CashoutCommand>,
    current: Arc<RwLock<Option<Round>>>,
    stop_tx: Arc<watch::Sender<bool>>,
    bet_reply_timeout: Duration,
    cashout_reply_timeout: Duration,
}

impl RoundHandle {
    /// Queue a bet and wait for the engine's verdict.
    pub async fn place_bet(&self, req: BetRequest) -> BetResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .bet_tx
            .try_send(BetCommand {
                req,
                reply: reply_tx,
            })
            .is_err()
        {
            return BetResponse::failed("Bet queue full");
        }

        match timeout(self.bet_reply_timeout, reply_rx).await {
            Ok(Ok(resp)) => resp,
            // Late replies land on a dropped receiver and vanish.
            _ => BetResponse::failed("Bet timeout"),
        }
    }

    /// Queue a cashout and wait for the engine's verdict.
    pub async fn cashout(&self, req: CashoutRequest) -> CashoutResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cashout_tx
            .try_send(CashoutCommand {
                req,
                reply: Some(reply_tx),
            })
            .is_err()
        {
            return CashoutResponse::failed("Cashout queue full");
        }

        match timeout(self.cashout_reply_timeout, reply_rx).await {
            Ok(Ok(resp)) => resp,
            _ => CashoutResponse::failed("Cashout timeout"),
        }
    }

    /// Snapshot of the live round with hidden fields projected away.
    pub fn current_round(&self) -> Option<RoundSnapshot> {
        self.current.read().unwrap().as_ref().map(Round::snapshot)
    }

    /// Signal the engine task to exit after its current await point.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// The engine task. Owns the bet table; the shared round cell is written
/// only from here.
pub struct RoundEngine {
    config: GameConfig,
    hub: Hub,
    store: Arc<dyn Store>,
    ledger: BalanceLedger,
    history: Arc<dyn HistorySink>,
    current: Arc<RwLock<Option<Round>>>,
    bet_rx: mpsc::Receiver<BetCommand>,
    cashout_rx: mpsc::Receiver<CashoutCommand>,
    /// Loopback sender the auto-cashout scan enqueues into, preserving the
    /// single-writer cashout path.
    auto_tx: mpsc::Sender<CashoutCommand>,
    stop_rx: watch::Receiver<bool>,
    nonce: u64,
    bets: HashMap<String, ActiveBet>,
}

/// Multiplier curve: `1 + t/1.5 + 0.005 t²`, truncated to two decimals.
pub fn multiplier_at(elapsed_secs: f64) -> f64 {
    fair::trunc2(1.0 + elapsed_secs / 1.5 + 0.005 * elapsed_secs * elapsed_secs)
}

impl RoundEngine {
    /// Spawn the engine task and return the caller-facing handle.
    pub fn spawn(
        config: GameConfig,
        hub: Hub,
        store: Arc<dyn Store>,
        ledger: BalanceLedger,
        history: Arc<dyn HistorySink>,
    ) -> RoundHandle {
        let (bet_tx, bet_rx) = mpsc::channel(config.bet_queue_capacity);
        let (cashout_tx, cashout_rx) = mpsc::channel(config.cashout_queue_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let current = Arc::new(RwLock::new(None));

        let handle = RoundHandle {
            bet_tx,
            cashout_tx: cashout_tx.clone(),
            current: Arc::clone(&current),
            stop_tx: Arc::new(stop_tx),
            bet_reply_timeout: config.bet_reply_timeout(),
            cashout_reply_timeout: config.cashout_reply_timeout(),
        };

        let engine = Self {
            config,
            hub,
            store,
            ledger,
            history,
            current,
            bet_rx,
            cashout_rx,
            auto_tx: cashout_tx,
            stop_rx,
            nonce: 0,
            bets: HashMap::new(),
        };

        tokio::spawn(engine.run());
        handle
    }

    async fn run(mut self) {
        info!("round engine started");
        loop {
            if *self.stop_rx.borrow() {
                break;
            }
            if !self.run_round().await {
                break;
            }
        }
        info!("round engine stopped");
    }

    /// Drive one full BETTING -> RUNNING -> CRASHED cycle. Returns false
    /// when the stop signal interrupted the round.
    async fn run_round(&mut self) -> bool {
        self.nonce += 1;

        let server_seed = fair::generate_seed();
        let hash_commitment = fair::commitment(&server_seed);
        let client_seed = fair::generate_seed();
        let crash_multiplier = fair::crash_multiplier(&server_seed, &client_seed, self.nonce);
        let round_id = format!("R{}-{}", Utc::now().timestamp(), self.nonce);

        {
            let mut guard = self.current.write().unwrap();
            *guard = Some(Round {
                round_id: round_id.clone(),
                server_seed: server_seed.clone(),
                hash_commitment: hash_commitment.clone(),
                client_seed,
                crash_multiplier,
                current_multiplier: fair::MIN_MULTIPLIER,
                status: RoundStatus::Betting,
                start_time: Utc::now(),
                crash_time: None,
                nonce: self.nonce,
            });
        }
        self.bets.clear();
        self.persist_snapshot().await;

        info!("=== round {} ===", round_id);
        info!("commitment: {}...", &hash_commitment[..16]);
        debug!("crash point: {:.2}x (hidden)", crash_multiplier);

        self.hub.broadcast(Event::RoundStart {
            status: RoundStatus::Betting,
            round_id: round_id.clone(),
            commitment: hash_commitment,
            time_left: self.config.betting_time().as_secs_f64(),
        });

        // Betting window: accept bets until the timer fires. Cashouts that
        // arrive now are drained too and rejected by the phase check.
        let betting_deadline = sleep(self.config.betting_time());
        tokio::pin!(betting_deadline);
        loop {
            tokio::select! {
                _ = &mut betting_deadline => break,
                Some(cmd) = self.bet_rx.recv() => {
                    let resp = self.handle_bet(cmd.req).await;
                    let _ = cmd.reply.send(resp);
                }
                Some(cmd) = self.cashout_rx.recv() => {
                    self.process_cashout(cmd).await;
                }
                _ = self.stop_rx.changed() => return false,
            }
        }

        {
            let mut guard = self.current.write().unwrap();
            if let Some(round) = guard.as_mut() {
                round.status = RoundStatus::Running;
            }
        }
        self.hub.broadcast(Event::RoundRunning {
            status: RoundStatus::Running,
            round_id: round_id.clone(),
        });

        let mut ticker = interval(self.config.tick_interval());
        // Consume the immediate first tick so the curve starts advancing
        // one interval after RUNNING begins.
        ticker.tick().await;
        // Curve time advances one nominal step per tick. At the default
        // 100 ms interval this tracks wall clock; the curve itself stays
        // deterministic under scheduler jitter.
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    let elapsed = ticks as f64 * CURVE_STEP_SECS;
                    let current = multiplier_at(elapsed);

                    let crashed = {
                        let mut guard = self.current.write().unwrap();
                        let Some(round) = guard.as_mut() else { return true };
                        round.current_multiplier = current;
                        if current >= round.crash_multiplier {
                            round.status = RoundStatus::Crashed;
                            round.current_multiplier = round.crash_multiplier;
                            round.crash_time = Some(Utc::now());
                            true
                        } else {
                            false
                        }
                    };

                    if crashed {
                        self.hub.broadcast(Event::Crash {
                            multiplier: crash_multiplier,
                            server_seed: server_seed.clone(),
                            round_id: round_id.clone(),
                        });
                        self.finish_round(&round_id).await;
                        break;
                    }

                    self.hub.broadcast(Event::Update {
                        multiplier: current,
                        round_id: round_id.clone(),
                    });
                    self.scan_auto_cashouts(current);
                }
                Some(cmd) = self.cashout_rx.recv() => {
                    self.process_cashout(cmd).await;
                }
                Some(cmd) = self.bet_rx.recv() => {
                    // Phase check inside the handler turns these away.
                    let resp = self.handle_bet(cmd.req).await;
                    let _ = cmd.reply.send(resp);
                }
                _ = self.stop_rx.changed() => return false,
            }
        }

        info!("=== round {} ended at {:.2}x ===", round_id, crash_multiplier);

        // Inter-round pause. Requests keep draining so a late bet or
        // cashout is rejected by the phase check now instead of leaking
        // into the next round's queue.
        let pause_deadline = sleep(self.config.inter_round_pause());
        tokio::pin!(pause_deadline);
        loop {
            tokio::select! {
                _ = &mut pause_deadline => return true,
                Some(cmd) = self.bet_rx.recv() => {
                    let resp = self.handle_bet(cmd.req).await;
                    let _ = cmd.reply.send(resp);
                }
                Some(cmd) = self.cashout_rx.recv() => {
                    self.process_cashout(cmd).await;
                }
                _ = self.stop_rx.changed() => return false,
            }
        }
    }

    async fn handle_bet(&mut self, req: BetRequest) -> BetResponse {
        if req.amount < self.config.min_bet || req.amount > self.config.max_bet {
            return BetResponse::failed(format!(
                "Bet must be between {:.2} and {:.2}",
                self.config.min_bet, self.config.max_bet
            ));
        }

        let round_id = {
            let guard = self.current.read().unwrap();
            match guard.as_ref() {
                Some(round) if round.status == RoundStatus::Betting => round.round_id.clone(),
                _ => return BetResponse::failed("Betting is closed"),
            }
        };

        let new_balance = match self.ledger.debit(&req.user_id, req.amount).await {
            Ok(balance) => balance,
            Err(LedgerError::Insufficient { balance }) => {
                return BetResponse {
                    success: false,
                    message: "Insufficient balance".to_string(),
                    bet_id: None,
                    balance: Some(balance),
                }
            }
            Err(e) => {
                warn!("debit failed for {}: {}", req.user_id, e);
                return BetResponse::failed("Transaction failed");
            }
        };

        let bet_id = format!("BET-{}", Uuid::new_v4());
        let bet = ActiveBet {
            bet_id: bet_id.clone(),
            user_id: req.user_id.clone(),
            amount: req.amount,
            auto_cashout: req.auto_cashout,
            placed_at: Utc::now(),
            cashed_out: false,
        };
        self.bets.insert(bet_id.clone(), bet.clone());
        self.persist_bet(&round_id, &bet).await;

        self.hub.broadcast(Event::BetPlaced {
            data: BetPlacedData {
                user_id: req.user_id.clone(),
                amount: req.amount,
                bet_id: bet_id.clone(),
            },
        });

        info!(
            "bet placed: user {} amount {:.2} ({})",
            req.user_id, req.amount, bet_id
        );

        BetResponse {
            success: true,
            message: "Bet placed successfully".to_string(),
            bet_id: Some(bet_id),
            balance: Some(new_balance),
        }
    }

    async fn process_cashout(&mut self, cmd: CashoutCommand) {
        let resp = self.handle_cashout(&cmd.req).await;
        if let Some(reply) = cmd.reply {
            let _ = reply.send(resp);
        }
    }

    async fn handle_cashout(&mut self, req: &CashoutRequest) -> CashoutResponse {
        // Snapshot the multiplier under the lock; the payout uses exactly
        // this value even if a tick lands while we credit.
        let (current_multiplier, round_id) = {
            let guard = self.current.read().unwrap();
            match guard.as_ref() {
                Some(round) if round.status == RoundStatus::Running => {
                    (round.current_multiplier, round.round_id.clone())
                }
                _ => return CashoutResponse::failed("Cannot cashout now"),
            }
        };

        let (owner, amount) = match self.bets.get(&req.bet_id) {
            None => return CashoutResponse::failed("Bet not found"),
            Some(bet) if bet.cashed_out => {
                return CashoutResponse::failed("Already cashed out")
            }
            Some(bet) => (bet.user_id.clone(), bet.amount),
        };

        let payout = amount * current_multiplier;
        let new_balance = match self.ledger.credit(&owner, payout).await {
            Ok(balance) => balance,
            Err(e) => {
                // The bet stays open; if nothing else claims it, it is a
                // loss at crash.
                warn!("credit failed for {}: {}", owner, e);
                return CashoutResponse::failed("Failed to credit balance");
            }
        };

        let persisted = if let Some(bet) = self.bets.get_mut(&req.bet_id) {
            bet.cashed_out = true;
            Some(bet.clone())
        } else {
            None
        };
        if let Some(bet) = persisted {
            self.persist_bet(&round_id, &bet).await;
        }

        self.hub.broadcast(Event::Cashout {
            data: CashoutData {
                user_id: owner.clone(),
                bet_id: req.bet_id.clone(),
                multiplier: current_multiplier,
                payout,
            },
        });

        info!(
            "cashout: user {} at {:.2}x (payout {:.2})",
            owner, current_multiplier, payout
        );

        CashoutResponse {
            success: true,
            message: format!("Cashed out at {:.2}x", current_multiplier),
            multiplier: Some(current_multiplier),
            payout: Some(payout),
            balance: Some(new_balance),
        }
    }

    /// Enqueue cashouts for every open bet whose target has been reached.
    /// Enqueueing keeps the cashout path single-writer; a bet may be queued
    /// on consecutive ticks until processed, which the at-most-once guard
    /// absorbs.
    fn scan_auto_cashouts(&self, current_multiplier: f64) {
        for bet in self.bets.values() {
            if !bet.cashed_out && bet.auto_cashout > 0.0 && current_multiplier >= bet.auto_cashout
            {
                let cmd = CashoutCommand {
                    req: CashoutRequest {
                        user_id: bet.user_id.clone(),
                        bet_id: bet.bet_id.clone(),
                    },
                    reply: None,
                };
                if self.auto_tx.try_send(cmd).is_err() {
                    warn!("cashout queue full, auto-cashout for {} delayed", bet.bet_id);
                }
            }
        }
    }

    async fn finish_round(&mut self, round_id: &str) {
        let total_bets = self.bets.len();
        let mut cashed_out_bets = 0;
        for bet in self.bets.values() {
            if bet.cashed_out {
                cashed_out_bets += 1;
            } else {
                info!("loss: user {} lost {:.2}", bet.user_id, bet.amount);
            }
        }

        if let Err(e) = self.store.del(&keys::active_bets(round_id)).await {
            warn!("failed to clear bet table for {}: {}", round_id, e);
        }
        self.persist_snapshot().await;

        let finished = {
            let guard = self.current.read().unwrap();
            guard.as_ref().map(|round| FinishedRound {
                round_id: round.round_id.clone(),
                nonce: round.nonce,
                server_seed: round.server_seed.clone(),
                client_seed: round.client_seed.clone(),
                hash_commitment: round.hash_commitment.clone(),
                crash_multiplier: round.crash_multiplier,
                start_time: round.start_time,
                crash_time: round.crash_time.unwrap_or_else(Utc::now),
                total_bets,
                cashed_out_bets,
            })
        };
        if let Some(record) = finished {
            self.history.record_round(&record).await;
        }
    }

    /// Mirror the round (projected, secrets omitted) into the store.
    async fn persist_snapshot(&self) {
        let serialized = {
            let guard = self.current.read().unwrap();
            guard.as_ref().map(|round| {
                (
                    keys::round(&round.round_id),
                    serde_json::to_string(&round.snapshot()),
                )
            })
        };

        if let Some((key, json)) = serialized {
            match json {
                Ok(json) => {
                    if let Err(e) = self.store.set(&key, json, Some(keys::ROUND_TTL)).await {
                        warn!("failed to persist round: {}", e);
                    }
                }
                Err(e) => warn!("failed to serialize round: {}", e),
            }
        }
    }

    async fn persist_bet(&self, round_id: &str, bet: &ActiveBet) {
        let bets_key = keys::active_bets(round_id);
        match serde_json::to_string(bet) {
            Ok(json) => {
                if let Err(e) = self.store.hset(&bets_key, &bet.bet_id, json).await {
                    warn!("failed to persist bet {}: {}", bet.bet_id, e);
                } else if let Err(e) = self.store.expire(&bets_key, keys::ACTIVE_BETS_TTL).await {
                    warn!("failed to set bet table TTL: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize bet {}: {}", bet.bet_id, e),
        }
    }
}
