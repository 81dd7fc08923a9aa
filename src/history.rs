//! Durable history boundary.
//!
//! Finished rounds are handed to a [`HistorySink`] fire-and-forget; the
//! relational audit store lives behind this trait in deployments that have
//! one. The default sink writes the terminal record to the structured log,
//! which keeps the reveal (seed + crash point) reconstructable from log
//! retention alone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// Terminal record of a crash round, emitted once at CRASHED.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedRound {
    pub round_id: String,
    pub nonce: u64,
    pub server_seed: String,
    pub client_seed: String,
    pub hash_commitment: String,
    pub crash_multiplier: f64,
    pub start_time: DateTime<Utc>,
    pub crash_time: DateTime<Utc>,
    pub total_bets: usize,
    pub cashed_out_bets: usize,
}

#[async_trait]
pub trait HistorySink: Send + Sync + 'static {
    /// Record a finished round. Failures must not propagate to the round
    /// loop; implementations log and move on.
    async fn record_round(&self, round: &FinishedRound);

    /// Health snapshot for the `/health` endpoint.
    fn health(&self) -> HashMap<String, String>;
}

/// Sink that records rounds to the log stream.
#[derive(Default)]
pub struct LogHistory;

impl LogHistory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HistorySink for LogHistory {
    async fn record_round(&self, round: &FinishedRound) {
        info!(
            round_id = %round.round_id,
            nonce = round.nonce,
            crash = round.crash_multiplier,
            bets = round.total_bets,
            cashed_out = round.cashed_out_bets,
            server_seed = %round.server_seed,
            "round archived"
        );
    }

    fn health(&self) -> HashMap<String, String> {
        let mut stats = HashMap::new();
        stats.insert("status".to_string(), "up".to_string());
        stats.insert("backend".to_string(), "log".to_string());
        stats
    }
}
