//! Plinko engine.
//!
//! Single-shot: debit, derive the ball path from the fairness primitive,
//! pay out the landing slot's multiplier, persist the record, and reveal
//! the seeds in the same response so the drop is immediately verifiable.

use crate::fair;
use crate::games::BetLimits;
use crate::ledger::{BalanceLedger, LedgerError};
use crate::store::{keys, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const BASE_ROWS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlinkoRisk {
    Low,
    Medium,
    High,
}

impl PlinkoRisk {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Canonical 16-row multiplier tables (17 slots, symmetric).
const LOW_16: [f64; 17] = [
    16.0, 9.0, 2.0, 1.4, 1.4, 1.2, 1.1, 1.0, 0.5, 1.0, 1.1, 1.2, 1.4, 1.4, 2.0, 9.0, 16.0,
];
const MEDIUM_16: [f64; 17] = [
    110.0, 41.0, 10.0, 5.0, 3.0, 1.5, 1.0, 0.5, 0.3, 0.5, 1.0, 1.5, 3.0, 5.0, 10.0, 41.0, 110.0,
];
const HIGH_16: [f64; 17] = [
    1000.0, 130.0, 26.0, 9.0, 4.0, 2.0, 0.2, 0.2, 0.2, 0.2, 0.2, 2.0, 4.0, 9.0, 26.0, 130.0,
    1000.0,
];

/// Multiplier table for a board, one entry per landing slot (`rows + 1`).
///
/// Boards shorter than 16 rows sample the canonical table symmetrically and
/// damp the extreme multipliers in proportion to the row count, so a short
/// board cannot pay the full 16-row tails.
pub fn multiplier_table(risk: PlinkoRisk, rows: u32) -> Vec<f64> {
    let base: &[f64; 17] = match risk {
        PlinkoRisk::Low => &LOW_16,
        PlinkoRisk::Medium => &MEDIUM_16,
        PlinkoRisk::High => &HIGH_16,
    };

    (0..=rows)
        .map(|slot| {
            let index = ((slot * BASE_ROWS) as f64 / rows as f64).round() as usize;
            let mut multiplier = base[index.min(BASE_ROWS as usize)];
            if rows < BASE_ROWS && multiplier > 10.0 {
                multiplier = 10.0 + (multiplier - 10.0) * rows as f64 / BASE_ROWS as f64;
            }
            multiplier
        })
        .collect()
}

/// Persisted record of a completed drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlinkoGame {
    pub game_id: String,
    pub user_id: String,
    pub bet_amount: f64,
    pub risk: PlinkoRisk,
    pub rows: u32,
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub path: Vec<u8>,
    pub landing_slot: usize,
    pub multiplier: f64,
    pub payout: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlinkoDropRequest {
    pub user_id: String,
    pub amount: f64,
    pub risk: String,
    pub rows: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlinkoDropResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_slot: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

impl PlinkoDropResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            game_id: None,
            path: None,
            landing_slot: None,
            multiplier: None,
            payout: None,
            balance: None,
            server_seed: None,
            client_seed: None,
            nonce: None,
        }
    }
}

pub struct PlinkoEngine {
    store: Arc<dyn Store>,
    ledger: BalanceLedger,
    limits: BetLimits,
    nonce: AtomicU64,
}

impl PlinkoEngine {
    pub fn new(store: Arc<dyn Store>, ledger: BalanceLedger, limits: BetLimits) -> Self {
        Self {
            store,
            ledger,
            limits,
            nonce: AtomicU64::new(0),
        }
    }

    pub fn start(&self) {
        info!("plinko engine started");
    }

    pub fn stop(&self) {
        info!("plinko engine stopped");
    }

    pub async fn drop_ball(&self, req: PlinkoDropRequest) -> PlinkoDropResponse {
        if let Some(message) = self.limits.check(req.amount) {
            return PlinkoDropResponse::failed(message);
        }
        if !matches!(req.rows, 8 | 12 | 16) {
            return PlinkoDropResponse::failed("Rows must be 8, 12, or 16");
        }
        let Some(risk) = PlinkoRisk::parse(&req.risk) else {
            return PlinkoDropResponse::failed("Risk must be low, medium, or high");
        };

        match self.ledger.debit(&req.user_id, req.amount).await {
            Ok(_) => {}
            Err(LedgerError::Insufficient { balance }) => {
                let mut resp = PlinkoDropResponse::failed("Insufficient balance");
                resp.balance = Some(balance);
                return resp;
            }
            Err(e) => {
                warn!("plinko debit failed for {}: {}", req.user_id, e);
                return PlinkoDropResponse::failed("Transaction failed");
            }
        }

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        let server_seed = fair::generate_seed();
        let client_seed = fair::generate_seed();
        let (path, landing_slot) = fair::plinko_path(&server_seed, &client_seed, nonce, req.rows);

        let table = multiplier_table(risk, req.rows);
        let multiplier = table[landing_slot];
        let payout = req.amount * multiplier;

        let final_balance = match self.ledger.credit(&req.user_id, payout).await {
            Ok(balance) => balance,
            Err(e) => {
                // Stake already debited; the missing record flags the drop
                // for offline reconciliation.
                warn!("plinko credit failed for {}: {}", req.user_id, e);
                return PlinkoDropResponse::failed("Failed to credit payout");
            }
        };

        let game_id = format!("PLINKO-{}", Uuid::new_v4());
        let game = PlinkoGame {
            game_id: game_id.clone(),
            user_id: req.user_id.clone(),
            bet_amount: req.amount,
            risk,
            rows: req.rows,
            server_seed: server_seed.clone(),
            client_seed: client_seed.clone(),
            nonce,
            path: path.clone(),
            landing_slot,
            multiplier,
            payout,
            created_at: Utc::now(),
        };
        self.persist(&game).await;

        info!(
            "user {} dropped ball, slot {} at {:.2}x, payout {:.2}",
            req.user_id, landing_slot, multiplier, payout
        );

        PlinkoDropResponse {
            success: true,
            message: "Ball dropped successfully".to_string(),
            game_id: Some(game_id),
            path: Some(path),
            landing_slot: Some(landing_slot),
            multiplier: Some(multiplier),
            payout: Some(payout),
            balance: Some(final_balance),
            server_seed: Some(server_seed),
            client_seed: Some(client_seed),
            nonce: Some(nonce),
        }
    }

    async fn persist(&self, game: &PlinkoGame) {
        match serde_json::to_string(game) {
            Ok(json) => {
                let key = keys::plinko_game(&game.game_id);
                if let Err(e) = self.store.set(&key, json, Some(keys::GAME_TTL)).await {
                    warn!("failed to persist plinko game {}: {}", game.game_id, e);
                }
            }
            Err(e) => warn!("failed to serialize plinko game {}: {}", game.game_id, e),
        }
    }
}
