//! Mines engine.
//!
//! A 5x5 grid hides `mine_count` mines at provably-fair positions. The
//! session stays ACTIVE across clicks: each safe tile compounds the
//! payout, the first mine busts the session, and cashing out banks the
//! current payout. The complete session state, hidden fields included,
//! round-trips through the store; client responses only ever carry the
//! revealed surface.

use crate::fair::{self, MINES_GRID_SIZE};
use crate::games::BetLimits;
use crate::ledger::{BalanceLedger, LedgerError};
use crate::store::{keys, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const MINES_MIN_COUNT: u32 = 1;
pub const MINES_MAX_COUNT: u32 = 24;

/// Multiplier haircut applied to every Mines payout.
const MINES_HOUSE_EDGE: f64 = 0.97;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MinesStatus {
    Active,
    CashedOut,
    Busted,
}

/// Full session state as persisted. Terminal sessions are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinesGame {
    pub game_id: String,
    pub user_id: String,
    pub bet_amount: f64,
    pub mine_count: u32,
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub mine_positions: Vec<u32>,
    pub revealed_tiles: Vec<u32>,
    pub current_payout: f64,
    pub status: MinesStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinesBetRequest {
    pub user_id: String,
    pub amount: f64,
    pub mine_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinesBetResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_payout: Option<f64>,
}

impl MinesBetResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            game_id: None,
            balance: None,
            current_payout: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinesClickRequest {
    pub user_id: String,
    pub game_id: String,
    pub tile_id: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinesClickResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tile_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_mine: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_payout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_status: Option<MinesStatus>,
}

impl MinesClickResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            tile_id: None,
            is_mine: None,
            current_payout: None,
            game_status: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinesCashoutRequest {
    pub user_id: String,
    pub game_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinesCashoutResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
}

impl MinesCashoutResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payout: None,
            balance: None,
        }
    }
}

/// Payout after `revealed` safe tiles with `mine_count` mines on the
/// board: `bet * 0.97 * product((25 - k) / (S - k))` for `k < revealed`, where
/// `S` is the safe-tile count.
pub fn mines_payout(bet_amount: f64, mine_count: u32, revealed: u32) -> f64 {
    if revealed == 0 {
        return bet_amount;
    }

    let total = MINES_GRID_SIZE as f64;
    let safe = total - mine_count as f64;

    let mut multiplier = 1.0;
    for k in 0..revealed {
        multiplier *= (total - k as f64) / (safe - k as f64);
    }
    multiplier *= MINES_HOUSE_EDGE;

    fair::trunc2(bet_amount * multiplier)
}

pub struct MinesEngine {
    store: Arc<dyn Store>,
    ledger: BalanceLedger,
    limits: BetLimits,
    nonce: AtomicU64,
}

impl MinesEngine {
    pub fn new(store: Arc<dyn Store>, ledger: BalanceLedger, limits: BetLimits) -> Self {
        Self {
            store,
            ledger,
            limits,
            nonce: AtomicU64::new(0),
        }
    }

    pub fn start(&self) {
        info!("mines engine started");
    }

    pub fn stop(&self) {
        info!("mines engine stopped");
    }

    pub async fn place_bet(&self, req: MinesBetRequest) -> MinesBetResponse {
        if !(MINES_MIN_COUNT..=MINES_MAX_COUNT).contains(&req.mine_count) {
            return MinesBetResponse::failed(format!(
                "Mine count must be between {} and {}",
                MINES_MIN_COUNT, MINES_MAX_COUNT
            ));
        }
        if let Some(message) = self.limits.check(req.amount) {
            return MinesBetResponse::failed(message);
        }

        let new_balance = match self.ledger.debit(&req.user_id, req.amount).await {
            Ok(balance) => balance,
            Err(LedgerError::Insufficient { balance }) => {
                return MinesBetResponse {
                    success: false,
                    message: "Insufficient balance".to_string(),
                    game_id: None,
                    balance: Some(balance),
                    current_payout: None,
                }
            }
            Err(e) => {
                warn!("mines debit failed for {}: {}", req.user_id, e);
                return MinesBetResponse::failed("Transaction failed");
            }
        };

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        let server_seed = fair::generate_seed();
        let client_seed = fair::generate_seed();
        let mine_positions =
            fair::mine_positions(&server_seed, &client_seed, nonce, req.mine_count);

        let game_id = format!("MINES-{}", Uuid::new_v4());
        let game = MinesGame {
            game_id: game_id.clone(),
            user_id: req.user_id.clone(),
            bet_amount: req.amount,
            mine_count: req.mine_count,
            server_seed,
            client_seed,
            nonce,
            mine_positions,
            revealed_tiles: Vec::new(),
            current_payout: req.amount,
            status: MinesStatus::Active,
            created_at: Utc::now(),
            ended_at: None,
        };
        self.persist(&game).await;

        info!(
            "mines game {} started for user {} with {} mines",
            game_id, req.user_id, req.mine_count
        );

        MinesBetResponse {
            success: true,
            message: "Game started".to_string(),
            game_id: Some(game_id),
            balance: Some(new_balance),
            current_payout: Some(req.amount),
        }
    }

    pub async fn click(&self, req: MinesClickRequest) -> MinesClickResponse {
        let Some(mut game) = self.load(&req.game_id).await else {
            return MinesClickResponse::failed("Game not found");
        };

        if game.status != MinesStatus::Active {
            return MinesClickResponse::failed("Game is not active");
        }
        if req.tile_id >= MINES_GRID_SIZE {
            return MinesClickResponse::failed("Invalid tile ID");
        }
        if game.revealed_tiles.contains(&req.tile_id) {
            return MinesClickResponse::failed("Tile already revealed");
        }

        if game.mine_positions.contains(&req.tile_id) {
            game.status = MinesStatus::Busted;
            game.current_payout = 0.0;
            game.ended_at = Some(Utc::now());
            self.persist(&game).await;

            info!("user {} hit a mine at tile {}", req.user_id, req.tile_id);

            return MinesClickResponse {
                success: true,
                message: "You hit a mine!".to_string(),
                tile_id: Some(req.tile_id),
                is_mine: Some(true),
                current_payout: Some(0.0),
                game_status: Some(MinesStatus::Busted),
            };
        }

        game.revealed_tiles.push(req.tile_id);
        game.current_payout = mines_payout(
            game.bet_amount,
            game.mine_count,
            game.revealed_tiles.len() as u32,
        );
        self.persist(&game).await;

        info!(
            "user {} revealed safe tile {}, payout {:.2}",
            req.user_id, req.tile_id, game.current_payout
        );

        MinesClickResponse {
            success: true,
            message: "Safe tile!".to_string(),
            tile_id: Some(req.tile_id),
            is_mine: Some(false),
            current_payout: Some(game.current_payout),
            game_status: Some(MinesStatus::Active),
        }
    }

    pub async fn cashout(&self, req: MinesCashoutRequest) -> MinesCashoutResponse {
        let Some(mut game) = self.load(&req.game_id).await else {
            return MinesCashoutResponse::failed("Game not found");
        };

        if game.status != MinesStatus::Active {
            return MinesCashoutResponse::failed("Game is not active");
        }
        if game.revealed_tiles.is_empty() {
            return MinesCashoutResponse::failed(
                "Must reveal at least one tile before cashing out",
            );
        }

        let new_balance = match self.ledger.credit(&game.user_id, game.current_payout).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("mines credit failed for {}: {}", game.user_id, e);
                return MinesCashoutResponse::failed("Failed to credit balance");
            }
        };

        game.status = MinesStatus::CashedOut;
        game.ended_at = Some(Utc::now());
        self.persist(&game).await;

        info!(
            "user {} cashed out mines game {} for {:.2}",
            req.user_id, req.game_id, game.current_payout
        );

        MinesCashoutResponse {
            success: true,
            message: "Cashed out successfully".to_string(),
            payout: Some(game.current_payout),
            balance: Some(new_balance),
        }
    }

    async fn load(&self, game_id: &str) -> Option<MinesGame> {
        let raw = self.store.get(&keys::mines_game(game_id)).await.ok()??;
        match serde_json::from_str(&raw) {
            Ok(game) => Some(game),
            Err(e) => {
                warn!("corrupt mines game {}: {}", game_id, e);
                None
            }
        }
    }

    async fn persist(&self, game: &MinesGame) {
        match serde_json::to_string(game) {
            Ok(json) => {
                let key = keys::mines_game(&game.game_id);
                if let Err(e) = self.store.set(&key, json, Some(keys::GAME_TTL)).await {
                    warn!("failed to persist mines game {}: {}", game.game_id, e);
                }
            }
            Err(e) => warn!("failed to serialize mines game {}: {}", game.game_id, e),
        }
    }
}
