//! Dice engine.
//!
//! Single-shot roll-over/roll-under against a target in [0, 100). The
//! multiplier is `99 / win_chance_percent` with the win chance floored at
//! 1%, so the house keeps 1% of the fair odds on every line.

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

pub const DICE_MIN_VALUE: f64 = 0.00;
pub const DICE_MAX_VALUE: f64 = 100.00;

/// Payout multiplier for a target line. `win_chance` is a fraction;
/// degenerate lines are floored at 1% so the multiplier caps at 99x.
pub fn dice_multiplier(target: f64, is_over: bool) -> f64 {
    let mut win_chance = if is_over {
        (DICE_MAX_VALUE - target) / 100.0
    } else {
        target / 100.0
    };
    if win_chance <= 0.01 {
        win_chance = 0.01;
    }

    fair::trunc2((1.0 / win_chance) * 0.99)
}

/// Persisted record of a completed roll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiceGame {
    pub game_id: String,
    pub user_id: String,
    pub bet_amount: f64,
    pub target: f64,
    pub is_over: bool,
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub roll_result: f64,
    pub win: bool,
    pub multiplier: f64,
    pub payout: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiceRollRequest {
    pub user_id: String,
    pub amount: f64,
    pub target: f64,
    pub is_over: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiceRollResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_result: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub win: Option<bool>,
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

impl DiceRollResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            game_id: None,
            roll_result: None,
            win: None,
            multiplier: None,
            payout: None,
            balance: None,
            server_seed: None,
            client_seed: None,
            nonce: None,
        }
    }
}

pub struct DiceEngine {
    store: Arc<dyn Store>,
    ledger: BalanceLedger,
    limits: BetLimits,
    nonce: AtomicU64,
}

impl DiceEngine {
    pub fn new(store: Arc<dyn Store>, ledger: BalanceLedger, limits: BetLimits) -> Self {
        Self {
            store,
            ledger,
            limits,
            nonce: AtomicU64::new(0),
        }
    }

    pub fn start(&self) {
        info!("dice engine started");
    }

    pub fn stop(&self) {
        info!("dice engine stopped");
    }

    pub async fn roll(&self, req: DiceRollRequest) -> DiceRollResponse {
        if let Some(message) = self.limits.check(req.amount) {
            return DiceRollResponse::failed(message);
        }
        if req.target < DICE_MIN_VALUE || req.target > DICE_MAX_VALUE {
            return DiceRollResponse::failed(format!(
                "Target must be between {:.2} and {:.2}",
                DICE_MIN_VALUE, DICE_MAX_VALUE
            ));
        }
        // Degenerate lines would have a near-zero win window.
        if req.is_over && req.target >= 99.00 {
            return DiceRollResponse::failed("Target too high for 'over' bet");
        }
        if !req.is_over && req.target <= 1.00 {
            return DiceRollResponse::failed("Target too low for 'under' bet");
        }

        let balance_after_debit = match self.ledger.debit(&req.user_id, req.amount).await {
            Ok(balance) => balance,
            Err(LedgerError::Insufficient { balance }) => {
                let mut resp = DiceRollResponse::failed("Insufficient balance");
                resp.balance = Some(balance);
                return resp;
            }
            Err(e) => {
                warn!("dice debit failed for {}: {}", req.user_id, e);
                return DiceRollResponse::failed("Transaction failed");
            }
        };

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        let server_seed = fair::generate_seed();
        let client_seed = fair::generate_seed();
        let roll_result = fair::dice_roll(&server_seed, &client_seed, nonce);

        let win = if req.is_over {
            roll_result > req.target
        } else {
            roll_result < req.target
        };

        let multiplier = dice_multiplier(req.target, req.is_over);
        let payout = if win { req.amount * multiplier } else { 0.0 };

        let final_balance = if win {
            match self.ledger.credit(&req.user_id, payout).await {
                Ok(balance) => balance,
                Err(e) => {
                    warn!("dice credit failed for {}: {}", req.user_id, e);
                    return DiceRollResponse::failed("Failed to credit payout");
                }
            }
        } else {
            balance_after_debit
        };

        let game_id = format!("DICE-{}", Uuid::new_v4());
        let game = DiceGame {
            game_id: game_id.clone(),
            user_id: req.user_id.clone(),
            bet_amount: req.amount,
            target: req.target,
            is_over: req.is_over,
            server_seed: server_seed.clone(),
            client_seed: client_seed.clone(),
            nonce,
            roll_result,
            win,
            multiplier,
            payout,
            created_at: Utc::now(),
        };
        self.persist(&game).await;

        info!(
            "user {} rolled {:.2} ({} {:.2}), {}, payout {:.2}",
            req.user_id,
            roll_result,
            if req.is_over { "over" } else { "under" },
            req.target,
            if win { "won" } else { "lost" },
            payout
        );

        DiceRollResponse {
            success: true,
            message: "Dice rolled successfully".to_string(),
            game_id: Some(game_id),
            roll_result: Some(roll_result),
            win: Some(win),
            multiplier: Some(multiplier),
            payout: Some(payout),
            balance: Some(final_balance),
            server_seed: Some(server_seed),
            client_seed: Some(client_seed),
            nonce: Some(nonce),
        }
    }

    async fn persist(&self, game: &DiceGame) {
        match serde_json::to_string(game) {
            Ok(json) => {
                let key = keys::dice_game(&game.game_id);
                if let Err(e) = self.store.set(&key, json, Some(keys::GAME_TTL)).await {
                    warn!("failed to persist dice game {}: {}", game.game_id, e);
                }
            }
            Err(e) => warn!("failed to serialize dice game {}: {}", game.game_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::store::MemoryStore;

    fn test_engine() -> (DiceEngine, BalanceLedger) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = BalanceLedger::new(store.clone());
        let engine = DiceEngine::new(
            store,
            ledger.clone(),
            BetLimits::from_config(&GameConfig::default()),
        );
        (engine, ledger)
    }

    #[test]
    fn multiplier_reflects_win_chance() {
        // Over 50: 50% win chance -> 99/50 = 1.98.
        assert_eq!(dice_multiplier(50.0, true), 1.98);
        // Under 50 is symmetric.
        assert_eq!(dice_multiplier(50.0, false), 1.98);
        // Under 25: 25% chance -> 3.96.
        assert_eq!(dice_multiplier(25.0, false), 3.96);
        // Over 98: 2% chance -> 49.5.
        assert_eq!(dice_multiplier(98.0, true), 49.5);
    }

    #[test]
    fn multiplier_floors_the_win_chance_at_one_percent() {
        // A 1% (or smaller) window caps the multiplier at 99.
        assert_eq!(dice_multiplier(99.0, true), 99.0);
        assert_eq!(dice_multiplier(99.5, true), 99.0);
        assert_eq!(dice_multiplier(0.5, false), 99.0);
    }

    #[tokio::test]
    async fn roll_settles_and_is_verifiable() {
        let (engine, ledger) = test_engine();
        ledger.set("d1", 1000.0).await.unwrap();

        let resp = engine
            .roll(DiceRollRequest {
                user_id: "d1".to_string(),
                amount: 100.0,
                target: 50.0,
                is_over: true,
            })
            .await;

        assert!(resp.success, "{}", resp.message);
        let roll = resp.roll_result.unwrap();
        assert!((0.0..100.0).contains(&roll));

        let win = resp.win.unwrap();
        assert_eq!(win, roll > 50.0);

        let expected_balance = if win {
            1000.0 - 100.0 + 100.0 * 1.98
        } else {
            900.0
        };
        assert_eq!(resp.balance.unwrap(), expected_balance);

        // The roll must re-derive from the revealed seeds.
        let derived = fair::dice_roll(
            &resp.server_seed.unwrap(),
            &resp.client_seed.unwrap(),
            resp.nonce.unwrap(),
        );
        assert_eq!(derived, roll);
    }

    #[tokio::test]
    async fn rejects_degenerate_targets() {
        let (engine, ledger) = test_engine();
        ledger.set("d2", 1000.0).await.unwrap();

        let too_high = engine
            .roll(DiceRollRequest {
                user_id: "d2".to_string(),
                amount: 10.0,
                target: 99.0,
                is_over: true,
            })
            .await;
        assert_eq!(too_high.message, "Target too high for 'over' bet");

        let too_low = engine
            .roll(DiceRollRequest {
                user_id: "d2".to_string(),
                amount: 10.0,
                target: 1.0,
                is_over: false,
            })
            .await;
        assert_eq!(too_low.message, "Target too low for 'under' bet");

        let out_of_range = engine
            .roll(DiceRollRequest {
                user_id: "d2".to_string(),
                amount: 10.0,
                target: 100.5,
                is_over: false,
            })
            .await;
        assert_eq!(
            out_of_range.message,
            "Target must be between 0.00 and 100.00"
        );

        // No debit happened for any rejection.
        assert_eq!(ledger.get("d2").await, 1000.0);
    }

    #[tokio::test]
    async fn insufficient_balance_reports_current_balance() {
        let (engine, ledger) = test_engine();
        ledger.set("d3", 5.0).await.unwrap();

        let resp = engine
            .roll(DiceRollRequest {
                user_id: "d3".to_string(),
                amount: 10.0,
                target: 50.0,
                is_over: false,
            })
            .await;
        assert!(!resp.success);
        assert_eq!(resp.message, "Insufficient balance");
        assert_eq!(resp.balance, Some(5.0));
    }
}
