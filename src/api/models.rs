//! Request and response bodies owned by the HTTP layer.
//!
//! Game engines define their own request/response types; these are the
//! shapes with no engine to live in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `/health` aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub database: HashMap<String, String>,
    pub cache: HashMap<String, String>,
    pub game: GameHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameHealth {
    pub status: String,
    pub connected_clients: u64,
}

/// Round fairness check: recompute the crash point from the revealed
/// seeds and compare.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub claimed: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetBalanceRequest {
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetBalanceResponse {
    pub user_id: String,
    pub balance: f64,
    pub message: String,
}
