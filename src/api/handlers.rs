//! Request handlers.
//!
//! Handlers validate identity fields, dispatch into the round engine or an
//! instant engine, and translate `{success: false}` verdicts into HTTP 400
//! with the engine's own response body.

use crate::api::errors::ApiError;
use crate::api::models::*;
use crate::config::AppConfig;
use crate::fair;
use crate::games::dice::DiceRollRequest;
use crate::games::mines::{MinesBetRequest, MinesCashoutRequest, MinesClickRequest};
use crate::games::plinko::PlinkoDropRequest;
use crate::games::EngineRegistry;
use crate::history::HistorySink;
use crate::hub::Hub;
use crate::ledger::BalanceLedger;
use crate::round::{BetRequest, CashoutRequest, RoundHandle, RoundSnapshot};
use crate::store::Store;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub ledger: BalanceLedger,
    pub hub: Hub,
    pub round: RoundHandle,
    pub registry: Arc<EngineRegistry>,
    pub history: Arc<dyn HistorySink>,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        database: state.history.health(),
        cache: state.store.health(),
        game: GameHealth {
            status: "running".to_string(),
            connected_clients: state.hub.client_count(),
        },
    })
}

/// GET /api/v1/game/state
pub async fn game_state(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RoundSnapshot>, ApiError> {
    state
        .round
        .current_round()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No active game round"))
}

/// POST /api/v1/game/bet
pub async fn place_bet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BetRequest>,
) -> Response {
    if req.user_id.is_empty() {
        return ApiError::bad_request("User ID is required").into_response();
    }

    let resp = state.round.place_bet(req).await;
    if resp.success {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

/// POST /api/v1/game/cashout
pub async fn cashout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CashoutRequest>,
) -> Response {
    if req.user_id.is_empty() || req.bet_id.is_empty() {
        return ApiError::bad_request("User ID and Bet ID are required").into_response();
    }

    let resp = state.round.cashout(req).await;
    if resp.success {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

/// POST /api/v1/game/verify
pub async fn verify_round(Json(req): Json<VerifyRequest>) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: fair::verify(&req.server_seed, &req.client_seed, req.nonce, req.claimed),
    })
}

/// GET /api/v1/user/:user_id/balance
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<BalanceResponse> {
    let balance = state.ledger.get(&user_id).await;
    Json(BalanceResponse { user_id, balance })
}

/// POST /api/v1/user/:user_id/balance (admin/seeding)
pub async fn set_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<SetBalanceRequest>,
) -> Result<Json<SetBalanceResponse>, ApiError> {
    state
        .ledger
        .set(&user_id, req.balance)
        .await
        .map_err(|_| ApiError::internal("Failed to set balance"))?;

    Ok(Json(SetBalanceResponse {
        user_id,
        balance: req.balance,
        message: "Balance updated successfully".to_string(),
    }))
}

/// POST /api/v1/mines/bet
pub async fn mines_bet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MinesBetRequest>,
) -> Response {
    if req.user_id.is_empty() {
        return ApiError::bad_request("User ID is required").into_response();
    }
    let Some(engine) = state.registry.mines() else {
        return ApiError::internal("Mines game not available").into_response();
    };

    let resp = engine.place_bet(req).await;
    if resp.success {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

/// POST /api/v1/mines/click
pub async fn mines_click(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MinesClickRequest>,
) -> Response {
    if req.user_id.is_empty() || req.game_id.is_empty() {
        return ApiError::bad_request("User ID and Game ID are required").into_response();
    }
    let Some(engine) = state.registry.mines() else {
        return ApiError::internal("Mines game not available").into_response();
    };

    let resp = engine.click(req).await;
    if resp.success {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

/// POST /api/v1/mines/cashout
pub async fn mines_cashout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MinesCashoutRequest>,
) -> Response {
    if req.user_id.is_empty() || req.game_id.is_empty() {
        return ApiError::bad_request("User ID and Game ID are required").into_response();
    }
    let Some(engine) = state.registry.mines() else {
        return ApiError::internal("Mines game not available").into_response();
    };

    let resp = engine.cashout(req).await;
    if resp.success {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

/// POST /api/v1/plinko/drop
pub async fn plinko_drop(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlinkoDropRequest>,
) -> Response {
    if req.user_id.is_empty() {
        return ApiError::bad_request("User ID is required").into_response();
    }
    let Some(engine) = state.registry.plinko() else {
        return ApiError::internal("Plinko game not available").into_response();
    };

    let resp = engine.drop_ball(req).await;
    if resp.success {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

/// POST /api/v1/dice/roll
pub async fn dice_roll(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DiceRollRequest>,
) -> Response {
    if req.user_id.is_empty() {
        return ApiError::bad_request("User ID is required").into_response();
    }
    let Some(engine) = state.registry.dice() else {
        return ApiError::internal("Dice game not available").into_response();
    };

    let resp = engine.roll(req).await;
    if resp.success {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}
