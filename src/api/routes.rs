//! Route definitions.

use crate::api::handlers::{self, AppState};
use crate::api::ws::ws_handler;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the full router: `/health` and `/ws` at the root, everything else
/// version-prefixed under `/api/v1`.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        // Crash game
        .route("/game/state", get(handlers::game_state))
        .route("/game/bet", post(handlers::place_bet))
        .route("/game/cashout", post(handlers::cashout))
        .route("/game/verify", post(handlers::verify_round))
        // Balances
        .route(
            "/user/:user_id/balance",
            get(handlers::get_balance).post(handlers::set_balance),
        )
        // Mines
        .route("/mines/bet", post(handlers::mines_bet))
        .route("/mines/click", post(handlers::mines_click))
        .route("/mines/cashout", post(handlers::mines_cashout))
        // Plinko
        .route("/plinko/drop", post(handlers::plinko_drop))
        // Dice
        .route("/dice/roll", post(handlers::dice_roll));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api)
        .with_state(state)
}
