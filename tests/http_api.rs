//! HTTP surface tests.
//!
//! Drive the router in-process with `tower::ServiceExt::oneshot`: no
//! listener, real handlers, real engines over the in-memory store.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use liftoff::api::routes::create_router;
use liftoff::api::AppState;
use liftoff::config::AppConfig;
use liftoff::fair;
use liftoff::games::EngineRegistry;
use liftoff::history::{HistorySink, LogHistory};
use liftoff::hub::Hub;
use liftoff::ledger::BalanceLedger;
use liftoff::round::RoundEngine;
use liftoff::store::{MemoryStore, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tower::util::ServiceExt;

async fn test_app() -> (Router, Arc<AppState>) {
    let mut config = AppConfig::default();
    config.game.betting_time_ms = 200;
    config.game.tick_interval_ms = 5;
    config.game.inter_round_pause_ms = 30;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let ledger = BalanceLedger::new(store.clone());
    let history: Arc<dyn HistorySink> = Arc::new(LogHistory::new());
    let hub = Hub::spawn(&config.hub);

    let round = RoundEngine::spawn(
        config.game.clone(),
        hub.clone(),
        store.clone(),
        ledger.clone(),
        history.clone(),
    );
    let registry = Arc::new(EngineRegistry::standard(
        store.clone(),
        ledger.clone(),
        &config.game,
    ));

    let state = Arc::new(AppState {
        config,
        store,
        ledger,
        hub,
        round,
        registry,
        history,
    });

    (create_router(state.clone()), state)
}

async fn wait_for_round(state: &Arc<AppState>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.round.current_round().is_none() {
        assert!(Instant::now() < deadline, "engine never produced a round");
        sleep(Duration::from_millis(5)).await;
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_all_components() {
    let (app, _state) = test_app().await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["cache"]["status"], "up");
    assert_eq!(body["database"]["status"], "up");
    assert_eq!(body["game"]["status"], "running");
    assert!(body["game"]["connected_clients"].is_u64());
}

#[tokio::test]
async fn game_state_hides_the_secrets() {
    let (app, state) = test_app().await;
    wait_for_round(&state).await;

    let response = app.oneshot(get("/api/v1/game/state")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert!(body.get("server_seed").is_none());
    assert!(body.get("crash_multiplier").is_none());
    assert_eq!(body["hash_commitment"].as_str().unwrap().len(), 64);
    assert!(body["round_id"].as_str().unwrap().starts_with('R'));
}

#[tokio::test]
async fn bet_requires_a_user_id() {
    let (app, state) = test_app().await;
    wait_for_round(&state).await;

    let response = app
        .oneshot(post_json(
            "/api/v1/game/bet",
            serde_json::json!({"user_id": "", "amount": 100.0}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "User ID is required");
}

#[tokio::test]
async fn bet_rejections_carry_the_engine_verdict() {
    let (app, state) = test_app().await;
    wait_for_round(&state).await;

    // No balance seeded: either the window is closed or the balance is
    // short, both as a 400 with the structured body.
    let response = app
        .oneshot(post_json(
            "/api/v1/game/bet",
            serde_json::json!({"user_id": "pauper", "amount": 100.0}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn balance_roundtrip() {
    let (app, _state) = test_app().await;

    let response = app
        .clone()
        .oneshot(get("/api/v1/user/newcomer/balance"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["balance"], 0.0);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/user/newcomer/balance",
            serde_json::json!({"balance": 750.5}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Balance updated successfully");

    let response = app
        .oneshot(get("/api/v1/user/newcomer/balance"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["balance"], 750.5);
}

#[tokio::test]
async fn verify_endpoint_matches_the_oracle() {
    let (app, _state) = test_app().await;

    let server_seed = fair::generate_seed();
    let client_seed = fair::generate_seed();
    let claimed = fair::crash_multiplier(&server_seed, &client_seed, 7);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/game/verify",
            serde_json::json!({
                "server_seed": server_seed,
                "client_seed": client_seed,
                "nonce": 7,
                "claimed": claimed,
            }),
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["valid"], true);

    let response = app
        .oneshot(post_json(
            "/api/v1/game/verify",
            serde_json::json!({
                "server_seed": server_seed,
                "client_seed": client_seed,
                "nonce": 7,
                "claimed": claimed + 5.0,
            }),
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn dice_roll_over_http_settles_a_seeded_user() {
    let (app, state) = test_app().await;
    state.ledger.set("roller", 1000.0).await.unwrap();

    let response = app
        .oneshot(post_json(
            "/api/v1/dice/roll",
            serde_json::json!({
                "user_id": "roller",
                "amount": 100.0,
                "target": 50.0,
                "is_over": true,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    let roll = body["roll_result"].as_f64().unwrap();
    let win = body["win"].as_bool().unwrap();
    assert_eq!(win, roll > 50.0);

    let expected = if win { 900.0 + 100.0 * 1.98 } else { 900.0 };
    assert_eq!(state.ledger.get("roller").await, expected);
}

#[tokio::test]
async fn mines_flow_over_http() {
    let (app, state) = test_app().await;
    state.ledger.set("digger", 1000.0).await.unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/mines/bet",
            serde_json::json!({"user_id": "digger", "amount": 100.0, "mine_count": 3}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let game_id = body["game_id"].as_str().unwrap().to_string();
    assert_eq!(body["balance"], 900.0);

    // The persisted session knows the layout; click a safe tile through
    // the API.
    let raw = state
        .store
        .get(&liftoff::store::keys::mines_game(&game_id))
        .await
        .unwrap()
        .unwrap();
    let session: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let mines: Vec<u64> = session["mine_positions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap())
        .collect();
    let safe_tile = (0..25u64).find(|t| !mines.contains(t)).unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/mines/click",
            serde_json::json!({"user_id": "digger", "game_id": game_id, "tile_id": safe_tile}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["is_mine"], false);
    assert_eq!(body["current_payout"], 110.22);

    let response = app
        .oneshot(post_json(
            "/api/v1/mines/cashout",
            serde_json::json!({"user_id": "digger", "game_id": game_id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["payout"], 110.22);
    let balance = body["balance"].as_f64().unwrap();
    assert!((balance - 1010.22).abs() < 1e-9, "balance {}", balance);
}

#[tokio::test]
async fn plinko_drop_returns_a_verifiable_path() {
    let (app, state) = test_app().await;
    state.ledger.set("bouncer", 1000.0).await.unwrap();

    let response = app
        .oneshot(post_json(
            "/api/v1/plinko/drop",
            serde_json::json!({
                "user_id": "bouncer",
                "amount": 50.0,
                "risk": "medium",
                "rows": 12,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    let path = body["path"].as_array().unwrap();
    assert_eq!(path.len(), 12);
    let slot = body["landing_slot"].as_u64().unwrap();
    assert_eq!(
        slot,
        path.iter().filter(|d| d.as_u64() == Some(1)).count() as u64
    );
}
