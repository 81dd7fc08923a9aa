//! Liftoff service binary.

use liftoff::{
    api::{ApiServer, AppState},
    config::ConfigLoader,
    errors::LiftoffError,
    games::EngineRegistry,
    history::{HistorySink, LogHistory},
    hub::Hub,
    ledger::BalanceLedger,
    round::RoundEngine,
    store::{MemoryStore, Store},
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), LiftoffError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liftoff=info,tower_http=info".into()),
        )
        .init();

    let config = ConfigLoader::from_env().load()?;

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
    registry.start_all();

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        ledger,
        hub,
        round: round.clone(),
        registry: registry.clone(),
        history,
    });

    let server = ApiServer::new(config.server.clone(), state);
    let result = server.run().await;

    info!("shutting down engines");
    round.stop();
    registry.stop_all();

    result
}
