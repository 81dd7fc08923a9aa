//! Instant-engine registry.
//!
//! Maps a game kind to its engine handle. The set is fixed at startup and
//! read-only afterwards; `start_all`/`stop_all` bracket the process
//! lifecycle. A kind with no registered engine reports "not available" at
//! the HTTP layer.

use crate::config::GameConfig;
use crate::games::{
    dice::DiceEngine, mines::MinesEngine, plinko::PlinkoEngine, BetLimits,
};
use crate::ledger::BalanceLedger;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Mines,
    Plinko,
    Dice,
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::Mines => write!(f, "mines"),
            GameKind::Plinko => write!(f, "plinko"),
            GameKind::Dice => write!(f, "dice"),
        }
    }
}

/// Typed engine handle. Request dispatch matches on the variant instead of
/// downcasting.
#[derive(Clone)]
pub enum InstantHandle {
    Mines(Arc<MinesEngine>),
    Plinko(Arc<PlinkoEngine>),
    Dice(Arc<DiceEngine>),
}

impl InstantHandle {
    pub fn kind(&self) -> GameKind {
        match self {
            InstantHandle::Mines(_) => GameKind::Mines,
            InstantHandle::Plinko(_) => GameKind::Plinko,
            InstantHandle::Dice(_) => GameKind::Dice,
        }
    }

    fn start(&self) {
        match self {
            InstantHandle::Mines(engine) => engine.start(),
            InstantHandle::Plinko(engine) => engine.start(),
            InstantHandle::Dice(engine) => engine.start(),
        }
    }

    fn stop(&self) {
        match self {
            InstantHandle::Mines(engine) => engine.stop(),
            InstantHandle::Plinko(engine) => engine.stop(),
            InstantHandle::Dice(engine) => engine.stop(),
        }
    }
}

#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<GameKind, InstantHandle>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with all three instant engines over the shared
    /// store and ledger.
    pub fn standard(
        store: Arc<dyn Store>,
        ledger: BalanceLedger,
        config: &GameConfig,
    ) -> Self {
        let limits = BetLimits::from_config(config);
        let mut registry = Self::new();
        registry.register(InstantHandle::Mines(Arc::new(MinesEngine::new(
            store.clone(),
            ledger.clone(),
            limits,
        ))));
        registry.register(InstantHandle::Plinko(Arc::new(PlinkoEngine::new(
            store.clone(),
            ledger.clone(),
            limits,
        ))));
        registry.register(InstantHandle::Dice(Arc::new(DiceEngine::new(
            store, ledger, limits,
        ))));
        registry
    }

    pub fn register(&mut self, handle: InstantHandle) {
        self.engines.insert(handle.kind(), handle);
    }

    pub fn get(&self, kind: GameKind) -> Option<&InstantHandle> {
        self.engines.get(&kind)
    }

    pub fn mines(&self) -> Option<Arc<MinesEngine>> {
        match self.get(GameKind::Mines) {
            Some(InstantHandle::Mines(engine)) => Some(engine.clone()),
            _ => None,
        }
    }

    pub fn plinko(&self) -> Option<Arc<PlinkoEngine>> {
        match self.get(GameKind::Plinko) {
            Some(InstantHandle::Plinko(engine)) => Some(engine.clone()),
            _ => None,
        }
    }

    pub fn dice(&self) -> Option<Arc<DiceEngine>> {
        match self.get(GameKind::Dice) {
            Some(InstantHandle::Dice(engine)) => Some(engine.clone()),
            _ => None,
        }
    }

    pub fn start_all(&self) {
        for (kind, handle) in &self.engines {
            handle.start();
            info!("started {} engine", kind);
        }
    }

    pub fn stop_all(&self) {
        for (kind, handle) in &self.engines {
            handle.stop();
            info!("stopped {} engine", kind);
        }
    }
}
