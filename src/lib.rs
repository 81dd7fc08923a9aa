//! Liftoff - real-time crash game backend.
//!
//! An endless sequence of provably-fair rounds: a multiplier climbs from
//! 1.00x until a committed-then-revealed crash point, players bet during a
//! short window and race to cash out, and every connected client follows
//! along over WebSocket. Mines, Plinko, and Dice ride the same balance and
//! fairness primitives without a ticker.

pub mod api;
pub mod config;
pub mod errors;
pub mod fair;
pub mod games;
pub mod history;
pub mod hub;
pub mod ledger;
pub mod round;
pub mod store;

pub use config::{AppConfig, ConfigLoader};
pub use errors::{LiftoffError, LiftoffResult};
