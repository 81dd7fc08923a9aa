//! Balance ledger over the external key-value store.
//!
//! Every balance mutation in the service goes through here, and every
//! mutation is a single store-side atomic float increment. Debit never
//! splits into read-check-write: the decrement lands first, and a negative
//! result is compensated with an equal credit. That keeps balances correct
//! even when several service instances share one store.

use crate::store::{keys, Store, StoreError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The user's balance cannot cover the debit. Carries the balance
    /// observed at rejection time for the response payload.
    #[error("insufficient balance")]
    Insufficient { balance: f64 },

    /// The store failed mid-debit; any partial decrement was compensated.
    #[error("transaction failed")]
    DebitFailed(#[source] StoreError),

    /// The store failed while crediting; the caller surfaces the failure
    /// without retrying.
    #[error("failed to credit balance")]
    CreditFailed(#[source] StoreError),
}

/// Atomic debit/credit primitives keyed by user id.
#[derive(Clone)]
pub struct BalanceLedger {
    store: Arc<dyn Store>,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Current balance, 0.0 when the user has no entry.
    pub async fn get(&self, user_id: &str) -> f64 {
        let key = keys::balance(user_id);
        match self.store.get(&key).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Overwrite a balance (admin/seeding path).
    pub async fn set(&self, user_id: &str, balance: f64) -> Result<(), StoreError> {
        self.store
            .set(&keys::balance(user_id), balance.to_string(), None)
            .await
    }

    /// Atomically remove `amount` from the user's balance and return the
    /// new balance.
    ///
    /// A cheap pre-read rejects obviously-short balances with the observed
    /// value; the decrement itself is the real guard, and a post-increment
    /// negative is rolled back with a compensating credit.
    pub async fn debit(&self, user_id: &str, amount: f64) -> Result<f64, LedgerError> {
        let key = keys::balance(user_id);

        let balance = self.get(user_id).await;
        if balance < amount {
            return Err(LedgerError::Insufficient { balance });
        }

        match self.store.incr_by_float(&key, -amount).await {
            Ok(new_balance) if new_balance >= 0.0 => Ok(new_balance),
            Ok(_) => {
                // Lost the race against a concurrent debit; undo ours.
                let _ = self.store.incr_by_float(&key, amount).await;
                Err(LedgerError::Insufficient { balance: 0.0 })
            }
            Err(e) => {
                let _ = self.store.incr_by_float(&key, amount).await;
                Err(LedgerError::DebitFailed(e))
            }
        }
    }

    /// Atomically add `amount` to the user's balance and return the new
    /// balance.
    pub async fn credit(&self, user_id: &str, amount: f64) -> Result<f64, LedgerError> {
        self.store
            .incr_by_float(&keys::balance(user_id), amount)
            .await
            .map_err(LedgerError::CreditFailed)
    }
}
