//! Account domain entity.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A customer account holding a single-currency balance.
///
/// Balance is only ever mutated by the top-up worker; the initiator reads it
/// to report `balance_before`/`balance_after` but never writes it.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub account_number: String,
    pub balance: BigDecimal,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Apply a credit and stamp the mutation time.
    pub fn credit(&mut self, amount: &BigDecimal) {
        self.balance = &self.balance + amount;
        self.updated_at = Utc::now();
    }
}
