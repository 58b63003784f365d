//! Durable store contracts for accounts and transactions.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Account, Transaction, TransactionStatus};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store is reachable in principle but the call failed transiently.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A row exists but cannot be mapped into the domain (e.g. a status
    /// string this build does not know).
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Account store. `update_balance` must be atomic per row; the worker's
/// idempotency argument leans on that guarantee.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get_by_account_number(
        &self,
        account_number: &str,
    ) -> RepositoryResult<Option<Account>>;

    async fn update_balance(&self, account: &Account) -> RepositoryResult<()>;
}

/// Transaction store, keyed by the globally unique transaction id.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn create(&self, transaction: &Transaction) -> RepositoryResult<()>;

    async fn get_by_transaction_id(
        &self,
        transaction_id: Uuid,
    ) -> RepositoryResult<Option<Transaction>>;

    async fn update_status(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> RepositoryResult<()>;
}
