//! Postgres implementation of TransactionRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus, TransactionType};
use crate::ports::{RepositoryError, RepositoryResult, TransactionRepository};

/// Postgres-backed transaction repository.
#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn create(&self, transaction: &Transaction) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO transactions \
             (transaction_id, tx_type, account_number, amount, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(transaction.transaction_id)
        .bind(transaction.tx_type.as_str())
        .bind(&transaction.account_number)
        .bind(&transaction.amount)
        .bind(transaction.status.as_str())
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn get_by_transaction_id(
        &self,
        transaction_id: Uuid,
    ) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT transaction_id, tx_type, account_number, amount, status, \
             created_at, updated_at \
             FROM transactions WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn update_status(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET status = $2, updated_at = $3 WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    transaction_id: Uuid,
    tx_type: String,
    account_number: String,
    amount: bigdecimal::BigDecimal,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        let status = TransactionStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "transaction {} has unknown status {:?}",
                self.transaction_id, self.status
            ))
        })?;
        let tx_type = TransactionType::parse(&self.tx_type).ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "transaction {} has unknown type {:?}",
                self.transaction_id, self.tx_type
            ))
        })?;

        Ok(Transaction {
            transaction_id: self.transaction_id,
            tx_type,
            account_number: self.account_number,
            amount: self.amount,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
