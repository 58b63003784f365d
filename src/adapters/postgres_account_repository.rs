//! Postgres implementation of AccountRepository.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::Account;
use crate::ports::{AccountRepository, RepositoryError, RepositoryResult};

/// Postgres-backed account repository.
///
/// `update_balance` is a single-row UPDATE; Postgres takes a row-level lock
/// for the statement, which is the atomic-per-row guarantee the worker's
/// idempotency argument requires.
#[derive(Clone)]
pub struct PostgresAccountRepository {
    pool: PgPool,
}

impl PostgresAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn get_by_account_number(
        &self,
        account_number: &str,
    ) -> RepositoryResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, account_number, balance, currency, updated_at \
             FROM accounts WHERE account_number = $1",
        )
        .bind(account_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(AccountRow::into_domain))
    }

    async fn update_balance(&self, account: &Account) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET balance = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(&account.balance)
        .bind(account.updated_at)
        .bind(account.id)
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
struct AccountRow {
    id: uuid::Uuid,
    account_number: String,
    balance: bigdecimal::BigDecimal,
    currency: String,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl AccountRow {
    fn into_domain(self) -> Account {
        Account {
            id: self.id,
            account_number: self.account_number,
            balance: self.balance,
            currency: self.currency,
            updated_at: self.updated_at,
        }
    }
}
