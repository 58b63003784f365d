//! Create top-up use case: the producer side of the asynchronous pipeline.
//!
//! Validates the request, durably records a pending transaction, then
//! publishes the work item. The pending row is written before the publish so
//! the worker's idempotency check always finds a row for any message it
//! receives. Crediting is deferred entirely to the worker.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus};
use crate::messaging::TopUpMessage;
use crate::ports::{AccountRepository, BrokerError, BrokerPort, RepositoryError, TransactionRepository};

#[derive(Debug, Error)]
pub enum TopUpError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to encode top-up message: {0}")]
    Marshal(#[from] serde_json::Error),

    #[error("failed to publish top-up message: {0}")]
    Publish(#[from] BrokerError),
}

#[derive(Debug)]
pub struct TopUpInput {
    pub account_number: String,
    pub amount: BigDecimal,
}

/// Accepted-response data. Balances are reported as-is: the credit has not
/// been applied yet, so `balance_before == balance_after`.
#[derive(Debug)]
pub struct TopUpOutput {
    pub transaction_id: Uuid,
    pub account_number: String,
    pub amount: BigDecimal,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
}

pub struct CreateTopUp {
    accounts: Arc<dyn AccountRepository>,
    transactions: Arc<dyn TransactionRepository>,
    broker: Arc<dyn BrokerPort>,
    routing_key: String,
}

impl CreateTopUp {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        transactions: Arc<dyn TransactionRepository>,
        broker: Arc<dyn BrokerPort>,
        routing_key: String,
    ) -> Self {
        Self {
            accounts,
            transactions,
            broker,
            routing_key,
        }
    }

    pub async fn execute(&self, input: TopUpInput) -> Result<TopUpOutput, TopUpError> {
        if input.account_number.is_empty() {
            return Err(TopUpError::Validation(
                "account number is required".to_string(),
            ));
        }
        if input.amount <= BigDecimal::from(0) {
            return Err(TopUpError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }

        let account = self
            .accounts
            .get_by_account_number(&input.account_number)
            .await?
            .ok_or_else(|| TopUpError::AccountNotFound(input.account_number.clone()))?;

        let transaction = Transaction::top_up(input.account_number.clone(), input.amount.clone());
        self.transactions.create(&transaction).await?;

        let message = TopUpMessage {
            transaction_id: transaction.transaction_id,
            account_number: transaction.account_number.clone(),
            amount: transaction.amount.clone(),
            currency: account.currency.clone(),
            created_at: Utc::now(),
        };
        let body = match serde_json::to_vec(&message) {
            Ok(body) => body,
            Err(err) => {
                self.mark_failed(transaction.transaction_id, TransactionStatus::FailedMarshal)
                    .await;
                return Err(err.into());
            }
        };

        // No message entered the queue on a publish failure, so the caller
        // can safely retry the whole request.
        if let Err(err) = self.broker.publish(&self.routing_key, &body).await {
            self.mark_failed(transaction.transaction_id, TransactionStatus::FailedPublish)
                .await;
            return Err(err.into());
        }

        tracing::info!(
            transaction_id = %transaction.transaction_id,
            account_number = %transaction.account_number,
            amount = %transaction.amount,
            "top-up accepted"
        );

        Ok(TopUpOutput {
            transaction_id: transaction.transaction_id,
            account_number: transaction.account_number,
            amount: transaction.amount,
            balance_before: account.balance.clone(),
            balance_after: account.balance,
            currency: account.currency,
            status: TransactionStatus::Pending,
        })
    }

    async fn mark_failed(&self, transaction_id: Uuid, status: TransactionStatus) {
        if let Err(err) = self.transactions.update_status(transaction_id, status).await {
            tracing::error!(
                transaction_id = %transaction_id,
                %status,
                %err,
                "failed to record publish-path failure status"
            );
        }
    }
}
