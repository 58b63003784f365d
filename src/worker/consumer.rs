//! Top-up worker: the consumer side of the asynchronous pipeline.
//!
//! [`TopUpWorker::process`] is the state machine for a single delivery and
//! returns the disposition to settle it with; [`TopUpWorker::run`] is the
//! long-lived consume loop that applies those dispositions. Idempotency is
//! enforced against the transaction store, not the broker: the persisted
//! status is the sole cross-worker exclusion mechanism.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::TransactionStatus;
use crate::messaging::TopUpMessage;
use crate::ports::{
    AccountRepository, BrokerPort, BrokerResult, Disposition, TransactionRepository,
};

pub struct TopUpWorker {
    broker: Arc<dyn BrokerPort>,
    transactions: Arc<dyn TransactionRepository>,
    accounts: Arc<dyn AccountRepository>,
    queue: String,
}

impl TopUpWorker {
    pub fn new(
        broker: Arc<dyn BrokerPort>,
        transactions: Arc<dyn TransactionRepository>,
        accounts: Arc<dyn AccountRepository>,
        queue: String,
    ) -> Self {
        Self {
            broker,
            transactions,
            accounts,
            queue,
        }
    }

    /// Consume deliveries until the stream ends or `shutdown` fires. A
    /// delivery already in flight when the token fires is fully processed
    /// and settled before the loop returns; anything still unacknowledged
    /// returns to the queue when the channel closes.
    pub async fn run(&self, shutdown: CancellationToken) -> BrokerResult<()> {
        let mut deliveries = self.broker.consume(&self.queue).await?;
        tracing::info!(queue = %self.queue, "worker waiting for messages");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("worker shutdown requested, stopping");
                    break;
                }
                next = deliveries.next() => next,
            };

            match next {
                None => {
                    tracing::warn!("delivery stream closed, stopping");
                    break;
                }
                Some(Err(err)) => {
                    tracing::error!(%err, "delivery stream error, stopping");
                    break;
                }
                Some(Ok(message)) => {
                    let outcome = self.process(message.payload()).await;
                    if let Err(err) = message.settle(outcome).await {
                        tracing::error!(%err, ?outcome, "failed to settle delivery");
                    }
                }
            }
        }
        Ok(())
    }

    /// Decide the fate of one delivered payload.
    pub async fn process(&self, payload: &[u8]) -> Disposition {
        // 1. Malformed messages cannot self-heal; reject without requeue so
        // they dead-letter if configured.
        let message: TopUpMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, "discarding malformed top-up message");
                return Disposition::Reject;
            }
        };
        let transaction_id = message.transaction_id;

        // 2. Idempotency check. The producer writes the row before
        // publishing, so a missing row is a protocol violation.
        let transaction = match self.transactions.get_by_transaction_id(transaction_id).await {
            Ok(transaction) => transaction,
            Err(err) => {
                tracing::error!(%transaction_id, %err, "transaction lookup failed");
                return Disposition::Requeue;
            }
        };
        let Some(transaction) = transaction else {
            tracing::error!(
                %transaction_id,
                "no transaction row for delivery; rejecting"
            );
            return Disposition::Reject;
        };

        match transaction.status {
            TransactionStatus::Completed => {
                tracing::debug!(%transaction_id, "duplicate delivery, already applied");
                return Disposition::Ack;
            }
            TransactionStatus::Processing => {
                // Another delivery may be mid-flight, or a previous attempt
                // crashed after marking processing. Conservative retry.
                return Disposition::Requeue;
            }
            TransactionStatus::FailedMarshal
            | TransactionStatus::FailedPublish
            | TransactionStatus::FailedAccountNotFound => {
                tracing::warn!(
                    %transaction_id,
                    status = %transaction.status,
                    "delivery for terminally failed transaction"
                );
                return Disposition::Ack;
            }
            TransactionStatus::Pending
            | TransactionStatus::FailedAccountError
            | TransactionStatus::FailedUpdateBalance => {}
        }

        // 3. Signal single-writer intent. No balance mutation has happened
        // yet, so failing here is safe to retry.
        if let Err(err) = self
            .transactions
            .update_status(transaction_id, TransactionStatus::Processing)
            .await
        {
            tracing::warn!(%transaction_id, %err, "failed to mark processing");
            return Disposition::Requeue;
        }

        // 4. Load the account.
        let account = match self
            .accounts
            .get_by_account_number(&message.account_number)
            .await
        {
            Ok(account) => account,
            Err(err) => {
                tracing::error!(
                    %transaction_id,
                    account_number = %message.account_number,
                    %err,
                    "account lookup failed"
                );
                self.mark(transaction_id, TransactionStatus::FailedAccountError)
                    .await;
                return Disposition::Requeue;
            }
        };
        let Some(mut account) = account else {
            // Retrying cannot conjure a missing account: terminal.
            tracing::warn!(
                %transaction_id,
                account_number = %message.account_number,
                "account not found"
            );
            self.mark(transaction_id, TransactionStatus::FailedAccountNotFound)
                .await;
            return Disposition::Ack;
        };

        // 5. Apply the credit. On failure the write may or may not have
        // committed; requeue and let the status check on redelivery decide.
        account.credit(&message.amount);
        if let Err(err) = self.accounts.update_balance(&account).await {
            tracing::error!(%transaction_id, %err, "balance update failed");
            self.mark(transaction_id, TransactionStatus::FailedUpdateBalance)
                .await;
            return Disposition::Requeue;
        }

        // 6. Terminal success. If the status write fails the credit is
        // already applied and correct, so ack anyway; a redelivery would
        // observe `processing` and requeue until reconciled.
        if let Err(err) = self
            .transactions
            .update_status(transaction_id, TransactionStatus::Completed)
            .await
        {
            tracing::warn!(
                %transaction_id,
                %err,
                "credit applied but completion status write failed; acking"
            );
            return Disposition::Ack;
        }

        tracing::info!(
            %transaction_id,
            account_number = %message.account_number,
            amount = %message.amount,
            "top-up applied"
        );
        Disposition::Ack
    }

    async fn mark(&self, transaction_id: Uuid, status: TransactionStatus) {
        if let Err(err) = self.transactions.update_status(transaction_id, status).await {
            tracing::error!(%transaction_id, %status, %err, "failed to update transaction status");
        }
    }
}
