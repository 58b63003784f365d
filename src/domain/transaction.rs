//! Transaction domain entity and its status state machine.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of ledger movement. Only `TopUp` is produced by this service; the
/// other kinds exist in the schema for forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    #[serde(rename = "topup")]
    TopUp,
    Transfer,
    Payment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::TopUp => "topup",
            TransactionType::Transfer => "transfer",
            TransactionType::Payment => "payment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "topup" => Some(TransactionType::TopUp),
            "transfer" => Some(TransactionType::Transfer),
            "payment" => Some(TransactionType::Payment),
            _ => None,
        }
    }
}

/// Lifecycle status of a transaction.
///
/// Transitions are monotonic: `pending -> processing -> completed | failed_*`.
/// The status row doubles as the cross-worker exclusion token, so the worker
/// is its sole writer after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    /// Terminal success. Older rows may carry the legacy string `success`,
    /// which parses to this variant.
    #[serde(alias = "success")]
    Completed,
    FailedMarshal,
    FailedPublish,
    FailedAccountError,
    FailedAccountNotFound,
    FailedUpdateBalance,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::FailedMarshal => "failed_marshal",
            TransactionStatus::FailedPublish => "failed_publish",
            TransactionStatus::FailedAccountError => "failed_account_error",
            TransactionStatus::FailedAccountNotFound => "failed_account_not_found",
            TransactionStatus::FailedUpdateBalance => "failed_update_balance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "processing" => Some(TransactionStatus::Processing),
            "completed" | "success" => Some(TransactionStatus::Completed),
            "failed_marshal" => Some(TransactionStatus::FailedMarshal),
            "failed_publish" => Some(TransactionStatus::FailedPublish),
            "failed_account_error" => Some(TransactionStatus::FailedAccountError),
            "failed_account_not_found" => Some(TransactionStatus::FailedAccountNotFound),
            "failed_update_balance" => Some(TransactionStatus::FailedUpdateBalance),
            _ => None,
        }
    }

    /// No further transition is expected from this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            TransactionStatus::Pending | TransactionStatus::Processing
        )
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, TransactionStatus::Completed)
    }

    /// Terminal failure that a redelivered message may still repair. The
    /// requeue-then-retry path depends on the worker treating these like
    /// `pending` on the next delivery.
    pub fn is_retryable_failure(&self) -> bool {
        matches!(
            self,
            TransactionStatus::FailedAccountError | TransactionStatus::FailedUpdateBalance
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain entity representing a single top-up attempt. Rows are never
/// deleted; the table is an audit trail with in-place status updates.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub tx_type: TransactionType,
    pub account_number: String,
    pub amount: BigDecimal,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a pending top-up transaction with a fresh identifier.
    pub fn top_up(account_number: String, amount: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: Uuid::new_v4(),
            tx_type: TransactionType::TopUp,
            account_number,
            amount,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
