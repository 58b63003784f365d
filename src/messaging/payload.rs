//! Wire format of the top-up work item.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON payload published by the initiator and consumed by the worker.
///
/// Produced exactly once per accepted request; delivered one-or-more times.
/// Applying it at most once is the worker's job, not the broker's.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpMessage {
    pub transaction_id: Uuid,
    pub account_number: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}
