//! HTTP binding for the top-up initiator.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::TransactionStatus;
use crate::error::AppError;
use crate::use_cases::{TopUpInput, TopUpOutput};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpRequest {
    pub account_number: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpResponse {
    pub transaction_id: Uuid,
    pub account_number: String,
    pub amount: BigDecimal,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
}

impl From<TopUpOutput> for TopUpResponse {
    fn from(output: TopUpOutput) -> Self {
        Self {
            transaction_id: output.transaction_id,
            account_number: output.account_number,
            amount: output.amount,
            balance_before: output.balance_before,
            balance_after: output.balance_after,
            currency: output.currency,
            status: output.status,
        }
    }
}

pub async fn create_topup(
    State(state): State<AppState>,
    Json(request): Json<TopUpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let output = state
        .create_topup
        .execute(TopUpInput {
            account_number: request.account_number,
            amount: request.amount,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(TopUpResponse::from(output))))
}
