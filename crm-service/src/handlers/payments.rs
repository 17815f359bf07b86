//! Payment records and provider-side payment endpoints.

use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    CreatePaymentIntentRequest, LimitQuery, PaymentIntentResponse, TransactionResponse,
};
use crate::middleware::CurrentUser;
use crate::models::Payment;
use crate::startup::AppState;

const DEFAULT_TRANSACTION_LIMIT: i64 = 50;

pub async fn list_payments(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(state.invoices.list_payments().await?))
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(payload): Json<CreatePaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    payload.validate()?;
    Ok(Json(
        state
            .invoices
            .create_payment_intent(&payload.invoice_id)
            .await?,
    ))
}

/// Raw provider transaction history. Never changes local state.
pub async fn list_transactions(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTION_LIMIT);
    Ok(Json(state.invoices.list_transactions(limit).await?))
}
