//! Invoice endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    CreateInvoiceRequest, MessageResponse, PaymentLinkResponse, UpdateInvoiceRequest,
    VerifyPaymentQuery, VerifyPaymentResponse,
};
use crate::middleware::CurrentUser;
use crate::models::{Invoice, InvoiceStatus};
use crate::services::reconciliation::VerificationOutcome;
use crate::startup::AppState;

pub async fn list_invoices(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<Vec<Invoice>>, AppError> {
    Ok(Json(state.invoices.list().await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, AppError> {
    Ok(Json(state.invoices.get(&id).await?))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    payload.validate()?;

    let invoice = state.invoices.create(payload, &user.name).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateInvoiceRequest>,
) -> Result<Json<Invoice>, AppError> {
    Ok(Json(state.invoices.update(&id, payload).await?))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.invoices.delete(&id).await?;
    Ok(Json(MessageResponse {
        message: "Invoice deleted successfully".to_string(),
    }))
}

pub async fn create_payment_link(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<PaymentLinkResponse>, AppError> {
    Ok(Json(state.invoices.create_payment_link(&id).await?))
}

/// Invoice as shown on the unauthenticated payment page.
pub async fn get_public_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, AppError> {
    Ok(Json(state.invoices.get(&id).await?))
}

/// Confirm a checkout session from the payment success page.
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VerifyPaymentQuery>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    let outcome = state
        .reconciler
        .verify_payment(state.provider.as_ref(), &id, query.session_id.as_deref())
        .await?;

    let (status, message) = match outcome {
        VerificationOutcome::AlreadyPaid => (InvoiceStatus::Paid, "Invoice already paid"),
        VerificationOutcome::Reconciled => {
            (InvoiceStatus::Paid, "Payment verified and invoice updated")
        }
        VerificationOutcome::NoSession(status) => (status, "No payment verification available"),
        VerificationOutcome::NotPaid(status) => (status, "Payment not completed yet"),
    };

    Ok(Json(VerifyPaymentResponse {
        status,
        message: message.to_string(),
    }))
}
