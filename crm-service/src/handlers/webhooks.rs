//! Stripe webhook receiver.
//!
//! Unauthenticated; deliveries are trusted through the `Stripe-Signature`
//! header when a webhook secret is configured. Without one, every payload is
//! accepted as-is.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::services::metrics::record_webhook_event;
use crate::services::reconciliation::{PaymentReport, ReconcileOutcome};
use crate::services::stripe::{verify_webhook_signature, WebhookEvent, SIGNATURE_HEADER};
use crate::startup::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let stripe = &state.config.stripe;

    match stripe.webhook_secret {
        Some(ref secret) => {
            let signature = headers
                .get(SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    tracing::warn!("Missing Stripe-Signature header");
                    record_webhook_event("unknown", "rejected");
                    AppError::WebhookRejected(anyhow::anyhow!("Missing webhook signature"))
                })?;

            verify_webhook_signature(
                &body,
                signature,
                secret.expose_secret(),
                stripe.signature_tolerance_seconds,
                Utc::now().timestamp(),
            )
            .map_err(|e| {
                tracing::warn!(error = %e, "Invalid webhook signature");
                record_webhook_event("unknown", "rejected");
                AppError::WebhookRejected(anyhow::anyhow!("Invalid signature: {}", e))
            })?;
        }
        None => {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set - skipping signature verification");
        }
    }

    let event = WebhookEvent::parse(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        record_webhook_event("unknown", "rejected");
        AppError::WebhookRejected(anyhow::anyhow!("Invalid payload"))
    })?;

    let event_type = event.event_type.as_str();
    tracing::info!(event_type, event_id = ?event.id, "Processing Stripe webhook");

    let payload = event.payload().map_err(|e| {
        tracing::error!(error = %e, event_type, "Malformed event object");
        record_webhook_event(event_type, "rejected");
        AppError::WebhookRejected(anyhow::anyhow!("Invalid payload"))
    })?;

    let Some(report) = PaymentReport::from_webhook(&payload) else {
        tracing::info!(event_type, "No invoice to reconcile for event");
        record_webhook_event(event_type, "ignored");
        return Ok(Json(json!({ "status": "success" })));
    };

    match state.reconciler.reconcile(report).await {
        Ok(ReconcileOutcome::Reconciled { .. }) => {
            record_webhook_event(event_type, "reconciled");
        }
        Ok(ReconcileOutcome::AlreadyPaid { .. }) => {
            record_webhook_event(event_type, "already_paid");
        }
        // Acknowledged so the provider stops redelivering.
        Err(AppError::NotFound(e)) => {
            tracing::warn!(error = %e, event_type, "Webhook references unknown invoice");
            record_webhook_event(event_type, "unknown_invoice");
        }
        Err(e) => {
            tracing::error!(error = %e, event_type, "Webhook reconciliation failed");
            record_webhook_event(event_type, "failed");
            return Err(e);
        }
    }

    Ok(Json(json!({ "status": "success" })))
}
