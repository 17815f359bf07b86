use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::InvoiceStatus;
use crate::services::stripe::{from_minor_units, PaymentIntent};
use crate::services::totals::LineItemInput;

fn default_currency() -> String {
    "eur".to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    #[validate(length(min = 1, message = "client_id must not be empty"))]
    pub client_id: String,
    pub project_id: Option<String>,
    pub line_items: Vec<LineItemInput>,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,
    pub due_date: DateTime<Utc>,
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateInvoiceRequest {
    pub line_items: Option<Vec<LineItemInput>>,
    pub tax_rate: Option<f64>,
    pub status: Option<InvoiceStatus>,
    pub paid_at: Option<DateTime<Utc>>,
    pub stripe_payment_intent_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentLinkResponse {
    pub payment_link: String,
    pub checkout_session_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentIntentRequest {
    #[validate(length(min = 1, message = "invoice_id must not be empty"))]
    pub invoice_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyPaymentResponse {
    pub status: InvoiceStatus,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// One provider payment intent as shown in the transaction listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub created: Option<DateTime<Utc>>,
    pub invoice_id: Option<String>,
    pub invoice_number: Option<String>,
}

impl From<PaymentIntent> for TransactionResponse {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            amount: from_minor_units(intent.amount),
            created: DateTime::from_timestamp(intent.created, 0),
            invoice_id: intent.metadata.get("invoice_id").cloned(),
            invoice_number: intent.metadata.get("invoice_number").cloned(),
            id: intent.id,
            currency: intent.currency,
            status: intent.status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}
