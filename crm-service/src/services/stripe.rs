//! Stripe payment provider client.
//!
//! Implements the Checkout Sessions and Payment Intents APIs used to collect
//! invoice payments, plus verification and parsing of webhook deliveries.

use crate::config::StripeConfig;
use crate::models::Invoice;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use service_core::utils::signature::{hmac_sha256_hex, verify_hmac_sha256_hex};
use std::collections::HashMap;
use std::time::Duration;

/// Everything the service asks of a payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession>;

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSession>;

    async fn create_payment_intent(&self, request: &PaymentIntentRequest) -> Result<PaymentIntent>;

    /// Most recent payment intents, newest first.
    async fn list_payment_intents(&self, limit: u32) -> Result<Vec<PaymentIntent>>;
}

/// One hosted-checkout line. Amounts are in the smallest currency unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub unit_amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub currency: String,
    pub line_items: Vec<CheckoutLineItem>,
    pub client_reference_id: String,
    pub customer_email: Option<String>,
    pub metadata: Vec<(String, String)>,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutSessionRequest {
    /// Build the checkout request for an invoice.
    ///
    /// Prices and quantities are truncated toward zero. A positive tax amount
    /// becomes its own line.
    pub fn for_invoice(
        invoice: &Invoice,
        customer_email: Option<String>,
        frontend_url: &str,
    ) -> Self {
        let mut line_items: Vec<CheckoutLineItem> = invoice
            .line_items
            .iter()
            .map(|item| CheckoutLineItem {
                name: item.description.clone(),
                unit_amount: to_minor_units(item.unit_price),
                quantity: item.quantity as i64,
            })
            .collect();

        if invoice.tax_amount > 0.0 {
            line_items.push(CheckoutLineItem {
                name: format!("Tax ({}%)", invoice.tax_rate),
                unit_amount: to_minor_units(invoice.tax_amount),
                quantity: 1,
            });
        }

        Self {
            currency: invoice.currency.to_lowercase(),
            line_items,
            client_reference_id: invoice.id.clone(),
            customer_email,
            metadata: invoice_metadata(invoice),
            success_url: format!(
                "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}&invoice_id={}",
                frontend_url, invoice.id
            ),
            cancel_url: format!("{}/payment/cancel?invoice_id={}", frontend_url, invoice.id),
        }
    }

    fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            (
                "client_reference_id".to_string(),
                self.client_reference_id.clone(),
            ),
        ];

        for (i, item) in self.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((
                format!("{}[price_data][currency]", prefix),
                self.currency.clone(),
            ));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount.to_string(),
            ));
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        if let Some(ref email) = self.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        push_metadata(&mut form, &self.metadata);

        form
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentRequest {
    /// Smallest currency unit.
    pub amount: i64,
    pub currency: String,
    pub metadata: Vec<(String, String)>,
}

impl PaymentIntentRequest {
    pub fn for_invoice(invoice: &Invoice) -> Self {
        Self {
            amount: to_minor_units(invoice.total),
            currency: invoice.currency.to_lowercase(),
            metadata: invoice_metadata(invoice),
        }
    }

    fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("amount".to_string(), self.amount.to_string()),
            ("currency".to_string(), self.currency.clone()),
        ];
        push_metadata(&mut form, &self.metadata);
        form
    }
}

/// Stripe Checkout Session object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Hosted payment page; absent once the session has expired.
    #[serde(default)]
    pub url: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`.
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// Invoice this session pays: the client reference first, then metadata.
    pub fn invoice_id(&self) -> Option<&str> {
        self.client_reference_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| self.metadata.get("invoice_id").map(String::as_str))
    }
}

/// Stripe Payment Intent object.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Stripe client for interacting with the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    /// Check if Stripe is configured (secret key is set).
    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn ensure_configured(&self) -> Result<()> {
        if !self.is_configured() {
            return Err(anyhow!("Stripe credentials not configured"));
        }
        Ok(())
    }

    async fn read_response<T: DeserializeOwned>(
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(operation, status = %status, "Stripe response");

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        let detail = serde_json::from_str::<StripeError>(&body)
            .map(|e| e.error)
            .unwrap_or(StripeErrorDetail {
                error_type: None,
                code: None,
                message: Some(body.clone()),
            });
        tracing::error!(
            operation,
            status = %status,
            error_type = ?detail.error_type,
            code = ?detail.code,
            "Stripe request failed"
        );
        Err(anyhow!(
            "Stripe error ({}): {}",
            status,
            detail.message.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        self.ensure_configured()?;

        let url = format!("{}/checkout/sessions", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .form(&request.to_form())
            .send()
            .await?;

        let session: CheckoutSession =
            Self::read_response("create_checkout_session", response).await?;
        tracing::info!(
            session_id = %session.id,
            invoice_id = %request.client_reference_id,
            "Stripe checkout session created"
        );
        Ok(session)
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSession> {
        self.ensure_configured()?;

        let url = format!("{}/checkout/sessions/{}", self.config.api_base_url, session_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await?;

        Self::read_response("retrieve_checkout_session", response).await
    }

    async fn create_payment_intent(&self, request: &PaymentIntentRequest) -> Result<PaymentIntent> {
        self.ensure_configured()?;

        let url = format!("{}/payment_intents", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .form(&request.to_form())
            .send()
            .await?;

        let intent: PaymentIntent = Self::read_response("create_payment_intent", response).await?;
        tracing::info!(
            payment_intent_id = %intent.id,
            amount = intent.amount,
            currency = %intent.currency,
            "Stripe payment intent created"
        );
        Ok(intent)
    }

    async fn list_payment_intents(&self, limit: u32) -> Result<Vec<PaymentIntent>> {
        self.ensure_configured()?;

        let url = format!("{}/payment_intents", self.config.api_base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .query(&[("limit", limit.clamp(1, 100))])
            .send()
            .await?;

        let list: ListResponse<PaymentIntent> =
            Self::read_response("list_payment_intents", response).await?;
        Ok(list.data)
    }
}

/// Convert a decimal amount to the smallest currency unit, truncating.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0) as i64
}

/// Convert the smallest currency unit back to a decimal amount.
pub fn from_minor_units(amount: i64) -> f64 {
    amount as f64 / 100.0
}

fn invoice_metadata(invoice: &Invoice) -> Vec<(String, String)> {
    vec![
        ("invoice_id".to_string(), invoice.id.clone()),
        ("invoice_number".to_string(), invoice.number.clone()),
    ]
}

fn push_metadata(form: &mut Vec<(String, String)>, metadata: &[(String, String)]) {
    for (key, value) in metadata {
        form.push((format!("metadata[{}]", key), value.clone()));
    }
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing Stripe-Signature header")]
    MissingHeader,
    #[error("Malformed Stripe-Signature header")]
    MalformedHeader,
    #[error("Signature timestamp outside the tolerance window")]
    TimestampOutOfTolerance,
    #[error("No signature matches the payload")]
    NoMatchingSignature,
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`).
///
/// The signed payload is `"<t>.<raw body>"`. Any matching `v1` entry is
/// accepted.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse().map_err(|_| SignatureError::MalformedHeader)?)
            }
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    if now.abs_diff(timestamp) > tolerance_seconds.max(0) as u64 {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let signed = signed_payload(timestamp, payload);
    let matched = signatures.iter().any(|signature| {
        verify_hmac_sha256_hex(secret, &signed, signature).unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::NoMatchingSignature)
    }
}

/// Build a `Stripe-Signature` header value for `payload`.
pub fn sign_webhook_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String> {
    let signature = hmac_sha256_hex(secret, &signed_payload(timestamp, payload))?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

fn signed_payload(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    signed
}

/// Stripe webhook event envelope.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// Event kinds the service acts on.
#[derive(Debug)]
pub enum WebhookPayload {
    PaymentIntentSucceeded(PaymentIntent),
    CheckoutSessionCompleted(CheckoutSession),
    Ignored,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn payload(&self) -> Result<WebhookPayload> {
        let payload = match self.event_type.as_str() {
            "payment_intent.succeeded" => WebhookPayload::PaymentIntentSucceeded(
                serde_json::from_value(self.data.object.clone())?,
            ),
            "checkout.session.completed" => WebhookPayload::CheckoutSessionCompleted(
                serde_json::from_value(self.data.object.clone())?,
            ),
            _ => WebhookPayload::Ignored,
        };
        Ok(payload)
    }
}
