//! Payment reconciliation.
//!
//! Webhook deliveries and client-triggered verification both reduce to a
//! [`PaymentReport`], and [`Reconciler::reconcile`] is the single place that
//! moves an invoice to paid. The transition is the store's conditional
//! mark-paid, so however many reports arrive for one invoice, concurrently or
//! not, exactly one of them records a payment, an activity entry and a
//! notification.

use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Activity, Invoice, InvoiceStatus, Payment, PaymentStatus};
use crate::services::lifecycle::{reconcile_decision, ReconcileDecision};
use crate::services::metrics::record_reconciliation;
use crate::services::notifier::NotificationHub;
use crate::services::store::LedgerStore;
use crate::services::stripe::{
    from_minor_units, CheckoutSession, PaymentIntent, PaymentProvider, WebhookPayload,
};

/// Where a payment signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentSource {
    PaymentIntentWebhook,
    CheckoutWebhook,
    Verification,
}

impl PaymentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSource::PaymentIntentWebhook => "payment_intent_webhook",
            PaymentSource::CheckoutWebhook => "checkout_webhook",
            PaymentSource::Verification => "verification",
        }
    }
}

/// A successful payment for one invoice, as reported by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReport {
    pub invoice_id: String,
    pub amount: f64,
    pub currency: String,
    /// Provider payment intent id, when the signal carries one.
    pub external_ref: Option<String>,
    pub source: PaymentSource,
}

impl PaymentReport {
    /// `payment_intent.succeeded`: amount and currency come from the intent.
    pub fn from_payment_intent(intent: &PaymentIntent) -> Option<Self> {
        let invoice_id = intent.metadata.get("invoice_id")?.clone();
        Some(Self {
            invoice_id,
            amount: from_minor_units(intent.amount),
            currency: intent.currency.clone(),
            external_ref: Some(intent.id.clone()),
            source: PaymentSource::PaymentIntentWebhook,
        })
    }

    /// `checkout.session.completed`: the invoice is the session's client
    /// reference, falling back to its metadata.
    pub fn from_completed_session(session: &CheckoutSession) -> Option<Self> {
        let invoice_id = session.invoice_id()?.to_string();
        Some(Self {
            invoice_id,
            amount: from_minor_units(session.amount_total.unwrap_or_default()),
            currency: session.currency.clone().unwrap_or_default(),
            external_ref: session.payment_intent.clone(),
            source: PaymentSource::CheckoutWebhook,
        })
    }

    /// A paid session found while verifying `invoice`.
    pub fn from_verified_session(invoice: &Invoice, session: &CheckoutSession) -> Self {
        Self {
            invoice_id: invoice.id.clone(),
            amount: session
                .amount_total
                .map(from_minor_units)
                .unwrap_or(invoice.total),
            currency: session
                .currency
                .clone()
                .unwrap_or_else(|| invoice.currency.clone()),
            external_ref: session.payment_intent.clone(),
            source: PaymentSource::Verification,
        }
    }

    /// Report carried by a webhook payload, if the event is one we act on and
    /// names an invoice.
    pub fn from_webhook(payload: &WebhookPayload) -> Option<Self> {
        match payload {
            WebhookPayload::PaymentIntentSucceeded(intent) => Self::from_payment_intent(intent),
            WebhookPayload::CheckoutSessionCompleted(session) => {
                Self::from_completed_session(session)
            }
            WebhookPayload::Ignored => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// This call moved the invoice to paid.
    Reconciled { invoice: Invoice, payment: Payment },
    /// Already paid; nothing was written.
    AlreadyPaid { invoice: Invoice },
}

impl ReconcileOutcome {
    pub fn invoice(&self) -> &Invoice {
        match self {
            ReconcileOutcome::Reconciled { invoice, .. } => invoice,
            ReconcileOutcome::AlreadyPaid { invoice } => invoice,
        }
    }
}

/// Result of a client verification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    AlreadyPaid,
    /// Payment confirmed with the provider and recorded now.
    Reconciled,
    /// No session to check; current status returned unchanged.
    NoSession(InvoiceStatus),
    /// The provider does not report the session as paid yet.
    NotPaid(InvoiceStatus),
}

pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<NotificationHub>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<NotificationHub>) -> Self {
        Self { store, notifier }
    }

    #[tracing::instrument(
        skip(self, report),
        fields(invoice_id = %report.invoice_id, source = report.source.as_str())
    )]
    pub async fn reconcile(&self, report: PaymentReport) -> Result<ReconcileOutcome, AppError> {
        let source = report.source.as_str();

        let Some(invoice) = self.store.get_invoice(&report.invoice_id).await? else {
            record_reconciliation(source, "not_found");
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                report.invoice_id
            )));
        };

        if reconcile_decision(invoice.status) == ReconcileDecision::AlreadyPaid {
            record_reconciliation(source, "already_paid");
            tracing::info!(
                invoice_number = %invoice.number,
                "Invoice already paid, nothing to do"
            );
            return Ok(ReconcileOutcome::AlreadyPaid { invoice });
        }

        let now = Utc::now();
        let Some(invoice) = self
            .store
            .mark_invoice_paid(&report.invoice_id, now, report.external_ref.as_deref())
            .await?
        else {
            // Another report won the race, or the invoice was deleted meanwhile.
            return match self.store.get_invoice(&report.invoice_id).await? {
                Some(invoice) => {
                    record_reconciliation(source, "already_paid");
                    tracing::info!(
                        invoice_number = %invoice.number,
                        "Concurrent reconciliation already applied"
                    );
                    Ok(ReconcileOutcome::AlreadyPaid { invoice })
                }
                None => {
                    record_reconciliation(source, "not_found");
                    Err(AppError::NotFound(anyhow::anyhow!(
                        "Invoice {} not found",
                        report.invoice_id
                    )))
                }
            };
        };

        let client_name = self.client_name(&invoice.client_id).await;

        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            invoice_id: Some(invoice.id.clone()),
            client_id: invoice.client_id.clone(),
            client_name: None,
            amount: report.amount,
            currency: report.currency.clone(),
            status: PaymentStatus::Succeeded,
            stripe_charge_id: match report.source {
                PaymentSource::CheckoutWebhook => report.external_ref.clone(),
                _ => None,
            },
            stripe_payment_intent_id: report.external_ref.clone(),
            created_at: now,
        };
        self.store.insert_payment(&payment).await?;

        let activity = paid_activity(&invoice, &report, client_name.as_deref());
        self.store.insert_activity(&activity).await?;

        self.notifier.broadcast(
            "invoice_paid",
            json!({
                "invoice_id": invoice.id,
                "invoice_number": invoice.number,
                "amount": report.amount,
                "client_name": client_name.as_deref().unwrap_or("Unknown Client"),
            }),
        );

        record_reconciliation(source, "reconciled");
        tracing::info!(
            invoice_number = %invoice.number,
            payment_id = %payment.id,
            payment_status = %payment.status,
            amount = report.amount,
            "Invoice marked paid"
        );

        Ok(ReconcileOutcome::Reconciled { invoice, payment })
    }

    /// Client-triggered check of a checkout session.
    ///
    /// Without a session id this only reports the current status. Provider
    /// failures surface as `ProviderError`, distinct from "not paid yet".
    #[tracing::instrument(skip(self, provider))]
    pub async fn verify_payment(
        &self,
        provider: &dyn PaymentProvider,
        invoice_id: &str,
        session_id: Option<&str>,
    ) -> Result<VerificationOutcome, AppError> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if invoice.is_paid() {
            return Ok(VerificationOutcome::AlreadyPaid);
        }

        let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
            return Ok(VerificationOutcome::NoSession(invoice.status));
        };

        let session = provider
            .retrieve_checkout_session(session_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, session_id, "Stripe session lookup failed");
                AppError::ProviderError(anyhow::anyhow!("Failed to verify payment with Stripe"))
            })?;

        if let Some(owner) = session.invoice_id() {
            if owner != invoice.id {
                tracing::warn!(session_id, owner, "Session belongs to a different invoice");
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Checkout session does not belong to this invoice"
                )));
            }
        }

        if !session.is_paid() {
            return Ok(VerificationOutcome::NotPaid(invoice.status));
        }

        let report = PaymentReport::from_verified_session(&invoice, &session);
        match self.reconcile(report).await? {
            ReconcileOutcome::Reconciled { .. } => Ok(VerificationOutcome::Reconciled),
            ReconcileOutcome::AlreadyPaid { .. } => Ok(VerificationOutcome::AlreadyPaid),
        }
    }

    /// Display lookup; failures degrade to `None`.
    async fn client_name(&self, client_id: &str) -> Option<String> {
        match self.store.get_client(client_id).await {
            Ok(client) => client.map(|c| c.name),
            Err(e) => {
                tracing::warn!(error = %e, client_id, "Client lookup failed");
                None
            }
        }
    }
}

fn paid_activity(
    invoice: &Invoice,
    report: &PaymentReport,
    client_name: Option<&str>,
) -> Activity {
    let amount = format!("{:.2} {}", report.amount, report.currency.to_uppercase());
    let payer = client_name.unwrap_or("Unknown Client");

    let (message, actor) = match report.source {
        PaymentSource::PaymentIntentWebhook => (
            format!("Invoice {} paid by {} - {}", invoice.number, payer, amount),
            "Stripe Webhook",
        ),
        PaymentSource::CheckoutWebhook => (
            format!(
                "Invoice {} paid by {} via Stripe Checkout - {}",
                invoice.number, payer, amount
            ),
            "Stripe Checkout",
        ),
        PaymentSource::Verification => (
            format!("Invoice {} paid via Stripe Checkout - {}", invoice.number, amount),
            client_name.unwrap_or("Client"),
        ),
    };

    Activity::new("invoice_paid", "invoice", &invoice.id, message, actor)
}
