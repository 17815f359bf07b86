//! Invoice operations: numbering, create/update with recomputed totals,
//! display enrichment and payment collection requests.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::dtos::{
    CreateInvoiceRequest, PaymentIntentResponse, PaymentLinkResponse, TransactionResponse,
    UpdateInvoiceRequest,
};
use crate::models::{Activity, Invoice, InvoiceStatus, Payment};
use crate::services::lifecycle::{ensure_payable, manual_status_change, paid_at_edit};
use crate::services::metrics::INVOICES_CREATED_TOTAL;
use crate::services::store::{InvoiceChanges, LedgerStore};
use crate::services::stripe::{CheckoutSessionRequest, PaymentIntentRequest, PaymentProvider};
use crate::services::totals::{compute_tax, compute_totals};

const FIRST_INVOICE_NUMBER: u64 = 1001;

/// Number following `previous` (`INV-<n>` becomes `INV-<n+1>`).
///
/// Starts at `INV-1001` when there is no previous number or its numeric part
/// cannot be read.
pub fn next_invoice_number(previous: Option<&str>) -> String {
    let next = previous
        .and_then(|number| number.split('-').nth(1))
        .and_then(|suffix| suffix.trim().parse::<u64>().ok())
        .and_then(|n| n.checked_add(1))
        .unwrap_or(FIRST_INVOICE_NUMBER);

    format!("INV-{}", next)
}

/// Translate a partial update into store changes.
///
/// New line items are recomputed from scratch with the new or stored tax
/// rate. A tax rate change alone is applied to the stored subtotal.
pub fn plan_update(
    existing: &Invoice,
    request: &UpdateInvoiceRequest,
    now: DateTime<Utc>,
) -> InvoiceChanges {
    let mut changes = InvoiceChanges::default();

    if let Some(ref items) = request.line_items {
        let tax_rate = request.tax_rate.unwrap_or(existing.tax_rate);
        let totals = compute_totals(items, tax_rate);
        changes.line_items = Some(totals.line_items);
        changes.subtotal = Some(totals.subtotal);
        changes.tax_rate = Some(tax_rate);
        changes.tax_amount = Some(totals.tax_amount);
        changes.total = Some(totals.total);
    } else if let Some(tax_rate) = request.tax_rate {
        let tax = compute_tax(existing.subtotal, tax_rate);
        changes.tax_rate = Some(tax_rate);
        changes.tax_amount = Some(tax.tax_amount);
        changes.total = Some(tax.total);
    }

    match request.status {
        Some(target) => {
            let change = manual_status_change(existing, target, request.paid_at, now);
            changes.status = Some(change.status);
            changes.paid_at = change.paid_at;
        }
        None => changes.paid_at = paid_at_edit(existing, request.paid_at),
    }

    changes.stripe_payment_intent_id = request.stripe_payment_intent_id.clone();

    changes
}

fn invoice_not_found() -> AppError {
    AppError::NotFound(anyhow::anyhow!("Invoice not found"))
}

pub struct InvoiceService {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn PaymentProvider>,
    frontend_url: String,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn PaymentProvider>,
        frontend_url: String,
    ) -> Self {
        Self {
            store,
            provider,
            frontend_url,
        }
    }

    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn create(
        &self,
        request: CreateInvoiceRequest,
        actor: &str,
    ) -> Result<Invoice, AppError> {
        let previous = self.store.latest_invoice_number().await?;
        let number = next_invoice_number(previous.as_deref());

        let totals = compute_totals(&request.line_items, request.tax_rate);
        let now = Utc::now();

        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            number,
            client_id: request.client_id,
            client_name: None,
            project_id: request.project_id,
            project_title: None,
            line_items: totals.line_items,
            subtotal: totals.subtotal,
            tax_rate: request.tax_rate,
            tax_amount: totals.tax_amount,
            total: totals.total,
            currency: request.currency.to_lowercase(),
            status: InvoiceStatus::Pending,
            due_date: request.due_date,
            issued_date: now,
            paid_at: None,
            stripe_payment_intent_id: None,
            stripe_checkout_session_id: None,
            payment_link: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_invoice(&invoice).await?;
        INVOICES_CREATED_TOTAL.inc();

        let activity = Activity::new(
            "invoice_created",
            "invoice",
            &invoice.id,
            format!(
                "Invoice {} created (Total: {:.2} {})",
                invoice.number,
                invoice.total,
                invoice.currency.to_uppercase()
            ),
            actor,
        );
        self.store.insert_activity(&activity).await?;

        tracing::info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.number,
            total = invoice.total,
            "Invoice created"
        );

        Ok(self.enrich(invoice).await)
    }

    pub async fn get(&self, id: &str) -> Result<Invoice, AppError> {
        let invoice = self
            .store
            .get_invoice(id)
            .await?
            .ok_or_else(invoice_not_found)?;
        Ok(self.enrich(invoice).await)
    }

    pub async fn list(&self) -> Result<Vec<Invoice>, AppError> {
        let invoices = self.store.list_invoices().await?;
        let mut enriched = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            enriched.push(self.enrich(invoice).await);
        }
        Ok(enriched)
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: &str,
        request: UpdateInvoiceRequest,
    ) -> Result<Invoice, AppError> {
        let existing = self
            .store
            .get_invoice(id)
            .await?
            .ok_or_else(invoice_not_found)?;

        let changes = plan_update(&existing, &request, Utc::now());
        if changes.is_empty() {
            return Ok(self.enrich(existing).await);
        }

        let updated = self
            .store
            .update_invoice(id, &changes)
            .await?
            .ok_or_else(invoice_not_found)?;

        tracing::info!(invoice_id = %id, status = %updated.status, "Invoice updated");

        Ok(self.enrich(updated).await)
    }

    /// Activity entries referencing the invoice are kept.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        if !self.store.delete_invoice(id).await? {
            return Err(invoice_not_found());
        }
        tracing::info!(invoice_id = %id, "Invoice deleted");
        Ok(())
    }

    /// Create a hosted checkout session and store its link on the invoice.
    #[instrument(skip(self))]
    pub async fn create_payment_link(&self, id: &str) -> Result<PaymentLinkResponse, AppError> {
        let invoice = self
            .store
            .get_invoice(id)
            .await?
            .ok_or_else(invoice_not_found)?;

        ensure_payable(&invoice)?;

        let customer_email = match self.store.get_client(&invoice.client_id).await {
            Ok(client) => client.and_then(|c| c.email),
            Err(e) => {
                tracing::warn!(error = %e, client_id = %invoice.client_id, "Client lookup failed");
                None
            }
        };

        let request =
            CheckoutSessionRequest::for_invoice(&invoice, customer_email, &self.frontend_url);
        let session = self
            .provider
            .create_checkout_session(&request)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, invoice_id = %id, "Failed to create checkout session");
                AppError::ProviderError(anyhow::anyhow!("Failed to create payment link: {}", e))
            })?;

        let payment_link = session.url.clone().ok_or_else(|| {
            AppError::ProviderError(anyhow::anyhow!("Checkout session has no payment URL"))
        })?;

        let changes = InvoiceChanges {
            payment_link: Some(payment_link.clone()),
            stripe_checkout_session_id: Some(session.id.clone()),
            ..Default::default()
        };
        self.store
            .update_invoice(id, &changes)
            .await?
            .ok_or_else(invoice_not_found)?;

        tracing::info!(invoice_id = %id, session_id = %session.id, "Payment link created");

        Ok(PaymentLinkResponse {
            payment_link,
            checkout_session_id: session.id,
        })
    }

    /// Create a provider payment intent for the invoice total.
    #[instrument(skip(self))]
    pub async fn create_payment_intent(
        &self,
        invoice_id: &str,
    ) -> Result<PaymentIntentResponse, AppError> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(invoice_not_found)?;

        ensure_payable(&invoice)?;

        let intent = self
            .provider
            .create_payment_intent(&PaymentIntentRequest::for_invoice(&invoice))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, invoice_id, "Failed to create payment intent");
                AppError::ProviderError(anyhow::anyhow!("Failed to create payment intent: {}", e))
            })?;

        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            AppError::ProviderError(anyhow::anyhow!("Payment intent has no client secret"))
        })?;

        let changes = InvoiceChanges {
            stripe_payment_intent_id: Some(intent.id.clone()),
            ..Default::default()
        };
        self.store
            .update_invoice(invoice_id, &changes)
            .await?
            .ok_or_else(invoice_not_found)?;

        Ok(PaymentIntentResponse {
            client_secret,
            payment_intent_id: intent.id,
        })
    }

    /// Read-only view of the provider's recent payment intents.
    pub async fn list_transactions(
        &self,
        limit: i64,
    ) -> Result<Vec<TransactionResponse>, AppError> {
        let intents = self
            .provider
            .list_payment_intents(limit.clamp(1, 100) as u32)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to list payment intents");
                AppError::ProviderError(anyhow::anyhow!("Failed to fetch transactions: {}", e))
            })?;

        Ok(intents.into_iter().map(TransactionResponse::from).collect())
    }

    pub async fn list_payments(&self) -> Result<Vec<Payment>, AppError> {
        let mut payments = self.store.list_payments().await?;
        for payment in payments.iter_mut() {
            payment.client_name = self.client_name(&payment.client_id).await;
        }
        Ok(payments)
    }

    /// Fill display names. Missing or failing lookups leave them unset.
    async fn enrich(&self, mut invoice: Invoice) -> Invoice {
        invoice.client_name = self.client_name(&invoice.client_id).await;

        if let Some(ref project_id) = invoice.project_id {
            invoice.project_title = match self.store.get_project(project_id).await {
                Ok(project) => project.map(|p| p.title),
                Err(e) => {
                    tracing::warn!(error = %e, project_id = %project_id, "Project lookup failed");
                    None
                }
            };
        }

        invoice
    }

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
