//! Ledger entity store abstraction.
//!
//! Invoices, payments, activity, clients and projects live in independent
//! collections keyed by string identifiers. References between them are
//! advisory: nothing here enforces that a referenced client still exists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;

use crate::models::{Activity, Client, Invoice, InvoiceStatus, LineItem, Payment, Project};

/// Upper bound on list queries.
pub const LIST_LIMIT: i64 = 1000;

/// Field-level update of an invoice. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoiceChanges {
    pub line_items: Option<Vec<LineItem>>,
    pub subtotal: Option<f64>,
    pub tax_rate: Option<f64>,
    pub tax_amount: Option<f64>,
    pub total: Option<f64>,
    pub status: Option<InvoiceStatus>,
    pub paid_at: Option<DateTime<Utc>>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub payment_link: Option<String>,
}

impl InvoiceChanges {
    pub fn is_empty(&self) -> bool {
        *self == InvoiceChanges::default()
    }

    /// Apply to an in-memory copy, bumping `updated_at`.
    pub fn apply_to(&self, invoice: &mut Invoice, now: DateTime<Utc>) {
        if let Some(ref line_items) = self.line_items {
            invoice.line_items = line_items.clone();
        }
        if let Some(subtotal) = self.subtotal {
            invoice.subtotal = subtotal;
        }
        if let Some(tax_rate) = self.tax_rate {
            invoice.tax_rate = tax_rate;
        }
        if let Some(tax_amount) = self.tax_amount {
            invoice.tax_amount = tax_amount;
        }
        if let Some(total) = self.total {
            invoice.total = total;
        }
        if let Some(status) = self.status {
            invoice.status = status;
        }
        if let Some(paid_at) = self.paid_at {
            invoice.paid_at = Some(paid_at);
        }
        if let Some(ref intent) = self.stripe_payment_intent_id {
            invoice.stripe_payment_intent_id = Some(intent.clone());
        }
        if let Some(ref session) = self.stripe_checkout_session_id {
            invoice.stripe_checkout_session_id = Some(session.clone());
        }
        if let Some(ref link) = self.payment_link {
            invoice.payment_link = Some(link.clone());
        }
        invoice.updated_at = now;
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), AppError>;

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, AppError>;

    /// Newest first.
    async fn list_invoices(&self) -> Result<Vec<Invoice>, AppError>;

    /// Number of the most recently created invoice.
    async fn latest_invoice_number(&self) -> Result<Option<String>, AppError>;

    /// Returns the updated invoice, or `None` if it does not exist.
    async fn update_invoice(
        &self,
        id: &str,
        changes: &InvoiceChanges,
    ) -> Result<Option<Invoice>, AppError>;

    /// Transition to paid only if the stored status is not already paid.
    ///
    /// This is one indivisible store operation. Returns the updated invoice
    /// when this call performed the transition, `None` when the invoice is
    /// missing or was already paid. `payment_intent_id`, when given, replaces
    /// the stored external reference.
    async fn mark_invoice_paid(
        &self,
        id: &str,
        paid_at: DateTime<Utc>,
        payment_intent_id: Option<&str>,
    ) -> Result<Option<Invoice>, AppError>;

    /// Returns whether an invoice was deleted.
    async fn delete_invoice(&self, id: &str) -> Result<bool, AppError>;

    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError>;

    /// Newest first.
    async fn list_payments(&self) -> Result<Vec<Payment>, AppError>;

    async fn insert_activity(&self, activity: &Activity) -> Result<(), AppError>;

    /// Newest first, at most `limit` entries.
    async fn list_activity(&self, limit: i64) -> Result<Vec<Activity>, AppError>;

    async fn insert_client(&self, client: &Client) -> Result<(), AppError>;

    async fn get_client(&self, id: &str) -> Result<Option<Client>, AppError>;

    async fn insert_project(&self, project: &Project) -> Result<(), AppError>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>, AppError>;
}
