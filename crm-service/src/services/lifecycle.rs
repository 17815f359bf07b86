//! Invoice status rules.
//!
//! ```text
//!            reconciliation / manual
//!  pending ───────────────────────────▶ paid
//!     ▲ │                                ▲
//!     │ ▼ manual                         │ reconciliation / manual
//!  overdue ──────────────────────────────┘
//! ```
//!
//! `paid` is terminal for reconciliation: a payment signal for a paid invoice
//! is an idempotent no-op. Manual corrections may set any status. Whatever
//! the path, a paid invoice always carries `paid_at`.

use chrono::{DateTime, Utc};
use service_core::error::AppError;

use crate::models::{Invoice, InvoiceStatus};

/// What reconciliation should do with an invoice in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Move to paid and record the payment.
    Apply,
    /// Already paid; report success without side effects.
    AlreadyPaid,
}

pub fn reconcile_decision(status: InvoiceStatus) -> ReconcileDecision {
    match status {
        InvoiceStatus::Paid => ReconcileDecision::AlreadyPaid,
        InvoiceStatus::Pending | InvoiceStatus::Overdue => ReconcileDecision::Apply,
    }
}

/// Outcome of a manual status edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: InvoiceStatus,
    /// `paid_at` to write, if it changes.
    pub paid_at: Option<DateTime<Utc>>,
}

/// Caller-supplied `paid_at` to write, if any.
///
/// The timestamp of an invoice that is already paid is never replaced.
pub fn paid_at_edit(
    invoice: &Invoice,
    supplied_paid_at: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    if invoice.is_paid() && invoice.paid_at.is_some() {
        return None;
    }
    supplied_paid_at
}

/// Apply a manual status edit to `invoice`.
///
/// Entering `paid` keeps `paid_at` set: an existing timestamp on a paid
/// invoice is kept, otherwise the supplied value wins, otherwise `now`.
/// Leaving `paid` does not clear `paid_at`.
pub fn manual_status_change(
    invoice: &Invoice,
    target: InvoiceStatus,
    supplied_paid_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StatusChange {
    let paid_at = match (target, paid_at_edit(invoice, supplied_paid_at)) {
        (_, Some(supplied)) => Some(supplied),
        (InvoiceStatus::Paid, None) if invoice.paid_at.is_none() => Some(now),
        _ => None,
    };

    StatusChange {
        status: target,
        paid_at,
    }
}

/// Preconditions for asking the provider to collect money for an invoice.
///
/// Checked before any provider call.
pub fn ensure_payable(invoice: &Invoice) -> Result<(), AppError> {
    if invoice.is_paid() {
        return Err(AppError::InvalidState(anyhow::anyhow!(
            "Invoice {} is already paid",
            invoice.number
        )));
    }

    if invoice.line_items.is_empty() {
        return Err(AppError::InvalidState(anyhow::anyhow!(
            "Invoice must have at least one line item to generate payment link"
        )));
    }

    Ok(())
}
