//! Invoice totals.
//!
//! Plain `f64` arithmetic with no currency rounding: `total = unit_price *
//! quantity` per line, `subtotal` is the in-order sum of line totals,
//! `tax_amount = subtotal * tax_rate / 100`, `total = subtotal + tax_amount`.
//! Negative prices, quantities and empty item lists are accepted as-is.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::LineItem;

/// A line item as submitted by the caller, before its total is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub description: String,
    pub unit_price: f64,
    pub quantity: f64,
}

impl LineItemInput {
    pub fn new(description: impl Into<String>, unit_price: f64, quantity: f64) -> Self {
        Self {
            description: description.into(),
            unit_price,
            quantity,
        }
    }
}

/// Result of [`compute_totals`]. Line items keep the input order.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceTotals {
    pub line_items: Vec<LineItem>,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
}

/// Tax part only, for when the rate changes but the stored subtotal stands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxTotals {
    pub tax_amount: f64,
    pub total: f64,
}

pub fn compute_totals(items: &[LineItemInput], tax_rate: f64) -> InvoiceTotals {
    let line_items: Vec<LineItem> = items
        .iter()
        .map(|item| LineItem {
            id: Uuid::new_v4().to_string(),
            description: item.description.clone(),
            unit_price: item.unit_price,
            quantity: item.quantity,
            total: item.unit_price * item.quantity,
        })
        .collect();

    let subtotal = line_items.iter().fold(0.0, |acc, item| acc + item.total);
    let TaxTotals { tax_amount, total } = compute_tax(subtotal, tax_rate);

    InvoiceTotals {
        line_items,
        subtotal,
        tax_amount,
        total,
    }
}

pub fn compute_tax(subtotal: f64, tax_rate: f64) -> TaxTotals {
    let tax_amount = subtotal * (tax_rate / 100.0);
    TaxTotals {
        tax_amount,
        total: subtotal + tax_amount,
    }
}
