//! Domain models for crm-service.

mod activity;
mod client;
mod invoice;
mod payment;

pub use activity::Activity;
pub use client::{Client, Project};
pub use invoice::{Invoice, InvoiceStatus, LineItem};
pub use payment::{Payment, PaymentStatus};
