pub mod invoices;
pub mod lifecycle;
pub mod memory_store;
pub mod metrics;
pub mod mongo_store;
pub mod notifier;
pub mod reconciliation;
pub mod store;
pub mod stripe;
pub mod totals;

pub use invoices::InvoiceService;
pub use memory_store::InMemoryLedgerStore;
pub use metrics::{get_metrics, init_metrics};
pub use mongo_store::MongoLedgerStore;
pub use notifier::NotificationHub;
pub use reconciliation::Reconciler;
pub use store::LedgerStore;
pub use stripe::{PaymentProvider, StripeClient};
