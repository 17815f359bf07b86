//! Process-local ledger store.
//!
//! Selected with `LEDGER_STORE=memory`. State is lost on restart. The whole
//! state sits behind one lock, so the conditional paid transition is as
//! atomic as the MongoDB compare-and-set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::{Activity, Client, Invoice, InvoiceStatus, Payment, Project};
use crate::services::store::{InvoiceChanges, LedgerStore, LIST_LIMIT};

#[derive(Default)]
struct LedgerState {
    /// Insertion order doubles as creation order.
    invoices: Vec<Invoice>,
    payments: Vec<Payment>,
    activity: Vec<Activity>,
    clients: HashMap<String, Client>,
    projects: HashMap<String, Project>,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn duplicate(kind: &str, id: &str) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Duplicate {} id {}", kind, id))
}

fn newest_first<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items.iter().rev().take(limit).cloned().collect()
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.invoices.iter().any(|i| i.id == invoice.id) {
            return Err(duplicate("invoice", &invoice.id));
        }
        state.invoices.push(invoice.clone());
        Ok(())
    }

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, AppError> {
        let state = self.state.read().await;
        Ok(state.invoices.iter().find(|i| i.id == id).cloned())
    }

    async fn list_invoices(&self) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.read().await;
        Ok(newest_first(&state.invoices, LIST_LIMIT as usize))
    }

    async fn latest_invoice_number(&self) -> Result<Option<String>, AppError> {
        let state = self.state.read().await;
        Ok(state.invoices.last().map(|i| i.number.clone()))
    }

    async fn update_invoice(
        &self,
        id: &str,
        changes: &InvoiceChanges,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.state.write().await;
        Ok(state.invoices.iter_mut().find(|i| i.id == id).map(|invoice| {
            changes.apply_to(invoice, Utc::now());
            invoice.clone()
        }))
    }

    async fn mark_invoice_paid(
        &self,
        id: &str,
        paid_at: DateTime<Utc>,
        payment_intent_id: Option<&str>,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.state.write().await;
        let Some(invoice) = state
            .invoices
            .iter_mut()
            .find(|i| i.id == id && i.status != InvoiceStatus::Paid)
        else {
            return Ok(None);
        };

        let changes = InvoiceChanges {
            status: Some(InvoiceStatus::Paid),
            paid_at: Some(paid_at),
            stripe_payment_intent_id: payment_intent_id.map(str::to_string),
            ..Default::default()
        };
        changes.apply_to(invoice, paid_at);

        Ok(Some(invoice.clone()))
    }

    async fn delete_invoice(&self, id: &str) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        let before = state.invoices.len();
        state.invoices.retain(|i| i.id != id);
        Ok(state.invoices.len() != before)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.payments.iter().any(|p| p.id == payment.id) {
            return Err(duplicate("payment", &payment.id));
        }
        state.payments.push(payment.clone());
        Ok(())
    }

    async fn list_payments(&self) -> Result<Vec<Payment>, AppError> {
        let state = self.state.read().await;
        Ok(newest_first(&state.payments, LIST_LIMIT as usize))
    }

    async fn insert_activity(&self, activity: &Activity) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.activity.push(activity.clone());
        Ok(())
    }

    async fn list_activity(&self, limit: i64) -> Result<Vec<Activity>, AppError> {
        let state = self.state.read().await;
        Ok(newest_first(
            &state.activity,
            limit.clamp(1, LIST_LIMIT) as usize,
        ))
    }

    async fn insert_client(&self, client: &Client) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, AppError> {
        let state = self.state.read().await;
        Ok(state.clients.get(id).cloned())
    }

    async fn insert_project(&self, project: &Project) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, AppError> {
        let state = self.state.read().await;
        Ok(state.projects.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineItem;

    fn invoice(id: &str, number: &str) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: id.to_string(),
            number: number.to_string(),
            client_id: "client-1".to_string(),
            client_name: None,
            project_id: None,
            project_title: None,
            line_items: vec![LineItem {
                id: "li-1".to_string(),
                description: "Work".to_string(),
                unit_price: 10.0,
                quantity: 1.0,
                total: 10.0,
            }],
            subtotal: 10.0,
            tax_rate: 0.0,
            tax_amount: 0.0,
            total: 10.0,
            currency: "eur".to_string(),
            status: InvoiceStatus::Pending,
            due_date: now,
            issued_date: now,
            paid_at: None,
            stripe_payment_intent_id: None,
            stripe_checkout_session_id: None,
            payment_link: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_mark_paid_applies_once() {
        let store = InMemoryLedgerStore::new();
        store.insert_invoice(&invoice("a", "INV-1001")).await.unwrap();

        let first_paid_at = Utc::now();
        let first = store
            .mark_invoice_paid("a", first_paid_at, Some("pi_1"))
            .await
            .unwrap()
            .expect("first call transitions");
        assert_eq!(first.status, InvoiceStatus::Paid);
        assert_eq!(first.paid_at, Some(first_paid_at));

        let second = store
            .mark_invoice_paid("a", Utc::now(), Some("pi_2"))
            .await
            .unwrap();
        assert!(second.is_none());

        let stored = store.get_invoice("a").await.unwrap().unwrap();
        assert_eq!(stored.paid_at, Some(first_paid_at));
        assert_eq!(stored.stripe_payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn test_mark_paid_missing_invoice() {
        let store = InMemoryLedgerStore::new();
        assert!(store
            .mark_invoice_paid("missing", Utc::now(), None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_latest_invoice_number_follows_insertion_order() {
        let store = InMemoryLedgerStore::new();
        assert_eq!(store.latest_invoice_number().await.unwrap(), None);

        store.insert_invoice(&invoice("a", "INV-1001")).await.unwrap();
        store.insert_invoice(&invoice("b", "INV-1002")).await.unwrap();

        assert_eq!(
            store.latest_invoice_number().await.unwrap().as_deref(),
            Some("INV-1002")
        );
    }

    #[tokio::test]
    async fn test_update_keeps_untouched_fields() {
        let store = InMemoryLedgerStore::new();
        store.insert_invoice(&invoice("a", "INV-1001")).await.unwrap();

        let changes = InvoiceChanges {
            payment_link: Some("https://checkout.example/cs_1".to_string()),
            stripe_checkout_session_id: Some("cs_1".to_string()),
            ..Default::default()
        };
        let updated = store.update_invoice("a", &changes).await.unwrap().unwrap();

        assert_eq!(updated.payment_link.as_deref(), Some("https://checkout.example/cs_1"));
        assert_eq!(updated.status, InvoiceStatus::Pending);
        assert_eq!(updated.total, 10.0);

        assert!(store.update_invoice("missing", &changes).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activity_is_newest_first_and_limited() {
        let store = InMemoryLedgerStore::new();
        for i in 0..5 {
            store
                .insert_activity(&Activity::new(
                    "invoice_created",
                    "invoice",
                    &format!("inv-{}", i),
                    format!("Invoice {} created", i),
                    "Admin",
                ))
                .await
                .unwrap();
        }

        let recent = store.list_activity(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].entity_id, "inv-4");
        assert_eq!(recent[1].entity_id, "inv-3");
    }
}
