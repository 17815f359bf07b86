//! MongoDB-backed ledger store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Collection, Database, IndexModel};
use service_core::error::AppError;
use tracing::{info, instrument};

use crate::models::{Activity, Client, Invoice, InvoiceStatus, Payment, Project};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{InvoiceChanges, LedgerStore, LIST_LIMIT};

#[derive(Clone)]
pub struct MongoLedgerStore {
    invoices: Collection<Invoice>,
    payments: Collection<Payment>,
    activity: Collection<Activity>,
    clients: Collection<Client>,
    projects: Collection<Project>,
}

impl MongoLedgerStore {
    pub fn new(db: &Database) -> Self {
        Self {
            invoices: db.collection("invoices"),
            payments: db.collection("payments"),
            activity: db.collection("activity"),
            clients: db.collection("clients"),
            projects: db.collection("projects"),
        }
    }

    /// Initialize indexes. Every collection is keyed by a unique `id`.
    pub async fn init_indexes(&self) -> Result<(), AppError> {
        fn unique_id(name: &str) -> IndexModel {
            IndexModel::builder()
                .keys(doc! { "id": 1 })
                .options(
                    IndexOptions::builder()
                        .name(name.to_string())
                        .unique(true)
                        .build(),
                )
                .build()
        }

        let invoice_created_index = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("invoice_created_idx".to_string())
                    .build(),
            )
            .build();

        let invoice_status_index = IndexModel::builder()
            .keys(doc! { "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("invoice_status_idx".to_string())
                    .build(),
            )
            .build();

        self.invoices
            .create_indexes(
                [
                    unique_id("invoice_id_idx"),
                    invoice_created_index,
                    invoice_status_index,
                ],
                None,
            )
            .await?;

        let payment_invoice_index = IndexModel::builder()
            .keys(doc! { "invoice_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_invoice_idx".to_string())
                    .build(),
            )
            .build();

        self.payments
            .create_indexes([unique_id("payment_id_idx"), payment_invoice_index], None)
            .await?;

        let activity_timestamp_index = IndexModel::builder()
            .keys(doc! { "timestamp": -1 })
            .options(
                IndexOptions::builder()
                    .name("activity_timestamp_idx".to_string())
                    .build(),
            )
            .build();

        self.activity
            .create_indexes(
                [unique_id("activity_id_idx"), activity_timestamp_index],
                None,
            )
            .await?;

        self.clients
            .create_index(unique_id("client_id_idx"), None)
            .await?;
        self.projects
            .create_index(unique_id("project_id_idx"), None)
            .await?;

        info!("Ledger store indexes initialized");
        Ok(())
    }
}

fn changes_to_set(changes: &InvoiceChanges, now: DateTime<Utc>) -> Result<Document, AppError> {
    let mut set = Document::new();

    if let Some(ref line_items) = changes.line_items {
        set.insert("line_items", to_bson(line_items)?);
    }
    if let Some(subtotal) = changes.subtotal {
        set.insert("subtotal", subtotal);
    }
    if let Some(tax_rate) = changes.tax_rate {
        set.insert("tax_rate", tax_rate);
    }
    if let Some(tax_amount) = changes.tax_amount {
        set.insert("tax_amount", tax_amount);
    }
    if let Some(total) = changes.total {
        set.insert("total", total);
    }
    if let Some(status) = changes.status {
        set.insert("status", to_bson(&status)?);
    }
    if let Some(paid_at) = changes.paid_at {
        set.insert("paid_at", to_bson(&paid_at)?);
    }
    if let Some(ref intent) = changes.stripe_payment_intent_id {
        set.insert("stripe_payment_intent_id", intent.as_str());
    }
    if let Some(ref session) = changes.stripe_checkout_session_id {
        set.insert("stripe_checkout_session_id", session.as_str());
    }
    if let Some(ref link) = changes.payment_link {
        set.insert("payment_link", link.as_str());
    }
    set.insert("updated_at", to_bson(&now)?);

    Ok(set)
}

#[async_trait]
impl LedgerStore for MongoLedgerStore {
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), AppError> {
        self.invoices.insert_one(invoice, None).await?;
        Ok(())
    }

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, AppError> {
        Ok(self.invoices.find_one(doc! { "id": id }, None).await?)
    }

    async fn list_invoices(&self) -> Result<Vec<Invoice>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(LIST_LIMIT)
            .build();
        let cursor = self.invoices.find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    #[instrument(skip(self))]
    async fn latest_invoice_number(&self) -> Result<Option<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_invoice_number"])
            .start_timer();

        let options = FindOneOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let latest = self.invoices.find_one(doc! {}, options).await?;

        timer.observe_duration();

        Ok(latest.map(|invoice| invoice.number))
    }

    #[instrument(skip(self, changes))]
    async fn update_invoice(
        &self,
        id: &str,
        changes: &InvoiceChanges,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let update = doc! { "$set": changes_to_set(changes, Utc::now())? };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .invoices
            .find_one_and_update(doc! { "id": id }, update, options)
            .await?;

        timer.observe_duration();

        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn mark_invoice_paid(
        &self,
        id: &str,
        paid_at: DateTime<Utc>,
        payment_intent_id: Option<&str>,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoice_paid"])
            .start_timer();

        let changes = InvoiceChanges {
            status: Some(InvoiceStatus::Paid),
            paid_at: Some(paid_at),
            stripe_payment_intent_id: payment_intent_id.map(str::to_string),
            ..Default::default()
        };

        // The status predicate makes this a compare-and-set: of several
        // concurrent callers, exactly one matches the document.
        let filter = doc! {
            "id": id,
            "status": { "$ne": to_bson(&InvoiceStatus::Paid)? },
        };
        let update = doc! { "$set": changes_to_set(&changes, paid_at)? };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .invoices
            .find_one_and_update(filter, update, options)
            .await?;

        timer.observe_duration();

        Ok(updated)
    }

    async fn delete_invoice(&self, id: &str) -> Result<bool, AppError> {
        let result = self.invoices.delete_one(doc! { "id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        self.payments.insert_one(payment, None).await?;
        Ok(())
    }

    async fn list_payments(&self) -> Result<Vec<Payment>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(LIST_LIMIT)
            .build();
        let cursor = self.payments.find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_activity(&self, activity: &Activity) -> Result<(), AppError> {
        self.activity.insert_one(activity, None).await?;
        Ok(())
    }

    async fn list_activity(&self, limit: i64) -> Result<Vec<Activity>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .limit(limit.clamp(1, LIST_LIMIT))
            .build();
        let cursor = self.activity.find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_client(&self, client: &Client) -> Result<(), AppError> {
        self.clients.insert_one(client, None).await?;
        Ok(())
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, AppError> {
        Ok(self.clients.find_one(doc! { "id": id }, None).await?)
    }

    async fn insert_project(&self, project: &Project) -> Result<(), AppError> {
        self.projects.insert_one(project, None).await?;
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, AppError> {
        Ok(self.projects.find_one(doc! { "id": id }, None).await?)
    }
}
