mod common;

use common::{TestApp, TEST_CLIENT_ID, TEST_USER_NAME};
use crm_service::dtos::{MessageResponse, PaymentLinkResponse};
use crm_service::models::{Activity, Invoice, InvoiceStatus};
use crm_service::services::LedgerStore;
use serde_json::{json, Value};

#[tokio::test]
async fn create_invoice_computes_totals_and_logs_activity() {
    let app = TestApp::spawn().await;

    let invoice = app.create_invoice().await;

    assert_eq!(invoice.number, "INV-1001");
    assert_eq!(invoice.line_items.len(), 2);
    assert_eq!(invoice.line_items[0].total, 200.0);
    assert_eq!(invoice.line_items[1].total, 500.0);
    assert_eq!(invoice.subtotal, 700.0);
    assert_eq!(invoice.tax_amount, 140.0);
    assert_eq!(invoice.total, 840.0);
    assert_eq!(invoice.currency, "eur");
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert_eq!(invoice.client_name.as_deref(), Some("Acme GmbH"));
    assert!(invoice.paid_at.is_none());

    let activity: Vec<Activity> = app
        .client
        .get(app.url("/api/activity"))
        .bearer_auth(&app.token)
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse activity");

    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].activity_type, "invoice_created");
    assert_eq!(activity[0].entity_id, invoice.id);
    assert_eq!(activity[0].message, "Invoice INV-1001 created (Total: 840.00 EUR)");
    assert_eq!(activity[0].actor, TEST_USER_NAME);
}

#[tokio::test]
async fn invoice_numbers_increase() {
    let app = TestApp::spawn().await;

    let first = app.create_invoice().await;
    let second = app.create_invoice().await;

    assert_eq!(first.number, "INV-1001");
    assert_eq!(second.number, "INV-1002");

    let invoices: Vec<Invoice> = app
        .client
        .get(app.url("/api/invoices"))
        .bearer_auth(&app.token)
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse invoices");

    let numbers: Vec<&str> = invoices.iter().map(|i| i.number.as_str()).collect();
    assert_eq!(numbers, vec!["INV-1002", "INV-1001"]);
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/api/invoices"))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 401);

    let response = app
        .client
        .get(app.url("/api/invoices"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 401);

    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["kind"], "unauthorized");
}

#[tokio::test]
async fn create_invoice_rejects_invalid_body() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(app.url("/api/invoices"))
        .bearer_auth(&app.token)
        .json(&json!({
            "client_id": "",
            "line_items": [],
            "currency": "EURO",
            "due_date": "2026-12-01T00:00:00Z"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 422);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["kind"], "validation_error");
}

#[tokio::test]
async fn update_with_new_line_items_recomputes_totals() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice().await;

    let response = app
        .client
        .patch(app.url(&format!("/api/invoices/{}", invoice.id)))
        .bearer_auth(&app.token)
        .json(&json!({
            "line_items": [{ "description": "Audit", "unit_price": 50.0, "quantity": 3.0 }]
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let updated: Invoice = response.json().await.expect("Failed to parse invoice");

    assert_eq!(updated.number, invoice.number);
    assert_eq!(updated.line_items.len(), 1);
    assert_eq!(updated.subtotal, 150.0);
    assert_eq!(updated.tax_rate, 20.0);
    assert_eq!(updated.tax_amount, 30.0);
    assert_eq!(updated.total, 180.0);
}

#[tokio::test]
async fn manual_paid_status_sets_paid_at() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice().await;

    let updated: Invoice = app
        .client
        .patch(app.url(&format!("/api/invoices/{}", invoice.id)))
        .bearer_auth(&app.token)
        .json(&json!({ "status": "paid" }))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse invoice");

    assert_eq!(updated.status, InvoiceStatus::Paid);
    assert!(updated.paid_at.is_some());
}

#[tokio::test]
async fn repeated_paid_status_keeps_original_paid_at() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice().await;
    let path = format!("/api/invoices/{}", invoice.id);

    let first: Invoice = app
        .client
        .patch(app.url(&path))
        .bearer_auth(&app.token)
        .json(&json!({ "status": "paid" }))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse invoice");
    let recorded = first.paid_at.expect("paid_at set");

    let response = app
        .client
        .patch(app.url(&path))
        .bearer_auth(&app.token)
        .json(&json!({ "status": "paid", "paid_at": "2030-01-01T00:00:00Z" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert!(response.status().is_success());

    let stored = app.stored_invoice(&invoice.id).await;
    assert_eq!(stored.status, InvoiceStatus::Paid);
    assert_eq!(stored.paid_at, Some(recorded));
}

#[tokio::test]
async fn delete_invoice_removes_it() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice().await;
    let path = format!("/api/invoices/{}", invoice.id);

    let response = app
        .client
        .delete(app.url(&path))
        .bearer_auth(&app.token)
        .send()
        .await
        .expect("Failed to execute request");
    assert!(response.status().is_success());
    let body: MessageResponse = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body.message, "Invoice deleted successfully");

    let response = app
        .client
        .get(app.url(&path))
        .bearer_auth(&app.token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 404);

    let response = app
        .client
        .delete(app.url(&path))
        .bearer_auth(&app.token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn payment_link_is_stored_on_invoice() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice().await;

    let response = app
        .client
        .post(app.url(&format!("/api/invoices/{}/payment-link", invoice.id)))
        .bearer_auth(&app.token)
        .send()
        .await
        .expect("Failed to execute request");
    assert!(response.status().is_success());
    let link: PaymentLinkResponse = response.json().await.expect("Failed to parse JSON");

    let stored = app.stored_invoice(&invoice.id).await;
    assert_eq!(stored.payment_link.as_deref(), Some(link.payment_link.as_str()));
    assert_eq!(
        stored.stripe_checkout_session_id.as_deref(),
        Some(link.checkout_session_id.as_str())
    );

    let requests = app.provider.created_sessions();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].client_reference_id, invoice.id);
    assert_eq!(requests[0].customer_email.as_deref(), Some("billing@acme.test"));
    assert_eq!(requests[0].currency, "eur");
}

#[tokio::test]
async fn payment_link_refused_for_paid_invoice() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice().await;

    app.client
        .patch(app.url(&format!("/api/invoices/{}", invoice.id)))
        .bearer_auth(&app.token)
        .json(&json!({ "status": "paid" }))
        .send()
        .await
        .expect("Failed to execute request");

    let response = app
        .client
        .post(app.url(&format!("/api/invoices/{}/payment-link", invoice.id)))
        .bearer_auth(&app.token)
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
    assert!(app.provider.created_sessions().is_empty());
}

#[tokio::test]
async fn payment_link_refused_for_empty_invoice() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(app.url("/api/invoices"))
        .bearer_auth(&app.token)
        .json(&json!({
            "client_id": TEST_CLIENT_ID,
            "line_items": [],
            "due_date": "2026-12-01T00:00:00Z"
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 201);
    let invoice: Invoice = response.json().await.expect("Failed to parse invoice");
    assert_eq!(invoice.total, 0.0);

    let response = app
        .client
        .post(app.url(&format!("/api/invoices/{}/payment-link", invoice.id)))
        .bearer_auth(&app.token)
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn provider_failure_surfaces_as_bad_gateway() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice().await;
    app.provider.fail_requests();

    let response = app
        .client
        .post(app.url(&format!("/api/invoices/{}/payment-link", invoice.id)))
        .bearer_auth(&app.token)
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 502);
    let stored = app.stored_invoice(&invoice.id).await;
    assert!(stored.payment_link.is_none());
}

#[tokio::test]
async fn public_invoice_needs_no_token() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice().await;

    let response = app
        .client
        .get(app.url(&format!("/api/invoices/{}/public", invoice.id)))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let public: Invoice = response.json().await.expect("Failed to parse invoice");
    assert_eq!(public.id, invoice.id);
    assert_eq!(public.total, 840.0);
}

#[tokio::test]
async fn payment_intent_records_reference() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice().await;

    let response = app
        .client
        .post(app.url("/api/payments/intent"))
        .bearer_auth(&app.token)
        .json(&json!({ "invoice_id": invoice.id }))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["client_secret"], "pi_test_1_secret");

    let stored = app.store.get_invoice(&invoice.id).await.unwrap().unwrap();
    assert_eq!(stored.stripe_payment_intent_id.as_deref(), Some("pi_test_1"));
}
