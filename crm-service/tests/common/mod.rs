#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use crm_service::config::{AuthConfig, Config, StoreBackend, StoreConfig, StripeConfig};
use crm_service::middleware::auth::issue_token;
use crm_service::models::{Client, Invoice};
use crm_service::services::stripe::{
    CheckoutSession, CheckoutSessionRequest, PaymentIntent, PaymentIntentRequest,
    PaymentProvider,
};
use crm_service::services::{InMemoryLedgerStore, LedgerStore};
use crm_service::{router, AppState};
use secrecy::Secret;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";
pub const TEST_CLIENT_ID: &str = "client-1";
pub const TEST_USER_NAME: &str = "Test User";

/// Payment provider double. Sessions are served from an in-memory table.
#[derive(Default)]
pub struct FakeProvider {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    created: Mutex<Vec<CheckoutSessionRequest>>,
    intents: Mutex<Vec<PaymentIntent>>,
    listed_limits: Mutex<Vec<u32>>,
    fail: Mutex<bool>,
}

impl FakeProvider {
    pub fn add_session(&self, session: CheckoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Intents returned by `list_payment_intents`, newest first.
    pub fn set_intents(&self, intents: Vec<PaymentIntent>) {
        *self.intents.lock().unwrap() = intents;
    }

    /// Limits received by `list_payment_intents`, in call order.
    pub fn listed_limits(&self) -> Vec<u32> {
        self.listed_limits.lock().unwrap().clone()
    }

    pub fn fail_requests(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn created_sessions(&self) -> Vec<CheckoutSessionRequest> {
        self.created.lock().unwrap().clone()
    }

    fn check(&self) -> anyhow::Result<()> {
        if *self.fail.lock().unwrap() {
            anyhow::bail!("provider unavailable");
        }
        Ok(())
    }
}

pub fn session(
    id: &str,
    invoice_id: &str,
    payment_status: &str,
    amount_total: i64,
) -> CheckoutSession {
    CheckoutSession {
        id: id.to_string(),
        url: Some(format!("https://checkout.stripe.test/{}", id)),
        payment_status: Some(payment_status.to_string()),
        payment_intent: Some(format!("pi_{}", id)),
        amount_total: Some(amount_total),
        currency: Some("eur".to_string()),
        client_reference_id: Some(invoice_id.to_string()),
        metadata: HashMap::new(),
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> anyhow::Result<CheckoutSession> {
        self.check()?;
        let id = format!("cs_test_{}", self.created.lock().unwrap().len() + 1);
        let session = session(&id, &request.client_reference_id, "unpaid", 0);
        self.created.lock().unwrap().push(request.clone());
        self.add_session(session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> anyhow::Result<CheckoutSession> {
        self.check()?;
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No such checkout session: {}", session_id))
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> anyhow::Result<PaymentIntent> {
        self.check()?;
        Ok(PaymentIntent {
            id: "pi_test_1".to_string(),
            amount: request.amount,
            currency: request.currency.clone(),
            status: "requires_payment_method".to_string(),
            created: Utc::now().timestamp(),
            client_secret: Some("pi_test_1_secret".to_string()),
            metadata: request.metadata.iter().cloned().collect(),
        })
    }

    async fn list_payment_intents(&self, limit: u32) -> anyhow::Result<Vec<PaymentIntent>> {
        self.listed_limits.lock().unwrap().push(limit);
        self.check()?;
        let intents = self.intents.lock().unwrap();
        Ok(intents.iter().take(limit as usize).cloned().collect())
    }
}

pub fn intent(
    id: &str,
    amount: i64,
    status: &str,
    metadata: &[(&str, &str)],
) -> PaymentIntent {
    PaymentIntent {
        id: id.to_string(),
        amount,
        currency: "eur".to_string(),
        status: status.to_string(),
        created: 1_760_000_000,
        client_secret: None,
        metadata: metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn test_config(webhook_secret: Option<&str>) -> Config {
    Config {
        common: service_core::config::Config {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "crm-service-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        store: StoreConfig {
            backend: StoreBackend::Memory,
            url: None,
            db_name: "crm_test".to_string(),
        },
        auth: AuthConfig {
            jwt_secret: Secret::new(TEST_JWT_SECRET.to_string()),
        },
        stripe: StripeConfig {
            secret_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: webhook_secret.map(|s| Secret::new(s.to_string())),
            api_base_url: "http://127.0.0.1:1".to_string(),
            timeout_seconds: 5,
            signature_tolerance_seconds: 300,
        },
        frontend_url: "http://localhost:3000".to_string(),
        cors_origins: vec!["*".to_string()],
    }
}

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryLedgerStore>,
    pub provider: Arc<FakeProvider>,
    pub state: AppState,
    pub token: String,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config(None)).await
    }

    pub async fn spawn_with_webhook_secret() -> Self {
        Self::spawn_with(test_config(Some(TEST_WEBHOOK_SECRET))).await
    }

    pub async fn spawn_with(config: Config) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let provider = Arc::new(FakeProvider::default());

        store
            .insert_client(&Client {
                id: TEST_CLIENT_ID.to_string(),
                name: "Acme GmbH".to_string(),
                email: Some("billing@acme.test".to_string()),
                company: Some("Acme".to_string()),
                created_at: Utc::now(),
            })
            .await
            .expect("Failed to seed client");

        let state = AppState::new(config, store.clone(), provider.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let port = listener.local_addr().unwrap().port();
        let app = router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let token = issue_token(
            TEST_JWT_SECRET,
            "user-1",
            Some(TEST_USER_NAME),
            Duration::hours(1),
        )
        .expect("Failed to issue token");

        Self {
            address: format!("http://127.0.0.1:{}", port),
            store,
            provider,
            state,
            token,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Create an invoice worth 700 net at 20% tax through the API.
    pub async fn create_invoice(&self) -> Invoice {
        let response = self
            .client
            .post(self.url("/api/invoices"))
            .bearer_auth(&self.token)
            .json(&json!({
                "client_id": TEST_CLIENT_ID,
                "line_items": [
                    { "description": "Design", "unit_price": 100.0, "quantity": 2.0 },
                    { "description": "Build", "unit_price": 250.0, "quantity": 2.0 }
                ],
                "tax_rate": 20.0,
                "currency": "EUR",
                "due_date": "2026-12-01T00:00:00Z"
            }))
            .send()
            .await
            .expect("Failed to execute request");

        assert_eq!(response.status().as_u16(), 201);
        response.json().await.expect("Failed to parse invoice")
    }

    pub async fn stored_invoice(&self, id: &str) -> Invoice {
        self.store
            .get_invoice(id)
            .await
            .expect("Store lookup failed")
            .expect("Invoice missing")
    }

    pub async fn post_webhook(&self, body: &Value, signature: Option<&str>) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url("/api/stripe/webhook"))
            .header("content-type", "application/json")
            .body(body.to_string());
        if let Some(signature) = signature {
            request = request.header("stripe-signature", signature);
        }
        request.send().await.expect("Failed to execute request")
    }
}

pub fn payment_intent_succeeded(invoice_id: &str, intent_id: &str, amount: i64) -> Value {
    json!({
        "id": format!("evt_{}", intent_id),
        "type": "payment_intent.succeeded",
        "data": {
            "object": {
                "id": intent_id,
                "amount": amount,
                "currency": "eur",
                "status": "succeeded",
                "created": 1_760_000_000,
                "metadata": { "invoice_id": invoice_id }
            }
        }
    })
}

pub fn checkout_session_completed(invoice_id: &str, session_id: &str, amount: i64) -> Value {
    json!({
        "id": format!("evt_{}", session_id),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "payment_status": "paid",
                "payment_intent": format!("pi_{}", session_id),
                "amount_total": amount,
                "currency": "eur",
                "client_reference_id": invoice_id,
                "metadata": {}
            }
        }
    })
}
