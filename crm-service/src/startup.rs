//! Application startup and lifecycle management.

use crate::config::{Config, StoreBackend};
use crate::handlers;
use crate::middleware::JwtVerifier;
use crate::services::{
    init_metrics, InMemoryLedgerStore, InvoiceService, LedgerStore, MongoLedgerStore,
    NotificationHub, PaymentProvider, Reconciler, StripeClient,
};
use axum::http::{HeaderValue, Request};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{request_id_middleware, RequestId},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn LedgerStore>,
    pub provider: Arc<dyn PaymentProvider>,
    pub notifier: Arc<NotificationHub>,
    pub reconciler: Arc<Reconciler>,
    pub invoices: Arc<InvoiceService>,
    pub jwt: JwtVerifier,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        let notifier = Arc::new(NotificationHub::new());
        let reconciler = Arc::new(Reconciler::new(store.clone(), notifier.clone()));
        let invoices = Arc::new(InvoiceService::new(
            store.clone(),
            provider.clone(),
            config.frontend_url.clone(),
        ));
        let jwt = JwtVerifier::new(config.auth.jwt_secret.expose_secret());

        Self {
            config: Arc::new(config),
            store,
            provider,
            notifier,
            reconciler,
            invoices,
            jwt,
        }
    }
}

impl AsRef<JwtVerifier> for AppState {
    fn as_ref(&self) -> &JwtVerifier {
        &self.jwt
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(allowed)
}

/// HTTP routes with the full middleware stack.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/invoices",
            get(handlers::invoices::list_invoices).post(handlers::invoices::create_invoice),
        )
        .route(
            "/invoices/:id",
            get(handlers::invoices::get_invoice)
                .patch(handlers::invoices::update_invoice)
                .delete(handlers::invoices::delete_invoice),
        )
        .route(
            "/invoices/:id/payment-link",
            post(handlers::invoices::create_payment_link),
        )
        .route(
            "/invoices/:id/public",
            get(handlers::invoices::get_public_invoice),
        )
        .route(
            "/invoices/:id/verify-payment",
            post(handlers::invoices::verify_payment),
        )
        .route("/payments", get(handlers::payments::list_payments))
        .route(
            "/payments/intent",
            post(handlers::payments::create_payment_intent),
        )
        .route(
            "/payments/transactions",
            get(handlers::payments::list_transactions),
        )
        .route("/stripe/webhook", post(handlers::webhooks::stripe_webhook))
        .route("/activity", get(handlers::activity::list_activity));

    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/ws", get(handlers::ws::ws_handler))
        .nest("/api", api)
        // Route layer so the metrics see the matched path template.
        .route_layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .extensions()
                    .get::<RequestId>()
                    .map(RequestId::as_str)
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

async fn connect_store(config: &Config) -> Result<Arc<dyn LedgerStore>, AppError> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory ledger store; data is lost on restart");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        StoreBackend::Mongodb => {
            let url = config.store.url.as_ref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("MONGO_URL is not configured"))
            })?;

            let mut client_options = ClientOptions::parse(url.expose_secret())
                .await
                .map_err(|e| {
                    tracing::error!("Failed to parse MongoDB connection string: {}", e);
                    AppError::DatabaseError(e.into())
                })?;
            client_options.app_name = Some(config.service_name.clone());

            let client = Client::with_options(client_options).map_err(|e| {
                tracing::error!("Failed to create MongoDB client: {}", e);
                AppError::DatabaseError(e.into())
            })?;
            let db = client.database(&config.store.db_name);

            let store = MongoLedgerStore::new(&db);
            store.init_indexes().await.map_err(|e| {
                tracing::error!("Failed to initialize database indexes: {}", e);
                e
            })?;

            Ok(Arc::new(store))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        init_metrics();

        let store = connect_store(&config).await?;

        let stripe = StripeClient::new(config.stripe.clone()).map_err(AppError::ConfigError)?;
        if stripe.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - payment features will fail");
        }
        if config.stripe.webhook_secret.is_none() {
            tracing::warn!(
                "STRIPE_WEBHOOK_SECRET not set - webhook signatures will not be verified"
            );
        }

        let addr: SocketAddr = format!("{}:{}", config.common.host, config.common.port)
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid listen address: {}", e)))?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let state = AppState::new(config, store, Arc::new(stripe));

        tracing::info!("crm-service: HTTP on port {}", port);

        Ok(Self {
            port,
            listener,
            router: router(state),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
