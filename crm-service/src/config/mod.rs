use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub common: service_core::config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub stripe: StripeConfig,
    pub frontend_url: String,
    pub cors_origins: Vec<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongodb,
    Memory,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: Option<Secret<String>>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    /// `None` disables webhook signature verification.
    pub webhook_secret: Option<Secret<String>>,
    pub api_base_url: String,
    pub timeout_seconds: u64,
    pub signature_tolerance_seconds: i64,
}

impl StripeConfig {
    pub fn is_configured(&self) -> bool {
        !self.secret_key.expose_secret().is_empty()
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let common = service_core::config::Config::load()
            .map_err(|e| anyhow!("Failed to load server config: {}", e))?;

        let backend = match var_or("LEDGER_STORE", "mongodb").to_lowercase().as_str() {
            "mongodb" | "mongo" => StoreBackend::Mongodb,
            "memory" => StoreBackend::Memory,
            other => return Err(anyhow!("Unknown LEDGER_STORE backend: {}", other)),
        };

        let url = non_empty_var("MONGO_URL").map(Secret::new);
        if backend == StoreBackend::Mongodb && url.is_none() {
            return Err(anyhow!("MONGO_URL must be set when LEDGER_STORE=mongodb"));
        }

        let jwt_secret =
            non_empty_var("JWT_SECRET").ok_or_else(|| anyhow!("JWT_SECRET must be set"))?;

        let stripe = StripeConfig {
            secret_key: Secret::new(var_or("STRIPE_SECRET_KEY", "")),
            webhook_secret: non_empty_var("STRIPE_WEBHOOK_SECRET").map(Secret::new),
            api_base_url: var_or("STRIPE_API_BASE_URL", "https://api.stripe.com/v1"),
            timeout_seconds: var_or("STRIPE_TIMEOUT_SECONDS", "15").parse()?,
            signature_tolerance_seconds: var_or("STRIPE_SIGNATURE_TOLERANCE_SECONDS", "300")
                .parse()?,
        };

        let cors_origins = var_or("CORS_ORIGINS", "*")
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            common,
            service_name: var_or("SERVICE_NAME", "crm-service"),
            log_level: var_or("LOG_LEVEL", "info"),
            otlp_endpoint: non_empty_var("OTLP_ENDPOINT"),
            store: StoreConfig {
                backend,
                url,
                db_name: var_or("DB_NAME", "crm_db"),
            },
            auth: AuthConfig {
                jwt_secret: Secret::new(jwt_secret),
            },
            stripe,
            frontend_url: var_or("FRONTEND_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            cors_origins,
        })
    }
}
