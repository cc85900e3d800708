//! Configuration module for madrasha-billing.

use dotenvy::dotenv;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    /// Unexpected errors are appended here as JSON lines when set.
    pub log_file: Option<PathBuf>,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub sslcommerz: SslCommerzConfig,
    pub callbacks: CallbackConfig,
    pub admin: AdminConfig,
    pub invoicing: InvoicingConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SslCommerzConfig {
    pub store_id: String,
    pub store_password: Secret<String>,
    /// `https://sandbox.sslcommerz.com` or `https://securepay.sslcommerz.com`.
    pub api_base_url: String,
    pub currency: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// Public URL of this service; the gateway posts back to it.
    pub public_base_url: String,
    /// Student-facing site the browser is redirected to after a callback.
    pub frontend_base_url: String,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub api_key: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct InvoicingConfig {
    /// Day of month invoices fall due; clamped to the month's last day.
    pub due_day: u32,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is required", key)))
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let common = core_config::Config::load()?;

        let due_day = env_parse("INVOICE_DUE_DAY", 10u32);
        if !(1..=31).contains(&due_day) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVOICE_DUE_DAY must be between 1 and 31, got {}",
                due_day
            )));
        }

        Ok(Self {
            common,
            service_name: env_or("SERVICE_NAME", "madrasha-billing"),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env_or("LOG_LEVEL", "info"),
            log_file: env::var("LOG_FILE").ok().map(PathBuf::from),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            sslcommerz: SslCommerzConfig {
                store_id: env_or("SSLCOMMERZ_STORE_ID", ""),
                store_password: Secret::new(env_or("SSLCOMMERZ_STORE_PASSWORD", "")),
                api_base_url: env_or(
                    "SSLCOMMERZ_API_BASE_URL",
                    "https://sandbox.sslcommerz.com",
                ),
                currency: env_or("SSLCOMMERZ_CURRENCY", "BDT"),
                request_timeout_secs: env_parse("SSLCOMMERZ_TIMEOUT_SECS", 30),
            },
            callbacks: CallbackConfig {
                public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:8080"),
                frontend_base_url: env_or("FRONTEND_BASE_URL", "http://localhost:3000"),
            },
            admin: AdminConfig {
                api_key: Secret::new(required("ADMIN_API_KEY")?),
            },
            invoicing: InvoicingConfig { due_day },
        })
    }
}
