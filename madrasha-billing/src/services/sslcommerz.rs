//! SSLCommerz hosted-payment client.
//!
//! Opens hosted checkout sessions and validates returned `val_id`s against
//! the gateway's validator API. The browser-supplied callback status is
//! never trusted; only [`SslCommerzClient::validate`] decides whether money
//! moved.

use crate::config::{CallbackConfig, SslCommerzConfig};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const INITIATE_PATH: &str = "/gwprocess/v4/api.php";
const VALIDATION_PATH: &str = "/validator/api/validationserverAPI.php";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("SSLCommerz credentials not configured")]
    NotConfigured,

    #[error("SSLCommerz request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SSLCommerz rejected the request: {0}")]
    Rejected(String),

    #[error("Unexpected SSLCommerz response: {0}")]
    Malformed(String),
}

/// Customer details the hosted page requires.
#[derive(Debug, Clone)]
pub struct Customer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Everything needed to open one hosted checkout session.
#[derive(Debug, Clone)]
pub struct InitiatePayment<'a> {
    pub tran_id: &'a str,
    pub amount: Decimal,
    pub currency: &'a str,
    pub invoice_ids: &'a [Uuid],
    pub customer: Customer,
}

/// Session-initiation response (fields used by this service only).
#[derive(Debug, Clone, Deserialize)]
pub struct InitiateResponse {
    pub status: String,
    #[serde(default)]
    pub failedreason: Option<String>,
    #[serde(default)]
    pub sessionkey: Option<String>,
    #[serde(rename = "GatewayPageURL", default)]
    pub gateway_page_url: Option<String>,
}

/// A checkout session the browser can be sent to.
#[derive(Debug, Clone)]
pub struct HostedSession {
    pub gateway_url: String,
    pub session_key: Option<String>,
}

/// Validator API response (fields used by this service only).
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationResponse {
    pub status: String,
    #[serde(default)]
    pub tran_id: Option<String>,
    #[serde(default)]
    pub val_id: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub currency_type: Option<String>,
    #[serde(default)]
    pub currency_amount: Option<String>,
    #[serde(default)]
    pub bank_tran_id: Option<String>,
    #[serde(default)]
    pub value_a: Option<String>,
}

impl ValidationResponse {
    /// The gateway vouches for the payment and it belongs to `tran_id`.
    pub fn is_valid_for(&self, tran_id: &str) -> bool {
        matches!(self.status.as_str(), "VALID" | "VALIDATED")
            && self.tran_id.as_deref() == Some(tran_id)
    }

    /// Amount charged in the session currency.
    pub fn charged_amount(&self) -> Option<Decimal> {
        self.currency_amount
            .as_deref()
            .or(self.amount.as_deref())
            .and_then(|s| Decimal::from_str(s.trim()).ok())
    }
}

/// Validation result plus the raw body kept for the audit trail.
#[derive(Debug, Clone)]
pub struct ValidatedPayment {
    pub response: ValidationResponse,
    pub raw: serde_json::Value,
}

/// Comma-separated invoice ids carried in `value_a`.
pub fn join_invoice_ids(invoice_ids: &[Uuid]) -> String {
    invoice_ids
        .iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_invoice_ids(value: &str) -> Result<Vec<Uuid>, uuid::Error> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Uuid::parse_str)
        .collect()
}

/// SSLCommerz client for interacting with the hosted payment API.
#[derive(Clone)]
pub struct SslCommerzClient {
    client: Client,
    config: SslCommerzConfig,
    callbacks: CallbackConfig,
}

impl SslCommerzClient {
    pub fn new(config: SslCommerzConfig, callbacks: CallbackConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            callbacks,
        })
    }

    /// Check if SSLCommerz is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.store_id.is_empty() && !self.config.store_password.expose_secret().is_empty()
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    fn callback_url(&self, kind: &str) -> String {
        format!(
            "{}/payments/sslcommerz/{}",
            self.callbacks.public_base_url.trim_end_matches('/'),
            kind
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    /// Open a hosted checkout session and return the page to redirect to.
    pub async fn initiate(&self, payment: &InitiatePayment<'_>) -> Result<HostedSession, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let customer = &payment.customer;
        let params: Vec<(&str, String)> = vec![
            ("store_id", self.config.store_id.clone()),
            (
                "store_passwd",
                self.config.store_password.expose_secret().clone(),
            ),
            ("total_amount", format!("{:.2}", payment.amount)),
            ("currency", payment.currency.to_string()),
            ("tran_id", payment.tran_id.to_string()),
            ("success_url", self.callback_url("success")),
            ("fail_url", self.callback_url("fail")),
            ("cancel_url", self.callback_url("cancel")),
            ("ipn_url", self.callback_url("ipn")),
            ("cus_name", customer.name.clone()),
            (
                "cus_email",
                customer
                    .email
                    .clone()
                    .unwrap_or_else(|| "noreply@example.com".to_string()),
            ),
            (
                "cus_phone",
                customer
                    .phone
                    .clone()
                    .unwrap_or_else(|| "01700000000".to_string()),
            ),
            ("cus_add1", "N/A".to_string()),
            ("cus_city", "Dhaka".to_string()),
            ("cus_country", "Bangladesh".to_string()),
            ("shipping_method", "NO".to_string()),
            ("num_of_item", payment.invoice_ids.len().to_string()),
            ("product_name", "Monthly tuition fee".to_string()),
            ("product_category", "Education".to_string()),
            ("product_profile", "non-physical-goods".to_string()),
            ("value_a", join_invoice_ids(payment.invoice_ids)),
        ];

        let response = self
            .client
            .post(self.endpoint(INITIATE_PATH))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "SSLCommerz initiate response");

        if !status.is_success() {
            tracing::error!(status = %status, "SSLCommerz session initiation failed");
            return Err(GatewayError::Rejected(format!("HTTP {}", status)));
        }

        let parsed: InitiateResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))?;

        match (parsed.status.as_str(), parsed.gateway_page_url) {
            ("SUCCESS", Some(gateway_url)) if !gateway_url.is_empty() => {
                tracing::info!(
                    tran_id = %payment.tran_id,
                    amount = %payment.amount,
                    "SSLCommerz session created"
                );
                Ok(HostedSession {
                    gateway_url,
                    session_key: parsed.sessionkey,
                })
            }
            _ => {
                let reason = parsed
                    .failedreason
                    .unwrap_or_else(|| format!("status {}", parsed.status));
                tracing::warn!(tran_id = %payment.tran_id, reason = %reason, "SSLCommerz refused session");
                Err(GatewayError::Rejected(reason))
            }
        }
    }

    /// Ask the validator API what really happened to `val_id`.
    ///
    /// Returns the response whatever its status; callers decide acceptance
    /// with [`ValidationResponse::is_valid_for`].
    pub async fn validate(&self, val_id: &str) -> Result<ValidatedPayment, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let response = self
            .client
            .get(self.endpoint(VALIDATION_PATH))
            .query(&[
                ("val_id", val_id),
                ("store_id", self.config.store_id.as_str()),
                (
                    "store_passwd",
                    self.config.store_password.expose_secret().as_str(),
                ),
                ("format", "json"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(status = %status, "SSLCommerz validation request failed");
            return Err(GatewayError::Rejected(format!("HTTP {}", status)));
        }

        let raw: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let parsed: ValidationResponse = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        tracing::info!(
            val_id = %val_id,
            gateway_status = %parsed.status,
            tran_id = ?parsed.tran_id,
            "SSLCommerz validation answered"
        );

        Ok(ValidatedPayment {
            response: parsed,
            raw,
        })
    }
}
