//! Application startup and lifecycle management.

use crate::config::{AdminConfig, BillingConfig};
use crate::handlers::{self, academics, invoices, ledger, payments};
use crate::middleware::{admin_auth_middleware, metrics_middleware};
use crate::services::{
    init_metrics, Database, InvoiceGenerator, LedgerWriter, PaymentService, SslCommerzClient,
};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, REQUEST_ID_HEADER};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub db: Database,
    pub generator: InvoiceGenerator,
    pub payments: PaymentService,
}

impl AsRef<AdminConfig> for AppState {
    fn as_ref(&self) -> &AdminConfig {
        &self.config.admin
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BillingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let gateway = SslCommerzClient::new(config.sslcommerz.clone(), config.callbacks.clone())
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to build SSLCommerz client: {}", e))
            })?;
        if gateway.is_configured() {
            tracing::info!(api_base_url = %config.sslcommerz.api_base_url, "SSLCommerz client initialized");
        } else {
            tracing::warn!("SSLCommerz credentials not configured - online payments disabled");
        }

        let ledger = LedgerWriter::new(db.clone());
        let state = AppState {
            generator: InvoiceGenerator::new(db.clone(), config.invoicing.due_day),
            payments: PaymentService::new(db.clone(), gateway, ledger),
            db,
            config: config.clone(),
        };

        let addr = config.common.socket_addr()?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Madrasha billing listener bound");

        Ok(Self {
            http_port,
            listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);

        tracing::info!(
            service = "madrasha-billing",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

/// Full HTTP surface: probes, gateway callbacks and the key-guarded admin API.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/invoices", get(invoices::list_invoices))
        .route("/invoices/generate", post(invoices::generate_invoices))
        .route("/invoices/runs", get(invoices::list_runs))
        .route("/invoices/:id", get(invoices::get_invoice))
        .route("/invoices/:id/pay-cash", post(invoices::pay_cash))
        .route("/ledger/donations", post(ledger::record_donation))
        .route("/ledger/expenses", post(ledger::record_expense))
        .route("/ledger/expenses/:id", put(ledger::correct_expense))
        .route("/ledger/entries", get(ledger::list_entries))
        .route("/ledger/balances", get(ledger::fund_balances))
        .route("/courses", post(academics::create_course))
        .route("/departments", post(academics::create_department))
        .route("/batches", post(academics::create_batch))
        .route("/students", post(academics::create_student))
        .route(
            "/students/:id",
            get(academics::get_student).patch(academics::set_student_active),
        )
        .route("/students/:id/enrollments", post(academics::enroll_student))
        .route(
            "/students/:id/fee-tier",
            post(academics::assign_fee_tier).delete(academics::clear_fee_tier),
        )
        .route("/students/:id/fee", get(academics::student_fee))
        .route("/fee-tiers", post(academics::create_fee_tier))
        .route("/fee-tiers/:id", patch(academics::set_fee_tier_active))
        .route("/fees/default", put(academics::set_default_fee))
        .route(
            "/fees/tier",
            put(academics::set_tier_fee).delete(academics::delete_tier_fee),
        )
        .layer(from_fn_with_state(
            state.clone(),
            admin_auth_middleware::<AppState>,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/payments/initiate", post(payments::initiate_payment))
        .route("/payments/sslcommerz/success", post(payments::sslcommerz_success))
        .route("/payments/sslcommerz/fail", post(payments::sslcommerz_fail))
        .route("/payments/sslcommerz/cancel", post(payments::sslcommerz_cancel))
        .route("/payments/sslcommerz/ipn", post(payments::sslcommerz_ipn))
        .nest("/admin", admin)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
