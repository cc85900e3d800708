//! Madrasha billing entry point.

use madrasha_billing::config::BillingConfig;
use madrasha_billing::services::init_metrics;
use madrasha_billing::startup::Application;

use service_core::observability::{init_tracing, TracingSettings};
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = BillingConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(TracingSettings {
        service_name: &config.service_name,
        log_level: &config.log_level,
        otlp_endpoint: config.otlp_endpoint.as_deref(),
        error_log_file: config.log_file.as_deref(),
    })
    .map_err(|e| {
        eprintln!("Failed to initialize tracing: {}", e);
        std::io::Error::other(format!("Tracing error: {}", e))
    })?;

    tracing::info!(
        version = %config.service_version,
        otlp_endpoint = ?config.otlp_endpoint,
        "Starting madrasha-billing"
    );

    init_metrics();

    // Secrets are never logged; only whether they are set.
    tracing::info!(
        service_name = %config.service_name,
        http_addr = %format!("{}:{}", config.common.host, config.common.port),
        db_max_connections = %config.database.max_connections,
        db_min_connections = %config.database.min_connections,
        sslcommerz_api = %config.sslcommerz.api_base_url,
        sslcommerz_store_configured = !config.sslcommerz.store_id.is_empty(),
        currency = %config.sslcommerz.currency,
        public_base_url = %config.callbacks.public_base_url,
        frontend_base_url = %config.callbacks.frontend_base_url,
        invoice_due_day = config.invoicing.due_day,
        "Configuration loaded"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    tokio::select! {
        result = app.run_until_stopped() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Application error");
                return Err(e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Graceful shutdown initiated");
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
