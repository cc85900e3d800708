use crate::error::AppError;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime, trace as sdktrace};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// What `init_tracing` installs.
#[derive(Debug, Clone, Copy)]
pub struct TracingSettings<'a> {
    pub service_name: &'a str,
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub log_level: &'a str,
    /// OTLP gRPC collector; spans are only exported when set.
    pub otlp_endpoint: Option<&'a str>,
    /// File that receives every WARN and ERROR event as a JSON line.
    pub error_log_file: Option<&'a Path>,
}

/// Install the global subscriber: env filter, JSON stdout, optional OTLP
/// export and optional error log file.
pub fn init_tracing(settings: TracingSettings<'_>) -> Result<(), AppError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.log_level));

    let telemetry = match settings.otlp_endpoint {
        Some(endpoint) => Some(
            tracing_opentelemetry::layer()
                .with_tracer(otlp_tracer(settings.service_name, endpoint)?),
        ),
        None => None,
    };

    let error_log = match settings.error_log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "Cannot open error log {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::WARN),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry)
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true),
        )
        .with(error_log)
        .try_init()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Tracing already initialised: {}", e)))
}

fn otlp_tracer(service_name: &str, endpoint: &str) -> Result<sdktrace::Tracer, AppError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
        ])))
        .install_batch(runtime::Tokio)
        .map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Failed to initialize OTLP tracer for '{}' at '{}': {}",
                service_name,
                endpoint,
                e
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_receives_warnings_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");

        init_tracing(TracingSettings {
            service_name: "service-core-test",
            log_level: "info",
            otlp_endpoint: None,
            error_log_file: Some(&path),
        })
        .unwrap();

        tracing::info!("routine event");
        tracing::error!(invoice = "INV-1", "ledger write failed");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("ledger write failed"));
        assert!(!contents.contains("routine event"));

        // A second install is refused rather than silently replacing the first.
        assert!(
            init_tracing(TracingSettings {
                service_name: "service-core-test",
                log_level: "info",
                otlp_endpoint: None,
                error_log_file: None,
            })
            .is_err()
        );
    }
}
