//! Telemetry initialization: structured logging and Prometheus metrics

pub mod metrics;

use crate::config::TelemetryConfig;
use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when RUST_LOG is unset
const DEFAULT_FILTER: &str = "erp_access_core=info,erp_access=info,sqlx=warn";

/// Initialise logging, and the Prometheus exporter when metrics are enabled.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "json" {
        // flatten event fields so `message` sits at the top level of each line
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true);
        registry.with(fmt_layer).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    if config.metrics_enabled {
        metrics::install_prometheus_exporter(&config.metrics_addr)?;
        metrics::describe_metrics();
        tracing::info!(
            service = %config.service_name,
            addr = %config.metrics_addr,
            "Prometheus exporter listening"
        );
    }

    Ok(())
}
