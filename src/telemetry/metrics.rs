//! Prometheus metrics setup and metric definitions

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub const PERMISSION_RESOLUTIONS_TOTAL: &str = "erp_access_permission_resolutions_total";
pub const PERMISSION_RESOLUTION_DURATION_SECONDS: &str =
    "erp_access_permission_resolution_duration_seconds";
pub const ASSIGNMENTS_SKIPPED_TOTAL: &str = "erp_access_assignments_skipped_total";
pub const SUBSCRIPTION_FALLBACK_TOTAL: &str = "erp_access_subscription_fallback_total";
pub const SUBSCRIPTIONS_EXPIRED_TOTAL: &str = "erp_access_subscriptions_expired_total";

/// Install the Prometheus recorder with its own scrape listener on `addr`.
///
/// Must be called from inside a Tokio runtime.
pub fn install_prometheus_exporter(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr.parse().context("Invalid METRICS_ADDR")?;

    // Resolution runs a handful of indexed queries; sub-millisecond buckets matter
    let buckets = [
        0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
    ];

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(&buckets)
        .context("Failed to set histogram buckets")?
        .install()
        .context("Failed to install Prometheus exporter")?;
    Ok(())
}

/// Register metric descriptions and emit initial zero values so HELP/TYPE
/// lines are present from startup.
pub fn describe_metrics() {
    describe_counter!(
        PERMISSION_RESOLUTIONS_TOTAL,
        "Effective permission resolutions by result"
    );
    describe_histogram!(
        PERMISSION_RESOLUTION_DURATION_SECONDS,
        "Effective permission resolution duration in seconds"
    );
    describe_counter!(
        ASSIGNMENTS_SKIPPED_TOTAL,
        "Role assignments skipped during resolution, by reason"
    );
    describe_counter!(
        SUBSCRIPTION_FALLBACK_TOTAL,
        "Visible module lookups that fell back to the basic tier"
    );
    describe_counter!(
        SUBSCRIPTIONS_EXPIRED_TOTAL,
        "Subscriptions moved to expired by the sweep"
    );

    counter!(PERMISSION_RESOLUTIONS_TOTAL, "result" => "success").absolute(0);
    histogram!(PERMISSION_RESOLUTION_DURATION_SECONDS).record(0.0);
    counter!(ASSIGNMENTS_SKIPPED_TOTAL, "reason" => "missing_role").absolute(0);
    counter!(SUBSCRIPTION_FALLBACK_TOTAL).absolute(0);
    counter!(SUBSCRIPTIONS_EXPIRED_TOTAL).absolute(0);
}

/// Record one resolution and its duration.
pub fn record_resolution(result: &'static str, seconds: f64) {
    counter!(PERMISSION_RESOLUTIONS_TOTAL, "result" => result).increment(1);
    histogram!(PERMISSION_RESOLUTION_DURATION_SECONDS).record(seconds);
}

pub fn record_skipped_assignment(reason: &'static str) {
    counter!(ASSIGNMENTS_SKIPPED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_subscription_fallback() {
    counter!(SUBSCRIPTION_FALLBACK_TOTAL).increment(1);
}

pub fn record_expired_subscriptions(count: u64) {
    counter!(SUBSCRIPTIONS_EXPIRED_TOTAL).increment(count);
}
