//! Configuration management for the access core

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging and metrics
    pub telemetry: TelemetryConfig,
    /// Hierarchy and permission resolution settings
    pub access: AccessConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// "text" or "json"
    pub log_format: String,
    pub service_name: String,
    pub metrics_enabled: bool,
    /// Listen address of the Prometheus scrape endpoint
    pub metrics_addr: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            service_name: "erp-access".to_string(),
            metrics_enabled: false,
            metrics_addr: "0.0.0.0:9464".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// TTL of the per-company visible module cache; 0 disables caching
    pub visible_modules_cache_ttl_secs: u64,
    /// Deepest level a branch or unit may sit at (roots are level 1)
    pub max_hierarchy_depth: i32,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            visible_modules_cache_ttl_secs: 60,
            max_hierarchy_depth: 32,
        }
    }
}

impl AccessConfig {
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.visible_modules_cache_ttl_secs > 0)
            .then(|| Duration::from_secs(self.visible_modules_cache_ttl_secs))
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let log_format = var("LOG_FORMAT", "text").to_lowercase();
        if log_format != "text" && log_format != "json" {
            anyhow::bail!("Invalid LOG_FORMAT '{}': expected 'text' or 'json'", log_format);
        }

        let max_hierarchy_depth: i32 = var("MAX_HIERARCHY_DEPTH", "32")
            .parse()
            .context("Invalid MAX_HIERARCHY_DEPTH")?;
        if max_hierarchy_depth < 1 {
            anyhow::bail!("MAX_HIERARCHY_DEPTH must be at least 1");
        }

        Ok(Self {
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: var("DATABASE_MAX_CONNECTIONS", "10").parse().unwrap_or(10),
                min_connections: var("DATABASE_MIN_CONNECTIONS", "2").parse().unwrap_or(2),
                acquire_timeout_secs: var("DATABASE_ACQUIRE_TIMEOUT_SECS", "5")
                    .parse()
                    .unwrap_or(5),
            },
            telemetry: TelemetryConfig {
                log_format,
                service_name: var("SERVICE_NAME", "erp-access"),
                metrics_enabled: var("METRICS_ENABLED", "false")
                    .parse()
                    .context("Invalid METRICS_ENABLED")?,
                metrics_addr: var("METRICS_ADDR", "0.0.0.0:9464"),
            },
            access: AccessConfig {
                visible_modules_cache_ttl_secs: var("VISIBLE_MODULES_CACHE_TTL_SECS", "60")
                    .parse()
                    .context("Invalid VISIBLE_MODULES_CACHE_TTL_SECS")?,
                max_hierarchy_depth,
            },
        })
    }
}
