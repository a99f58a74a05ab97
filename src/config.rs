use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub upstream: UpstreamConfig,
    pub rate_limit: RateLimitConfig,
    pub monitoring: MonitoringConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Master switch for the scheduled fan-out.
    pub enabled: bool,
    /// Run one full cycle immediately at process start.
    pub run_at_boot: bool,
    pub cycle_interval_seconds: u64,
    /// Worker tasks polling cells in parallel within one cycle.
    pub concurrency: usize,
    /// Pause after each cell before a worker takes the next one.
    pub task_delay_ms: u64,
    /// Index-derived startup spreading so workers don't fire in lockstep.
    pub start_jitter_ms: u64,
    pub jitter_bucket: usize,
    /// How far the fallback walk may reach into the past.
    pub lookback_hours: u32,
    /// Publication-lag allowance subtracted before slot truncation.
    pub grace_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Optional alternate endpoint tried once when the primary is
    /// unreachable at the connection level.
    #[serde(default)]
    pub fallback_base_url: Option<String>,
    pub timeout_seconds: u64,
    pub rows_per_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum wall-clock gap between any two outbound calls, across the
    /// whole fan-out.
    pub min_interval_ms: u64,
    /// Additional attempts after the first, for retriable failures only.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Secrets loaded exclusively from environment variables.
/// Not serializable, not stored in config files.
pub struct Secrets {
    pub service_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            service_key: std::env::var("WEATHER_API_KEY").ok(),
        }
    }
}

impl AppConfig {
    /// Load configuration from config/default.toml, overlaying environment variables for secrets.
    pub fn load() -> Result<(Self, Secrets)> {
        dotenvy::dotenv().ok();

        let config_path = Path::new("config/default.toml");
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: AppConfig =
            toml::from_str(&contents).context("Failed to parse config/default.toml")?;

        let secrets = Secrets::from_env();

        Ok((config, secrets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_config() {
        let contents = std::fs::read_to_string("config/default.toml")
            .expect("config/default.toml should exist");
        let config: AppConfig = toml::from_str(&contents).expect("should parse");
        assert!(config.ingest.enabled);
        assert_eq!(config.ingest.cycle_interval_seconds, 600);
        assert_eq!(config.ingest.concurrency, 6);
        assert_eq!(config.ingest.lookback_hours, 1);
        assert_eq!(config.rate_limit.max_retries, 2);
        assert!(config.upstream.fallback_base_url.is_none());
    }
}
