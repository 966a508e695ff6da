//! Server configuration from environment variables

use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_PORT: u16 = 3002;
pub const DEFAULT_SWEEP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `None` falls back to a database file under the platform data dir
    pub database_url: Option<String>,
    pub port: u16,
    /// Wall-clock budget for one tenant during the cron sweep
    pub sweep_timeout: Duration,
    /// Tenants evaluated at once during the cron sweep
    pub sweep_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            port: DEFAULT_PORT,
            sweep_timeout: Duration::from_millis(DEFAULT_SWEEP_TIMEOUT_MS),
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            config.database_url = Some(url);
        }
        if let Some(port) = lookup("PORT") {
            config.port = port.trim().parse().context("PORT must be a port number")?;
        }
        if let Some(ms) = lookup("COMPLIANCE_SWEEP_TIMEOUT_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .context("COMPLIANCE_SWEEP_TIMEOUT_MS must be a number of milliseconds")?;
            anyhow::ensure!(ms > 0, "COMPLIANCE_SWEEP_TIMEOUT_MS must be positive");
            config.sweep_timeout = Duration::from_millis(ms);
        }
        if let Some(concurrency) = lookup("COMPLIANCE_SWEEP_CONCURRENCY") {
            let concurrency: usize = concurrency
                .trim()
                .parse()
                .context("COMPLIANCE_SWEEP_CONCURRENCY must be a number")?;
            anyhow::ensure!(concurrency > 0, "COMPLIANCE_SWEEP_CONCURRENCY must be at least 1");
            config.sweep_concurrency = concurrency;
        }

        Ok(config)
    }
}
