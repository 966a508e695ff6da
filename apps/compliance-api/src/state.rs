//! Application state for the compliance API

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use compliance_engine::{ComplianceEngine, EngineConfig};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::ServerConfig;
use crate::store::SqliteStore;

pub struct AppState {
    pub store: SqliteStore,
    pub engine: ComplianceEngine,
    pub config: ServerConfig,
}

impl AppState {
    pub async fn new(config: ServerConfig, engine_config: EngineConfig) -> Result<Self> {
        let engine = ComplianceEngine::new(engine_config)?;

        let db_url = match &config.database_url {
            Some(url) => url.clone(),
            None => {
                let data_dir = default_data_dir();
                std::fs::create_dir_all(&data_dir)
                    .with_context(|| format!("creating {}", data_dir.display()))?;
                format!("sqlite:{}", data_dir.join("compliance.db").display())
            }
        };

        tracing::info!("Connecting to database: {}", db_url);

        // A writer waiting on the lock gives up once its tenant budget is spent anyway
        let pool = connect(&db_url, config.sweep_timeout).await?;

        let store = SqliteStore::new(pool, engine.config().default_role.clone());
        store.migrate().await?;

        Ok(Self {
            store,
            engine,
            config,
        })
    }
}

/// Open a WAL-mode pool whose writers wait up to `busy_timeout` for the lock.
pub async fn connect(db_url: &str, busy_timeout: Duration) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("invalid database url {db_url}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// `$XDG_DATA_HOME/compliance-api`, then `~/.local/share/compliance-api`, then `./data`.
fn default_data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .map(|base| base.join("compliance-api"))
        .unwrap_or_else(|| PathBuf::from("data"))
}
