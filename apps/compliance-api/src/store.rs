//! SQLite-backed compliance storage
//!
//! Every request works inside one [`TenantUnit`]: a transaction the handler
//! commits on success. Dropping the unit rolls everything back, which is what
//! happens to a tenant whose sweep runs past its budget.

use std::collections::HashSet;

use async_trait::async_trait;
use compliance_engine::store::{ComplianceStore, StoreResult};
use compliance_engine::StoreError;
use shared_types::{
    AuditEntry, ComplianceAlert, ComplianceRule, ComplianceSnapshot, DriverDocument, DriverRecord,
    TenantId,
};
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use tokio::sync::Mutex;

use crate::models::{DbDocument, DbDriver, DbRule};

/// Ids bound per `IN (...)` list, well under SQLite's variable limit
const BIND_CHUNK: usize = 500;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS compliance_rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL,
        role TEXT NOT NULL,
        doc_type TEXT NOT NULL,
        required INTEGER NOT NULL DEFAULT 1,
        grace_days INTEGER NOT NULL DEFAULT 0,
        alert_windows TEXT NOT NULL DEFAULT '[30,15,7]',
        active INTEGER NOT NULL DEFAULT 1,
        UNIQUE (tenant_id, role, doc_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS drivers (
        tenant_id TEXT NOT NULL,
        driver_id TEXT NOT NULL,
        role TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        deleted_at TEXT,
        PRIMARY KEY (tenant_id, driver_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS driver_documents (
        tenant_id TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        driver_id TEXT NOT NULL,
        doc_type TEXT NOT NULL,
        expires_at TEXT,
        PRIMARY KEY (tenant_id, doc_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_driver_documents_driver
        ON driver_documents(tenant_id, driver_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS compliance_alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL,
        driver_id TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        alert_type TEXT NOT NULL,
        alert_window_days INTEGER NOT NULL,
        sent_at TEXT NOT NULL,
        channel TEXT NOT NULL,
        dedupe_key TEXT NOT NULL,
        UNIQUE (tenant_id, dedupe_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS compliance_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL,
        driver_id TEXT,
        compliance_score INTEGER NOT NULL,
        compliant INTEGER NOT NULL,
        expired_count INTEGER NOT NULL,
        expiring_count INTEGER NOT NULL,
        missing_count INTEGER NOT NULL,
        computed_at TEXT NOT NULL,
        details_json TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_compliance_snapshots_tenant
        ON compliance_snapshots(tenant_id, computed_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS compliance_audit_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL UNIQUE,
        tenant_id TEXT NOT NULL,
        recorded_at TEXT NOT NULL,
        action TEXT NOT NULL,
        actor TEXT NOT NULL,
        previous_hash TEXT,
        details TEXT,
        entry_hash TEXT NOT NULL
    )
    "#,
];

/// Classify a driver error as connectivity, constraint or query failure.
fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        e @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    default_role: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, default_role: impl Into<String>) -> Self {
        Self {
            pool,
            default_role: default_role.into(),
        }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        tracing::info!("Running database migrations...");
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Open a read unit. Nothing it writes is visible until [`TenantUnit::commit`].
    pub async fn begin(&self) -> StoreResult<TenantUnit> {
        let tx = self.pool.begin().await.map_err(store_error)?;
        Ok(self.unit(tx))
    }

    /// Open a unit that holds the database write lock from its first statement.
    ///
    /// A deferred transaction that reads before writing cannot wait for the
    /// lock: SQLite fails its upgrade with `SQLITE_BUSY` while another writer
    /// is active. Taking the lock up front lets concurrent writers queue on
    /// the busy timeout instead.
    pub async fn begin_write(&self) -> StoreResult<TenantUnit> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(store_error)?;
        Ok(self.unit(tx))
    }

    fn unit(&self, tx: Transaction<'static, Sqlite>) -> TenantUnit {
        TenantUnit {
            tx: Mutex::new(tx),
            default_role: self.default_role.clone(),
        }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// One transaction, usable as a [`ComplianceStore`]
pub struct TenantUnit {
    tx: Mutex<Transaction<'static, Sqlite>>,
    default_role: String,
}

impl TenantUnit {
    pub async fn commit(self) -> StoreResult<()> {
        self.tx.into_inner().commit().await.map_err(store_error)
    }
}

#[async_trait]
impl ComplianceStore for TenantUnit {
    async fn rules_for_roles(
        &self,
        tenant_id: &TenantId,
        roles: &[String],
    ) -> StoreResult<Vec<ComplianceRule>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT tenant_id, role, doc_type, required, grace_days, alert_windows \
             FROM compliance_rules WHERE active = 1 AND tenant_id = ",
        );
        qb.push_bind(tenant_id.as_str().to_string());
        qb.push(" AND role IN (");
        let mut separated = qb.separated(", ");
        for role in roles {
            separated.push_bind(role.clone());
        }
        separated.push_unseparated(")");

        let mut tx = self.tx.lock().await;
        let rows: Vec<DbRule> = qb
            .build_query_as()
            .fetch_all(&mut **tx)
            .await
            .map_err(store_error)?;

        rows.into_iter().map(DbRule::into_rule).collect()
    }

    async fn drivers(
        &self,
        tenant_id: &TenantId,
        driver_ids: &[String],
    ) -> StoreResult<Vec<DriverRecord>> {
        let mut records = Vec::with_capacity(driver_ids.len());
        let mut tx = self.tx.lock().await;

        for chunk in driver_ids.chunks(BIND_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT driver_id, role, active, deleted_at FROM drivers WHERE tenant_id = ",
            );
            qb.push_bind(tenant_id.as_str().to_string());
            qb.push(" AND driver_id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.clone());
            }
            separated.push_unseparated(")");

            let rows: Vec<DbDriver> = qb
                .build_query_as()
                .fetch_all(&mut **tx)
                .await
                .map_err(store_error)?;
            for row in rows {
                records.push(row.into_record(&self.default_role)?);
            }
        }

        Ok(records)
    }

    async fn active_drivers(&self, tenant_id: &TenantId) -> StoreResult<Vec<DriverRecord>> {
        let mut tx = self.tx.lock().await;
        let rows: Vec<DbDriver> = sqlx::query_as(
            r#"
            SELECT driver_id, role, active, deleted_at
            FROM drivers
            WHERE tenant_id = ? AND active = 1 AND deleted_at IS NULL
            ORDER BY driver_id
            "#,
        )
        .bind(tenant_id.as_str())
        .fetch_all(&mut **tx)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| row.into_record(&self.default_role))
            .collect()
    }

    async fn documents_for_drivers(
        &self,
        tenant_id: &TenantId,
        driver_ids: &[String],
    ) -> StoreResult<Vec<DriverDocument>> {
        let mut documents = Vec::new();
        let mut tx = self.tx.lock().await;

        for chunk in driver_ids.chunks(BIND_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT doc_id, driver_id, doc_type, expires_at \
                 FROM driver_documents WHERE tenant_id = ",
            );
            qb.push_bind(tenant_id.as_str().to_string());
            qb.push(" AND driver_id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.clone());
            }
            separated.push_unseparated(")");

            let rows: Vec<DbDocument> = qb
                .build_query_as()
                .fetch_all(&mut **tx)
                .await
                .map_err(store_error)?;
            for row in rows {
                documents.push(row.into_document()?);
            }
        }

        Ok(documents)
    }

    async fn alert_dedupe_keys(&self, tenant_id: &TenantId) -> StoreResult<HashSet<String>> {
        let mut tx = self.tx.lock().await;
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT dedupe_key FROM compliance_alerts WHERE tenant_id = ?")
                .bind(tenant_id.as_str())
                .fetch_all(&mut **tx)
                .await
                .map_err(store_error)?;
        Ok(keys.into_iter().collect())
    }

    async fn insert_alert(&self, alert: &ComplianceAlert) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        sqlx::query(
            r#"
            INSERT INTO compliance_alerts
                (tenant_id, driver_id, doc_id, alert_type, alert_window_days, sent_at, channel, dedupe_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.tenant_id.as_str())
        .bind(&alert.driver_id)
        .bind(&alert.doc_id)
        .bind(alert.alert_type.as_str())
        .bind(i64::from(alert.alert_window_days))
        .bind(alert.sent_at.to_rfc3339())
        .bind(&alert.channel)
        .bind(&alert.dedupe_key)
        .execute(&mut **tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &ComplianceSnapshot) -> StoreResult<()> {
        let details = serde_json::to_string(&snapshot.details_json).map_err(|e| {
            StoreError::InvalidRow {
                table: "compliance_snapshots",
                reason: e.to_string(),
            }
        })?;

        let mut tx = self.tx.lock().await;
        sqlx::query(
            r#"
            INSERT INTO compliance_snapshots
                (tenant_id, driver_id, compliance_score, compliant, expired_count,
                 expiring_count, missing_count, computed_at, details_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.tenant_id.as_str())
        .bind(snapshot.driver_id.as_deref())
        .bind(i64::from(snapshot.compliance_score))
        .bind(snapshot.compliant)
        .bind(i64::from(snapshot.expired_count))
        .bind(i64::from(snapshot.expiring_count))
        .bind(i64::from(snapshot.missing_count))
        .bind(snapshot.computed_at.to_rfc3339())
        .bind(details)
        .execute(&mut **tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn last_audit_hash(&self, tenant_id: &TenantId) -> StoreResult<Option<String>> {
        let mut tx = self.tx.lock().await;
        sqlx::query_scalar(
            r#"
            SELECT entry_hash FROM compliance_audit_log
            WHERE tenant_id = ?
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(store_error)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        let action = serde_json::to_string(&entry.action).map_err(|e| StoreError::InvalidRow {
            table: "compliance_audit_log",
            reason: e.to_string(),
        })?;

        let mut tx = self.tx.lock().await;
        sqlx::query(
            r#"
            INSERT INTO compliance_audit_log
                (event_id, tenant_id, recorded_at, action, actor, previous_hash, details, entry_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.event_id)
        .bind(entry.tenant_id.as_str())
        .bind(entry.recorded_at.to_rfc3339())
        .bind(action)
        .bind(&entry.actor)
        .bind(entry.previous_hash.as_deref())
        .bind(entry.details.as_deref())
        .bind(entry.compute_hash())
        .execute(&mut **tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn tenant_ids(&self) -> StoreResult<Vec<TenantId>> {
        let mut tx = self.tx.lock().await;
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT tenant_id FROM drivers
            UNION
            SELECT tenant_id FROM compliance_rules
            ORDER BY tenant_id
            "#,
        )
        .fetch_all(&mut **tx)
        .await
        .map_err(store_error)?;

        ids.into_iter()
            .map(|id| {
                TenantId::new(id).map_err(|e| StoreError::InvalidRow {
                    table: "drivers",
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}
