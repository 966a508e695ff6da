//! Seeding helpers for tests against an in-memory database

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::store::SqliteStore;

/// A migrated store on a single-connection in-memory database.
pub async fn memory_store() -> SqliteStore {
    // One connection: every new in-memory connection is a separate database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteStore::new(pool, "driver");
    store.migrate().await.unwrap();
    store
}

pub async fn seed_rule(pool: &SqlitePool, tenant: &str, role: &str, doc_type: &str, windows: &str) {
    sqlx::query(
        "INSERT INTO compliance_rules (tenant_id, role, doc_type, required, grace_days, alert_windows) \
         VALUES (?, ?, ?, 1, 0, ?)",
    )
    .bind(tenant)
    .bind(role)
    .bind(doc_type)
    .bind(windows)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_driver(pool: &SqlitePool, tenant: &str, driver_id: &str, role: Option<&str>) {
    sqlx::query("INSERT INTO drivers (tenant_id, driver_id, role, active) VALUES (?, ?, ?, 1)")
        .bind(tenant)
        .bind(driver_id)
        .bind(role)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_document(
    pool: &SqlitePool,
    tenant: &str,
    doc_id: &str,
    driver_id: &str,
    doc_type: &str,
    expires_at: Option<&str>,
) {
    sqlx::query(
        "INSERT INTO driver_documents (tenant_id, doc_id, driver_id, doc_type, expires_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(tenant)
    .bind(doc_id)
    .bind(driver_id)
    .bind(doc_type)
    .bind(expires_at)
    .execute(pool)
    .await
    .unwrap();
}
