//! Storage port for the compliance engine.
//! Implemented by the service host's SQLite store and by [`crate::memory::MemoryStore`];
//! the engine depends only on this trait.

use std::collections::HashSet;

use async_trait::async_trait;
use shared_types::{
    AuditEntry, ComplianceAlert, ComplianceRule, ComplianceSnapshot, DriverDocument, DriverRecord,
    TenantId,
};

use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Tenant-scoped reads and append-only writes used by the engine.
///
/// Every call carries the tenant explicitly. Implementations must never
/// return rows belonging to another tenant.
#[async_trait]
pub trait ComplianceStore: Send + Sync {
    /// Active rules for any of the given roles, in one read.
    async fn rules_for_roles(
        &self,
        tenant_id: &TenantId,
        roles: &[String],
    ) -> StoreResult<Vec<ComplianceRule>>;

    /// Driver records for the given ids. Unknown ids are simply absent.
    async fn drivers(
        &self,
        tenant_id: &TenantId,
        driver_ids: &[String],
    ) -> StoreResult<Vec<DriverRecord>>;

    /// Drivers that are active and not soft-deleted.
    async fn active_drivers(&self, tenant_id: &TenantId) -> StoreResult<Vec<DriverRecord>>;

    /// All compliance documents for the given drivers, in one read.
    async fn documents_for_drivers(
        &self,
        tenant_id: &TenantId,
        driver_ids: &[String],
    ) -> StoreResult<Vec<DriverDocument>>;

    /// Dedupe keys of every alert already recorded for the tenant.
    async fn alert_dedupe_keys(&self, tenant_id: &TenantId) -> StoreResult<HashSet<String>>;

    /// Insert one alert row. A duplicate dedupe key must fail with [`StoreError::Conflict`].
    async fn insert_alert(&self, alert: &ComplianceAlert) -> StoreResult<()>;

    async fn insert_snapshot(&self, snapshot: &ComplianceSnapshot) -> StoreResult<()>;

    /// Hash of the tenant's most recent audit entry, if any.
    async fn last_audit_hash(&self, tenant_id: &TenantId) -> StoreResult<Option<String>>;

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Every tenant known to storage. Used by the multi-tenant sweep.
    async fn tenant_ids(&self) -> StoreResult<Vec<TenantId>>;
}
