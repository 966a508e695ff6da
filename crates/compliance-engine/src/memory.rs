//! In-memory [`ComplianceStore`] for tests and embedded use
//!
//! Counts rule and document reads so callers can assert the batch path never
//! fans out per driver, and can be told to fail specific inserts.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use shared_types::{
    AuditEntry, ComplianceAlert, ComplianceRule, ComplianceSnapshot, DriverDocument, DriverRecord,
    TenantId,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{ComplianceStore, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    rules: Vec<ComplianceRule>,
    drivers: HashMap<TenantId, Vec<DriverRecord>>,
    documents: HashMap<TenantId, Vec<DriverDocument>>,
    alerts: Vec<ComplianceAlert>,
    snapshots: Vec<ComplianceSnapshot>,
    audit: Vec<AuditEntry>,
    failing_alert_keys: HashSet<String>,
    failing_snapshot_drivers: HashSet<Option<String>>,
    unavailable: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    rule_reads: AtomicUsize,
    document_reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_rule(&self, rule: ComplianceRule) {
        self.tables.write().await.rules.push(rule);
    }

    pub async fn add_driver(&self, tenant_id: &TenantId, driver: DriverRecord) {
        self.tables
            .write()
            .await
            .drivers
            .entry(tenant_id.clone())
            .or_default()
            .push(driver);
    }

    pub async fn add_document(&self, tenant_id: &TenantId, document: DriverDocument) {
        self.tables
            .write()
            .await
            .documents
            .entry(tenant_id.clone())
            .or_default()
            .push(document);
    }

    /// Make every insert of this dedupe key fail.
    pub async fn fail_alert(&self, dedupe_key: &str) {
        self.tables
            .write()
            .await
            .failing_alert_keys
            .insert(dedupe_key.to_string());
    }

    /// Make snapshot inserts for this driver fail; `None` targets the tenant row.
    pub async fn fail_snapshot(&self, driver_id: Option<&str>) {
        self.tables
            .write()
            .await
            .failing_snapshot_drivers
            .insert(driver_id.map(str::to_string));
    }

    /// Make every call fail as if the backend were unreachable.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.tables.write().await.unavailable = unavailable;
    }

    pub async fn alerts(&self, tenant_id: &TenantId) -> Vec<ComplianceAlert> {
        let tables = self.tables.read().await;
        tables
            .alerts
            .iter()
            .filter(|a| &a.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn snapshots(&self, tenant_id: &TenantId) -> Vec<ComplianceSnapshot> {
        let tables = self.tables.read().await;
        tables
            .snapshots
            .iter()
            .filter(|s| &s.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn audit_log(&self, tenant_id: &TenantId) -> Vec<AuditEntry> {
        let tables = self.tables.read().await;
        tables
            .audit
            .iter()
            .filter(|e| &e.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn rule_reads(&self) -> usize {
        self.rule_reads.load(Ordering::SeqCst)
    }

    pub fn document_reads(&self) -> usize {
        self.document_reads.load(Ordering::SeqCst)
    }
}

fn check_available(tables: &Tables) -> StoreResult<()> {
    if tables.unavailable {
        Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl ComplianceStore for MemoryStore {
    async fn rules_for_roles(
        &self,
        tenant_id: &TenantId,
        roles: &[String],
    ) -> StoreResult<Vec<ComplianceRule>> {
        self.rule_reads.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read().await;
        check_available(&tables)?;
        Ok(tables
            .rules
            .iter()
            .filter(|r| &r.tenant_id == tenant_id && roles.contains(&r.role))
            .cloned()
            .collect())
    }

    async fn drivers(
        &self,
        tenant_id: &TenantId,
        driver_ids: &[String],
    ) -> StoreResult<Vec<DriverRecord>> {
        let tables = self.tables.read().await;
        check_available(&tables)?;
        Ok(tables
            .drivers
            .get(tenant_id)
            .map(|drivers| {
                drivers
                    .iter()
                    .filter(|d| driver_ids.contains(&d.driver_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn active_drivers(&self, tenant_id: &TenantId) -> StoreResult<Vec<DriverRecord>> {
        let tables = self.tables.read().await;
        check_available(&tables)?;
        Ok(tables
            .drivers
            .get(tenant_id)
            .map(|drivers| drivers.iter().filter(|d| d.is_evaluable()).cloned().collect())
            .unwrap_or_default())
    }

    async fn documents_for_drivers(
        &self,
        tenant_id: &TenantId,
        driver_ids: &[String],
    ) -> StoreResult<Vec<DriverDocument>> {
        self.document_reads.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read().await;
        check_available(&tables)?;
        Ok(tables
            .documents
            .get(tenant_id)
            .map(|docs| {
                docs.iter()
                    .filter(|d| driver_ids.contains(&d.driver_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn alert_dedupe_keys(&self, tenant_id: &TenantId) -> StoreResult<HashSet<String>> {
        let tables = self.tables.read().await;
        check_available(&tables)?;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| &a.tenant_id == tenant_id)
            .map(|a| a.dedupe_key.clone())
            .collect())
    }

    async fn insert_alert(&self, alert: &ComplianceAlert) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        check_available(&tables)?;
        if tables.failing_alert_keys.contains(&alert.dedupe_key) {
            return Err(StoreError::Query(format!(
                "injected failure for {}",
                alert.dedupe_key
            )));
        }
        if tables
            .alerts
            .iter()
            .any(|a| a.tenant_id == alert.tenant_id && a.dedupe_key == alert.dedupe_key)
        {
            return Err(StoreError::Conflict(alert.dedupe_key.clone()));
        }
        tables.alerts.push(alert.clone());
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &ComplianceSnapshot) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        check_available(&tables)?;
        if tables.failing_snapshot_drivers.contains(&snapshot.driver_id) {
            return Err(StoreError::Query(format!(
                "injected failure for {:?}",
                snapshot.driver_id
            )));
        }
        tables.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn last_audit_hash(&self, tenant_id: &TenantId) -> StoreResult<Option<String>> {
        let tables = self.tables.read().await;
        check_available(&tables)?;
        Ok(tables
            .audit
            .iter()
            .rev()
            .find(|e| &e.tenant_id == tenant_id)
            .map(AuditEntry::compute_hash))
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        check_available(&tables)?;
        tables.audit.push(entry.clone());
        Ok(())
    }

    async fn tenant_ids(&self) -> StoreResult<Vec<TenantId>> {
        let tables = self.tables.read().await;
        check_available(&tables)?;
        let mut tenants: BTreeSet<TenantId> = tables.drivers.keys().cloned().collect();
        tenants.extend(tables.rules.iter().map(|r| r.tenant_id.clone()));
        Ok(tenants.into_iter().collect())
    }
}
