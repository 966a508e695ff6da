//! Compliance evaluation and alerting engine
//!
//! Decides, for every driver and for a tenant as a whole, whether required
//! documents are present and in date, turns findings into deduplicated alert
//! rows, and records point-in-time snapshots.
//!
//! Pipeline:
//! 1. [`rules`] - rule resolution per role, with configured defaults
//! 2. [`classifier`] - status of a single document
//! 3. [`evaluator`] - one driver against its rules
//! 4. [`batch`] - many drivers from one rule read and one document read
//! 5. [`aggregate`] - tenant rollup
//! 6. [`alerts`] - idempotent alert reconciliation
//! 7. [`snapshot`] - append-only history
//!
//! All I/O goes through [`store::ComplianceStore`]; the caller owns the
//! transaction boundary and passes `now` explicitly.

pub mod aggregate;
pub mod alerts;
mod audit;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod memory;
pub mod rules;
pub mod snapshot;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use shared_types::{ComplianceRule, DriverDocument, DriverEvaluation, TenantEvaluation, TenantId};

pub use alerts::AlertReport;
pub use config::{EngineConfig, DEFAULT_ALERT_WINDOWS, DEFAULT_REQUIRED_DOCS};
pub use error::{ComplianceError, Result, StoreError};
pub use snapshot::SnapshotReport;
pub use store::ComplianceStore;

use rules::RuleBook;

/// ComplianceEngine entry point
#[derive(Debug, Clone)]
pub struct ComplianceEngine {
    config: EngineConfig,
}

impl ComplianceEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            config: config.validate()?,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rules for one role, or the configured defaults when none are stored.
    #[tracing::instrument(skip(self, store, tenant_id), fields(tenant = %tenant_id))]
    pub async fn get_compliance_rules<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        role: &str,
    ) -> Result<Vec<ComplianceRule>>
    where
        S: ComplianceStore + ?Sized,
    {
        let roles = [role.to_string()];
        let fetched = store.rules_for_roles(tenant_id, &roles).await?;
        Ok(RuleBook::resolve(tenant_id, &roles, fetched, &self.config)?.into_rules(role))
    }

    /// Documents for the given drivers in one read.
    pub async fn get_driver_documents<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        driver_ids: &[String],
    ) -> Result<Vec<DriverDocument>>
    where
        S: ComplianceStore + ?Sized,
    {
        if driver_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(store.documents_for_drivers(tenant_id, driver_ids).await?)
    }

    #[tracing::instrument(skip(self, store, tenant_id), fields(tenant = %tenant_id))]
    pub async fn evaluate_driver<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        driver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DriverEvaluation>
    where
        S: ComplianceStore + ?Sized,
    {
        let driver = store
            .drivers(tenant_id, &[driver_id.to_string()])
            .await?
            .into_iter()
            .find(|d| d.driver_id == driver_id)
            .ok_or_else(|| ComplianceError::DriverNotFound(driver_id.to_string()))?;

        let rules = self
            .get_compliance_rules(store, tenant_id, &driver.role)
            .await?;
        let documents = self
            .get_driver_documents(store, tenant_id, &[driver.driver_id.clone()])
            .await?;

        Ok(evaluator::evaluate_driver(
            &driver.driver_id,
            &rules,
            documents.iter().filter(|d| d.driver_id == driver.driver_id),
            now,
        ))
    }

    /// Evaluate a set of drivers with one rule read and one document read.
    ///
    /// Ids that do not resolve to a driver of this tenant are left out of the result.
    #[tracing::instrument(skip(self, store, tenant_id, driver_ids), fields(tenant = %tenant_id, requested = driver_ids.len()))]
    pub async fn evaluate_drivers_batch<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        driver_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, DriverEvaluation>>
    where
        S: ComplianceStore + ?Sized,
    {
        let unique: Vec<String> = driver_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(BTreeMap::new());
        }

        let drivers = store.drivers(tenant_id, &unique).await?;
        if drivers.len() < unique.len() {
            tracing::warn!(
                tenant = %tenant_id,
                requested = unique.len(),
                found = drivers.len(),
                "some requested drivers do not exist"
            );
        }

        let input = self.load_batch(store, tenant_id, drivers).await?;
        Ok(input.evaluate(now))
    }

    /// Tenant rollup over every active, non-deleted driver.
    #[tracing::instrument(skip(self, store, tenant_id), fields(tenant = %tenant_id))]
    pub async fn evaluate_tenant<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<TenantEvaluation>
    where
        S: ComplianceStore + ?Sized,
    {
        let evaluations = self.evaluate_active_drivers(store, tenant_id, now).await?;
        let summary = aggregate::aggregate(evaluations.values(), self.config.top_issues_limit);

        tracing::info!(
            tenant = %tenant_id,
            total = summary.total_drivers,
            compliant = summary.compliant_drivers,
            percentage = summary.compliance_percentage,
            "tenant compliance evaluated"
        );
        Ok(summary)
    }

    pub(crate) async fn evaluate_active_drivers<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, DriverEvaluation>>
    where
        S: ComplianceStore + ?Sized,
    {
        let drivers = store.active_drivers(tenant_id).await?;
        let input = self.load_batch(store, tenant_id, drivers).await?;
        Ok(input.evaluate(now))
    }
}

impl Default for ComplianceEngine {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }
}
