//! Batch evaluation: one rule read and one document read for a whole driver set,
//! then an in-memory fan-out over [`crate::evaluator::evaluate_driver`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use shared_types::{DriverDocument, DriverEvaluation, DriverRecord, TenantId};

use crate::error::Result;
use crate::evaluator::evaluate_driver;
use crate::rules::RuleBook;
use crate::store::ComplianceStore;
use crate::ComplianceEngine;

/// Everything needed to evaluate a set of drivers without further I/O
#[derive(Debug, Clone, Default)]
pub struct BatchInput {
    pub drivers: Vec<DriverRecord>,
    pub rules: RuleBook,
    pub documents: Vec<DriverDocument>,
}

impl BatchInput {
    /// Evaluate every driver in the batch. Drivers with no documents are
    /// included and come out fully missing.
    pub fn evaluate(&self, now: DateTime<Utc>) -> BTreeMap<String, DriverEvaluation> {
        let mut by_driver: HashMap<&str, Vec<&DriverDocument>> = HashMap::new();
        for doc in &self.documents {
            by_driver.entry(doc.driver_id.as_str()).or_default().push(doc);
        }

        self.drivers
            .iter()
            .map(|driver| {
                let docs = by_driver
                    .get(driver.driver_id.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let evaluation = evaluate_driver(
                    &driver.driver_id,
                    self.rules.rules_for(&driver.role),
                    docs.iter().copied(),
                    now,
                );
                (driver.driver_id.clone(), evaluation)
            })
            .collect()
    }
}

impl ComplianceEngine {
    /// Fetch rules and documents for `drivers` with exactly one read each.
    pub(crate) async fn load_batch<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        drivers: Vec<DriverRecord>,
    ) -> Result<BatchInput>
    where
        S: ComplianceStore + ?Sized,
    {
        if drivers.is_empty() {
            return Ok(BatchInput::default());
        }

        let roles: Vec<String> = drivers
            .iter()
            .map(|d| d.role.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let fetched = store.rules_for_roles(tenant_id, &roles).await?;
        let rules = RuleBook::resolve(tenant_id, &roles, fetched, &self.config)?;

        let driver_ids: Vec<String> = drivers.iter().map(|d| d.driver_id.clone()).collect();
        let documents = store.documents_for_drivers(tenant_id, &driver_ids).await?;

        tracing::debug!(
            tenant = %tenant_id,
            drivers = drivers.len(),
            roles = roles.len(),
            documents = documents.len(),
            "loaded compliance batch"
        );

        Ok(BatchInput {
            drivers,
            rules,
            documents,
        })
    }
}
