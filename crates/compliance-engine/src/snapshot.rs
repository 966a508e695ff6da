//! Append-only compliance snapshots

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use shared_types::{AuditAction, ComplianceSnapshot, DriverEvaluation, TenantEvaluation, TenantId};

use crate::aggregate::aggregate;
use crate::error::{ComplianceError, Result, StoreError};
use crate::store::ComplianceStore;
use crate::ComplianceEngine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub created: u32,
    pub errors: u32,
}

pub fn driver_snapshot(
    tenant_id: &TenantId,
    evaluation: &DriverEvaluation,
    computed_at: DateTime<Utc>,
) -> Result<ComplianceSnapshot> {
    Ok(ComplianceSnapshot {
        tenant_id: tenant_id.clone(),
        driver_id: Some(evaluation.driver_id.clone()),
        compliance_score: evaluation.compliance_score,
        compliant: evaluation.compliant,
        expired_count: evaluation.expired_count,
        expiring_count: evaluation.expiring_count,
        missing_count: evaluation.missing_count,
        computed_at,
        details_json: serde_json::to_value(evaluation)?,
    })
}

/// Tenant rollup row: the score is the compliance percentage and the
/// tenant is compliant only when no driver is non-compliant.
pub fn tenant_snapshot(
    tenant_id: &TenantId,
    evaluation: &TenantEvaluation,
    computed_at: DateTime<Utc>,
) -> Result<ComplianceSnapshot> {
    Ok(ComplianceSnapshot {
        tenant_id: tenant_id.clone(),
        driver_id: None,
        compliance_score: evaluation.compliance_percentage,
        compliant: evaluation.non_compliant_drivers == 0,
        expired_count: evaluation.expired_count,
        expiring_count: evaluation.expiring_count,
        missing_count: evaluation.missing_count,
        computed_at,
        details_json: serde_json::to_value(evaluation)?,
    })
}

impl ComplianceEngine {
    /// Record one snapshot: a driver row for `Some(driver_id)`, the tenant
    /// rollup row for `None`.
    #[tracing::instrument(skip(self, store, tenant_id), fields(tenant = %tenant_id))]
    pub async fn create_snapshot<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        driver_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SnapshotReport>
    where
        S: ComplianceStore + ?Sized,
    {
        let snapshot = match driver_id {
            Some(driver_id) => {
                let evaluation = self.evaluate_driver(store, tenant_id, driver_id, now).await?;
                driver_snapshot(tenant_id, &evaluation, now)?
            }
            None => {
                let evaluation = self.evaluate_tenant(store, tenant_id, now).await?;
                tenant_snapshot(tenant_id, &evaluation, now)?
            }
        };

        store.insert_snapshot(&snapshot).await?;
        Ok(SnapshotReport {
            created: 1,
            errors: 0,
        })
    }

    /// One row per active driver plus exactly one tenant row.
    ///
    /// Per-driver failures are counted and do not stop the others.
    #[tracing::instrument(skip(self, store, tenant_id), fields(tenant = %tenant_id))]
    pub async fn snapshot_all_drivers<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<SnapshotReport>
    where
        S: ComplianceStore + ?Sized,
    {
        let evaluations = self.evaluate_active_drivers(store, tenant_id, now).await?;
        let summary = aggregate(evaluations.values(), self.config.top_issues_limit);

        let mut report = SnapshotReport::default();
        // a row that cannot be built will fail the same way on retry
        let mut all_retryable = true;
        let mut rows = Vec::with_capacity(evaluations.len() + 1);
        for evaluation in evaluations.values() {
            match driver_snapshot(tenant_id, evaluation, now) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(driver_id = %evaluation.driver_id, error = %e, "failed to build driver snapshot");
                    report.errors += 1;
                    all_retryable = false;
                }
            }
        }
        match tenant_snapshot(tenant_id, &summary, now) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!(error = %e, "failed to build tenant snapshot");
                report.errors += 1;
                all_retryable = false;
            }
        }

        let results: Vec<std::result::Result<(), StoreError>> = stream::iter(rows)
            .map(|row| async move {
                let result = store.insert_snapshot(&row).await;
                if let Err(e) = &result {
                    tracing::warn!(
                        driver_id = row.driver_id.as_deref().unwrap_or("<tenant>"),
                        error = %e,
                        "failed to record compliance snapshot"
                    );
                }
                result
            })
            .buffer_unordered(self.config.write_concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                Ok(()) => report.created += 1,
                Err(e) => {
                    report.errors += 1;
                    all_retryable &= e.is_retryable();
                }
            }
        }

        if report.created == 0 && report.errors > 0 {
            tracing::error!(tenant = %tenant_id, failed = report.errors, "every snapshot failed");
            return Err(ComplianceError::AllUnitsFailed {
                operation: "snapshot all drivers",
                failed: report.errors,
                retryable: all_retryable,
            });
        }

        self.record_audit(
            store,
            tenant_id,
            AuditAction::SnapshotsRecorded {
                created: report.created,
                errors: report.errors,
            },
            now,
        )
        .await;

        tracing::info!(
            tenant = %tenant_id,
            drivers = evaluations.len(),
            created = report.created,
            errors = report.errors,
            "compliance snapshots recorded"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared_types::IssueCount;
    use std::collections::BTreeSet;

    fn tenant() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    #[test]
    fn test_driver_snapshot_carries_details() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let evaluation = DriverEvaluation {
            driver_id: "drv-1".to_string(),
            compliant: false,
            compliance_score: 50,
            expired_count: 1,
            expiring_count: 0,
            missing_count: 0,
            documents: vec![],
            missing_required_docs: BTreeSet::new(),
        };

        let row = driver_snapshot(&tenant(), &evaluation, at).unwrap();
        assert_eq!(row.driver_id.as_deref(), Some("drv-1"));
        assert_eq!(row.compliance_score, 50);
        assert_eq!(row.computed_at, at);
        assert_eq!(row.details_json["driver_id"], "drv-1");
        assert_eq!(row.details_json["expired_count"], 1);
    }

    #[test]
    fn test_tenant_snapshot_uses_percentage() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let summary = TenantEvaluation {
            total_drivers: 3,
            compliant_drivers: 2,
            non_compliant_drivers: 1,
            compliance_percentage: 67,
            expired_count: 0,
            expiring_count: 1,
            missing_count: 1,
            top_issues: vec![IssueCount {
                doc_type: "license".to_string(),
                count: 2,
            }],
        };

        let row = tenant_snapshot(&tenant(), &summary, at).unwrap();
        assert!(row.driver_id.is_none());
        assert_eq!(row.compliance_score, 67);
        assert!(!row.compliant);
        assert_eq!(row.details_json["top_issues"][0]["doc_type"], "license");
    }
}
