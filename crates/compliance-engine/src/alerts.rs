//! Alert reconciliation
//!
//! Every (driver, document, alert type, window) condition that currently
//! holds maps to one dedupe key. Only keys not yet recorded for the tenant
//! are inserted, so repeated runs with no time advance insert nothing and
//! later runs add rows only as documents cross further thresholds.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use shared_types::{
    AlertCandidate, AlertType, AuditAction, ComplianceAlert, DocumentStatus, TenantId,
};

use crate::batch::BatchInput;
use crate::error::{ComplianceError, Result, StoreError};
use crate::store::ComplianceStore;
use crate::ComplianceEngine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertReport {
    pub sent: u32,
    pub skipped: u32,
    pub errors: u32,
}

/// Required documents that are expired or expiring, across the whole batch.
pub fn collect_candidates(input: &BatchInput, now: DateTime<Utc>) -> Vec<AlertCandidate> {
    let evaluations = input.evaluate(now);
    let mut candidates = Vec::new();

    for driver in &input.drivers {
        let Some(evaluation) = evaluations.get(&driver.driver_id) else {
            continue;
        };
        let rules = input.rules.rules_for(&driver.role);

        for doc in &evaluation.documents {
            if !doc.is_required
                || !matches!(doc.status, DocumentStatus::Expired | DocumentStatus::Expiring)
            {
                continue;
            }
            let (Some(doc_id), Some(rule)) = (
                doc.doc_id.as_ref(),
                rules.iter().find(|r| r.doc_type == doc.doc_type),
            ) else {
                continue;
            };

            candidates.push(AlertCandidate {
                driver_id: driver.driver_id.clone(),
                doc_id: doc_id.clone(),
                doc_type: doc.doc_type.clone(),
                status: doc.status,
                expires_at: doc.expires_at,
                days_until_expiry: doc.days_until_expiry,
                alert_windows: rule.alert_windows.clone(),
            });
        }
    }

    candidates
}

/// Alerts that the candidate's current condition warrants.
///
/// An expired document yields a single `expired` alert with window 0. An
/// expiring document yields one `expiring` alert per window it has crossed.
pub fn planned_alerts(
    tenant_id: &TenantId,
    candidate: &AlertCandidate,
    channel: &str,
    now: DateTime<Utc>,
) -> Vec<ComplianceAlert> {
    let conditions: Vec<(AlertType, u32)> = match (candidate.status, candidate.days_until_expiry) {
        (DocumentStatus::Expired, _) => vec![(AlertType::Expired, 0)],
        (DocumentStatus::Expiring, Some(days)) => candidate
            .alert_windows
            .iter()
            .filter(|&&window| days <= i64::from(window))
            .map(|&window| (AlertType::Expiring, window))
            .collect(),
        _ => Vec::new(),
    };

    conditions
        .into_iter()
        .map(|(alert_type, window)| ComplianceAlert {
            tenant_id: tenant_id.clone(),
            driver_id: candidate.driver_id.clone(),
            doc_id: candidate.doc_id.clone(),
            alert_type,
            alert_window_days: window,
            sent_at: now,
            channel: channel.to_string(),
            dedupe_key: ComplianceAlert::dedupe_key(
                &candidate.driver_id,
                &candidate.doc_id,
                alert_type,
                window,
            ),
        })
        .collect()
}

enum InsertOutcome {
    Sent,
    AlreadyRecorded,
    Failed { retryable: bool },
}

impl ComplianceEngine {
    /// Required, expired or expiring documents across all active drivers.
    #[tracing::instrument(skip(self, store, tenant_id), fields(tenant = %tenant_id))]
    pub async fn documents_for_alerts<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertCandidate>>
    where
        S: ComplianceStore + ?Sized,
    {
        let drivers = store.active_drivers(tenant_id).await?;
        let input = self.load_batch(store, tenant_id, drivers).await?;
        Ok(collect_candidates(&input, now))
    }

    /// Insert every warranted alert that has not been recorded yet.
    ///
    /// A failed insert is counted in `errors` and the batch continues. The
    /// call fails as a whole only when every attempted insert failed.
    #[tracing::instrument(skip(self, store, tenant_id), fields(tenant = %tenant_id))]
    pub async fn reconcile_alerts<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<AlertReport>
    where
        S: ComplianceStore + ?Sized,
    {
        let candidates = self.documents_for_alerts(store, tenant_id, now).await?;
        let existing = store.alert_dedupe_keys(tenant_id).await?;

        let mut report = AlertReport::default();
        let mut planned_keys = HashSet::new();
        let mut pending = Vec::new();

        for candidate in &candidates {
            for alert in planned_alerts(tenant_id, candidate, &self.config.alert_channel, now) {
                if existing.contains(&alert.dedupe_key) || !planned_keys.insert(alert.dedupe_key.clone()) {
                    report.skipped += 1;
                } else {
                    pending.push(alert);
                }
            }
        }

        let attempted = pending.len();
        let outcomes: Vec<InsertOutcome> = stream::iter(pending)
            .map(|alert| async move {
                match store.insert_alert(&alert).await {
                    Ok(()) => InsertOutcome::Sent,
                    Err(StoreError::Conflict(_)) => InsertOutcome::AlreadyRecorded,
                    Err(e) => {
                        tracing::warn!(
                            dedupe_key = %alert.dedupe_key,
                            driver_id = %alert.driver_id,
                            error = %e,
                            "failed to record compliance alert"
                        );
                        InsertOutcome::Failed {
                            retryable: e.is_retryable(),
                        }
                    }
                }
            })
            .buffer_unordered(self.config.write_concurrency)
            .collect()
            .await;

        let mut all_retryable = true;
        for outcome in outcomes {
            match outcome {
                InsertOutcome::Sent => report.sent += 1,
                InsertOutcome::AlreadyRecorded => report.skipped += 1,
                InsertOutcome::Failed { retryable } => {
                    report.errors += 1;
                    all_retryable &= retryable;
                }
            }
        }

        if attempted > 0 && report.errors as usize == attempted {
            tracing::error!(tenant = %tenant_id, failed = report.errors, "every alert insert failed");
            return Err(ComplianceError::AllUnitsFailed {
                operation: "alert reconciliation",
                failed: report.errors,
                retryable: all_retryable,
            });
        }

        self.record_audit(
            store,
            tenant_id,
            AuditAction::AlertsReconciled {
                sent: report.sent,
                skipped: report.skipped,
                errors: report.errors,
            },
            now,
        )
        .await;

        tracing::info!(
            tenant = %tenant_id,
            candidates = candidates.len(),
            sent = report.sent,
            skipped = report.skipped,
            errors = report.errors,
            "compliance alerts reconciled"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;

    fn tenant() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn candidate(status: DocumentStatus, days: i64) -> AlertCandidate {
        AlertCandidate {
            driver_id: "drv-1".to_string(),
            doc_id: "doc-1".to_string(),
            doc_type: "license".to_string(),
            status,
            expires_at: NaiveDate::from_ymd_opt(2024, 3, 1),
            days_until_expiry: Some(days),
            alert_windows: vec![30, 15, 7],
        }
    }

    fn keys(alerts: &[ComplianceAlert]) -> Vec<&str> {
        alerts.iter().map(|a| a.dedupe_key.as_str()).collect()
    }

    #[test]
    fn test_expiring_crosses_windows() {
        let alerts = planned_alerts(&tenant(), &candidate(DocumentStatus::Expiring, 12), "in_app", now());
        assert_eq!(
            keys(&alerts),
            vec!["drv-1:doc-1:expiring:30", "drv-1:doc-1:expiring:15"]
        );
        assert!(alerts.iter().all(|a| a.sent_at == now() && a.channel == "in_app"));
    }

    #[test]
    fn test_expiring_on_boundary() {
        let alerts = planned_alerts(&tenant(), &candidate(DocumentStatus::Expiring, 30), "in_app", now());
        assert_eq!(keys(&alerts), vec!["drv-1:doc-1:expiring:30"]);
    }

    #[test]
    fn test_grace_band_hits_every_window() {
        let alerts = planned_alerts(&tenant(), &candidate(DocumentStatus::Expiring, -2), "in_app", now());
        assert_eq!(alerts.len(), 3);
    }

    #[test]
    fn test_expired_single_alert() {
        let alerts = planned_alerts(&tenant(), &candidate(DocumentStatus::Expired, -40), "email", now());
        assert_eq!(keys(&alerts), vec!["drv-1:doc-1:expired:0"]);
        assert_eq!(alerts[0].alert_type, AlertType::Expired);
    }

    #[test]
    fn test_valid_and_missing_yield_nothing() {
        assert!(planned_alerts(&tenant(), &candidate(DocumentStatus::Valid, 90), "in_app", now()).is_empty());
        assert!(planned_alerts(&tenant(), &candidate(DocumentStatus::Missing, 0), "in_app", now()).is_empty());
    }
}
