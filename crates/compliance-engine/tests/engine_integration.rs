//! End-to-end behaviour of the engine against the in-memory store

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use compliance_engine::memory::MemoryStore;
use compliance_engine::{ComplianceEngine, ComplianceError, EngineConfig};
use pretty_assertions::assert_eq;
use shared_types::{
    verify_chain, AuditAction, ComplianceRule, DocumentStatus, DriverDocument, DriverRecord,
    TenantId,
};
use std::collections::HashSet;

fn tenant() -> TenantId {
    TenantId::new("acme-freight").unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

fn in_days(days: i64) -> Option<NaiveDate> {
    Some((now() + Duration::days(days)).date_naive())
}

/// Three drivers, one rule requiring a license with no grace and windows [30, 15, 7].
/// A's license expires in 40 days, B's in 5, C has none.
async fn three_driver_fleet() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .add_rule(ComplianceRule::new(tenant(), "driver", "license", true, 0, &[30, 15, 7]).unwrap())
        .await;
    for id in ["driver-a", "driver-b", "driver-c"] {
        store
            .add_driver(&tenant(), DriverRecord::new(id, "driver", true, false).unwrap())
            .await;
    }
    store
        .add_document(
            &tenant(),
            DriverDocument::new("lic-a", "driver-a", "license", in_days(40)).unwrap(),
        )
        .await;
    store
        .add_document(
            &tenant(),
            DriverDocument::new("lic-b", "driver-b", "license", in_days(5)).unwrap(),
        )
        .await;
    store
}

#[tokio::test]
async fn tenant_rollup_for_three_driver_fleet() {
    let store = three_driver_fleet().await;
    let engine = ComplianceEngine::default();

    let summary = engine.evaluate_tenant(&store, &tenant(), now()).await.unwrap();

    assert_eq!(summary.total_drivers, 3);
    assert_eq!(summary.compliant_drivers, 2);
    assert_eq!(summary.non_compliant_drivers, 1);
    assert_eq!(summary.compliance_percentage, 67);
    assert_eq!(summary.missing_count, 1);
    assert_eq!(summary.expiring_count, 1);
    assert_eq!(summary.top_issues[0].doc_type, "license");
    assert_eq!(summary.top_issues[0].count, 2);
}

#[tokio::test]
async fn alert_candidates_only_cover_expiring_and_expired_required_docs() {
    let store = three_driver_fleet().await;
    let engine = ComplianceEngine::default();

    let candidates = engine
        .documents_for_alerts(&store, &tenant(), now())
        .await
        .unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].driver_id, "driver-b");
    assert_eq!(candidates[0].status, DocumentStatus::Expiring);
    assert_eq!(candidates[0].days_until_expiry, Some(5));
}

#[tokio::test]
async fn reconcile_is_idempotent_without_time_advance() {
    let store = three_driver_fleet().await;
    let engine = ComplianceEngine::default();

    let first = engine.reconcile_alerts(&store, &tenant(), now()).await.unwrap();
    assert_eq!(first.sent, 3); // windows 30, 15 and 7 all crossed at 5 days out
    assert_eq!(first.errors, 0);

    let second = engine.reconcile_alerts(&store, &tenant(), now()).await.unwrap();
    assert_eq!(second.sent, 0);
    assert_eq!(second.skipped, 3);

    let alerts = store.alerts(&tenant()).await;
    let keys: HashSet<_> = alerts.iter().map(|a| a.dedupe_key.clone()).collect();
    assert_eq!(keys.len(), alerts.len());
    assert!(keys.contains("driver-b:lic-b:expiring:7"));
}

#[tokio::test]
async fn reconcile_adds_alerts_as_thresholds_are_crossed() {
    let store = three_driver_fleet().await;
    let engine = ComplianceEngine::default();

    // driver-a's license is 40 days out: nothing for driver-a yet
    engine.reconcile_alerts(&store, &tenant(), now()).await.unwrap();
    assert!(store
        .alerts(&tenant())
        .await
        .iter()
        .all(|a| a.driver_id != "driver-a"));

    // a week later driver-b's license is 2 days overdue with no grace
    let week_later = now() + Duration::days(7);
    let report = engine
        .reconcile_alerts(&store, &tenant(), week_later)
        .await
        .unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped, 0);
    assert!(store
        .alerts(&tenant())
        .await
        .iter()
        .any(|a| a.dedupe_key == "driver-b:lic-b:expired:0"));

    // 12 days in driver-a is 28 days out and crosses the 30-day window
    let later = now() + Duration::days(12);
    let report = engine.reconcile_alerts(&store, &tenant(), later).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped, 1);
    assert!(store
        .alerts(&tenant())
        .await
        .iter()
        .any(|a| a.dedupe_key == "driver-a:lic-a:expiring:30"));
    assert_eq!(store.alerts(&tenant()).await.len(), 5);
}

#[tokio::test]
async fn one_failing_alert_does_not_abort_the_batch() {
    let store = three_driver_fleet().await;
    store.fail_alert("driver-b:lic-b:expiring:15").await;
    let engine = ComplianceEngine::default();

    let report = engine.reconcile_alerts(&store, &tenant(), now()).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(store.alerts(&tenant()).await.len(), 2);
}

#[tokio::test]
async fn every_alert_failing_is_a_hard_error() {
    let store = three_driver_fleet().await;
    for window in [30, 15, 7] {
        store
            .fail_alert(&format!("driver-b:lic-b:expiring:{}", window))
            .await;
    }
    let engine = ComplianceEngine::default();

    let err = engine
        .reconcile_alerts(&store, &tenant(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, ComplianceError::AllUnitsFailed { failed: 3, .. }));
    // injected failures are query errors, so the caller may retry the tenant
    assert!(err.is_retryable());
}

#[tokio::test]
async fn storage_outage_is_retryable_and_not_an_empty_result() {
    let store = three_driver_fleet().await;
    store.set_unavailable(true).await;
    let engine = ComplianceEngine::default();

    let err = engine
        .reconcile_alerts(&store, &tenant(), now())
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let err = engine
        .evaluate_tenant(&store, &tenant(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, ComplianceError::Storage(_)));
}

#[tokio::test]
async fn snapshot_all_writes_driver_rows_plus_one_tenant_row() {
    let store = three_driver_fleet().await;
    let engine = ComplianceEngine::default();

    let report = engine
        .snapshot_all_drivers(&store, &tenant(), now())
        .await
        .unwrap();
    assert_eq!(report.created, 4);
    assert_eq!(report.errors, 0);

    let rows = store.snapshots(&tenant()).await;
    assert_eq!(rows.iter().filter(|r| r.driver_id.is_none()).count(), 1);
    let tenant_row = rows.iter().find(|r| r.driver_id.is_none()).unwrap();
    assert_eq!(tenant_row.compliance_score, 67);
    assert!(!tenant_row.compliant);

    let c_row = rows
        .iter()
        .find(|r| r.driver_id.as_deref() == Some("driver-c"))
        .unwrap();
    assert_eq!(c_row.compliance_score, 0);
    assert_eq!(c_row.missing_count, 1);
    assert_eq!(c_row.computed_at, now());
}

#[tokio::test]
async fn snapshot_failure_for_one_driver_is_isolated() {
    let store = three_driver_fleet().await;
    store.fail_snapshot(Some("driver-b")).await;
    let engine = ComplianceEngine::default();

    let report = engine
        .snapshot_all_drivers(&store, &tenant(), now())
        .await
        .unwrap();
    assert_eq!(report.created, 3);
    assert_eq!(report.errors, 1);
    assert!(store
        .snapshots(&tenant())
        .await
        .iter()
        .all(|r| r.driver_id.as_deref() != Some("driver-b")));
}

#[tokio::test]
async fn tenant_row_failure_keeps_driver_rows() {
    let store = three_driver_fleet().await;
    store.fail_snapshot(None).await;
    let engine = ComplianceEngine::default();

    let report = engine
        .snapshot_all_drivers(&store, &tenant(), now())
        .await
        .unwrap();
    assert_eq!(report.created, 3);
    assert_eq!(report.errors, 1);

    let rows = store.snapshots(&tenant()).await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.driver_id.is_some()));
}

#[tokio::test]
async fn every_snapshot_failing_stays_retryable() {
    let store = three_driver_fleet().await;
    for driver in ["driver-a", "driver-b", "driver-c"] {
        store.fail_snapshot(Some(driver)).await;
    }
    store.fail_snapshot(None).await;
    let engine = ComplianceEngine::default();

    let err = engine
        .snapshot_all_drivers(&store, &tenant(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, ComplianceError::AllUnitsFailed { failed: 4, .. }));
    assert!(err.is_retryable());
    assert!(store.snapshots(&tenant()).await.is_empty());
}

#[tokio::test]
async fn snapshots_are_append_only() {
    let store = three_driver_fleet().await;
    let engine = ComplianceEngine::default();

    engine
        .create_snapshot(&store, &tenant(), Some("driver-a"), now())
        .await
        .unwrap();
    engine
        .create_snapshot(&store, &tenant(), Some("driver-a"), now() + Duration::days(1))
        .await
        .unwrap();
    let report = engine
        .create_snapshot(&store, &tenant(), None, now())
        .await
        .unwrap();
    assert_eq!(report.created, 1);

    let rows = store.snapshots(&tenant()).await;
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows.iter()
            .filter(|r| r.driver_id.as_deref() == Some("driver-a"))
            .count(),
        2
    );
}

#[tokio::test]
async fn batches_leave_a_verifiable_audit_trail() {
    let store = three_driver_fleet().await;
    let engine = ComplianceEngine::default();

    engine.reconcile_alerts(&store, &tenant(), now()).await.unwrap();
    engine
        .snapshot_all_drivers(&store, &tenant(), now())
        .await
        .unwrap();

    let log = store.audit_log(&tenant()).await;
    assert_eq!(log.len(), 2);
    assert!(verify_chain(&log).is_ok());
    assert_eq!(
        log[0].action,
        AuditAction::AlertsReconciled {
            sent: 3,
            skipped: 0,
            errors: 0
        }
    );
}

#[tokio::test]
async fn grace_period_keeps_overdue_document_expiring() {
    let store = MemoryStore::new();
    store
        .add_rule(ComplianceRule::new(tenant(), "driver", "medical_card", true, 5, &[30]).unwrap())
        .await;
    store
        .add_driver(&tenant(), DriverRecord::new("d", "driver", true, false).unwrap())
        .await;
    store
        .add_document(
            &tenant(),
            DriverDocument::new("med", "d", "medical_card", in_days(-3)).unwrap(),
        )
        .await;
    let engine = ComplianceEngine::default();

    let eval = engine
        .evaluate_driver(&store, &tenant(), "d", now())
        .await
        .unwrap();
    assert_eq!(eval.documents[0].status, DocumentStatus::Expiring);
    assert!(eval.compliant);

    let eval = engine
        .evaluate_driver(&store, &tenant(), "d", now() + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(eval.documents[0].status, DocumentStatus::Expired);
    assert!(!eval.compliant);
}

#[tokio::test]
async fn configured_alert_channel_is_recorded() {
    let store = three_driver_fleet().await;
    let engine = ComplianceEngine::new(EngineConfig {
        alert_channel: "email".to_string(),
        ..Default::default()
    })
    .unwrap();

    engine.reconcile_alerts(&store, &tenant(), now()).await.unwrap();
    assert!(store
        .alerts(&tenant())
        .await
        .iter()
        .all(|a| a.channel == "email"));
}


#[tokio::test]
async fn misconfigured_role_fails_batch_and_single_alike() {
    let store = three_driver_fleet().await;
    for _ in 0..2 {
        store
            .add_rule(ComplianceRule::new(tenant(), "dispatcher", "license", true, 0, &[30]).unwrap())
            .await;
    }
    store
        .add_driver(&tenant(), DriverRecord::new("dispatch-1", "dispatcher", true, false).unwrap())
        .await;
    let engine = ComplianceEngine::default();

    let single = engine
        .evaluate_driver(&store, &tenant(), "dispatch-1", now())
        .await
        .unwrap_err();
    assert!(matches!(single, ComplianceError::Config(_)));

    let ids = vec!["driver-a".to_string(), "dispatch-1".to_string()];
    let batch = engine
        .evaluate_drivers_batch(&store, &tenant(), &ids, now())
        .await
        .unwrap_err();
    assert!(matches!(batch, ComplianceError::Config(_)));
    assert!(!batch.is_retryable());

    // a batch that never touches the broken role is unaffected
    let ids = vec!["driver-a".to_string(), "driver-b".to_string()];
    let healthy = engine
        .evaluate_drivers_batch(&store, &tenant(), &ids, now())
        .await
        .unwrap();
    let single_a = engine
        .evaluate_driver(&store, &tenant(), "driver-a", now())
        .await
        .unwrap();
    assert_eq!(healthy["driver-a"], single_a);
}
