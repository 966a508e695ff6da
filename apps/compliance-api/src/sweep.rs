//! Multi-tenant cron sweep
//!
//! Each tenant reconciles alerts and records snapshots in its own transaction,
//! under a wall-clock budget. A tenant that runs out of budget is rolled back
//! and reported as timed out, never as a tenant with nothing to alert on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use compliance_engine::{AlertReport, ComplianceError, ComplianceStore, SnapshotReport};
use futures::stream::{self, StreamExt};
use shared_types::TenantId;

use crate::error::ApiError;
use crate::models::{SweepOutcome, SweepResponse, TenantSweep};
use crate::state::AppState;

type TenantWork = Result<(AlertReport, SnapshotReport), ComplianceError>;

#[tracing::instrument(skip(state))]
pub async fn run_sweep(
    state: Arc<AppState>,
    now: DateTime<Utc>,
) -> Result<SweepResponse, ApiError> {
    let tenants = {
        let unit = state.store.begin().await?;
        unit.tenant_ids().await?
    };
    tracing::info!(tenants = tenants.len(), "starting compliance sweep");

    let budget = state.config.sweep_timeout;
    let results: Vec<TenantSweep> = stream::iter(tenants)
        .map(|tenant_id| {
            let state = Arc::clone(&state);
            async move {
                let work = sweep_tenant(&state, tenant_id.clone(), now);
                with_budget(tenant_id, budget, work).await
            }
        })
        .buffer_unordered(state.config.sweep_concurrency)
        .collect()
        .await;

    let response = SweepResponse::from_results(results);
    tracing::info!(
        completed = response.completed,
        timed_out = response.timed_out,
        failed = response.failed,
        "compliance sweep finished"
    );
    Ok(response)
}

async fn sweep_tenant(state: &AppState, tenant_id: TenantId, now: DateTime<Utc>) -> TenantWork {
    let unit = state.store.begin_write().await?;
    let alerts = state.engine.reconcile_alerts(&unit, &tenant_id, now).await?;
    let snapshots = state
        .engine
        .snapshot_all_drivers(&unit, &tenant_id, now)
        .await?;
    unit.commit().await?;
    Ok((alerts, snapshots))
}

/// Run one tenant's work under `budget`. Dropping the work on timeout drops
/// its transaction with it.
pub async fn with_budget<F>(tenant_id: TenantId, budget: Duration, work: F) -> TenantSweep
where
    F: Future<Output = TenantWork>,
{
    let outcome = match tokio::time::timeout(budget, work).await {
        Ok(Ok((alerts, snapshots))) => SweepOutcome::Completed { alerts, snapshots },
        Ok(Err(e)) => {
            tracing::warn!(tenant = %tenant_id, error = %e, "tenant sweep failed");
            SweepOutcome::Failed {
                error: e.to_string(),
                retryable: e.is_retryable(),
            }
        }
        Err(_) => {
            tracing::warn!(
                tenant = %tenant_id,
                budget_ms = budget.as_millis() as u64,
                "tenant sweep timed out, rolled back"
            );
            SweepOutcome::TimedOut {
                budget_ms: budget.as_millis() as u64,
            }
        }
    };

    TenantSweep { tenant_id, outcome }
}
