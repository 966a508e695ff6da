//! HTTP handlers for the compliance API
//!
//! Every handler opens one [`crate::store::TenantUnit`], runs a single engine
//! operation in it and commits only when that operation succeeded. Handlers
//! that write open the unit with the write lock held.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use compliance_engine::{AlertReport, SnapshotReport};
use shared_types::{AlertCandidate, ComplianceRule, DriverEvaluation, TenantEvaluation, TenantId};

use crate::error::ApiError;
use crate::models::*;
use crate::state::AppState;
use crate::sweep;

fn tenant_id(raw: String) -> Result<TenantId, ApiError> {
    TenantId::new(raw).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Rules for one role, or the configured defaults
pub async fn get_rules(
    State(state): State<Arc<AppState>>,
    Path((tenant, role)): Path<(String, String)>,
) -> Result<Json<Vec<ComplianceRule>>, ApiError> {
    let tenant = tenant_id(tenant)?;
    let unit = state.store.begin().await?;
    let rules = state.engine.get_compliance_rules(&unit, &tenant, &role).await?;
    Ok(Json(rules))
}

pub async fn evaluate_driver(
    State(state): State<Arc<AppState>>,
    Path((tenant, driver_id)): Path<(String, String)>,
) -> Result<Json<DriverEvaluation>, ApiError> {
    let tenant = tenant_id(tenant)?;
    let unit = state.store.begin().await?;
    let evaluation = state
        .engine
        .evaluate_driver(&unit, &tenant, &driver_id, Utc::now())
        .await?;
    Ok(Json(evaluation))
}

/// Evaluate several drivers; unknown ids are left out of the response
pub async fn evaluate_batch(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BTreeMap<String, DriverEvaluation>>, ApiError> {
    let tenant = tenant_id(tenant)?;
    let unit = state.store.begin().await?;
    let evaluations = state
        .engine
        .evaluate_drivers_batch(&unit, &tenant, &req.driver_ids, Utc::now())
        .await?;
    Ok(Json(evaluations))
}

pub async fn evaluate_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Result<Json<TenantEvaluation>, ApiError> {
    let tenant = tenant_id(tenant)?;
    let unit = state.store.begin().await?;
    let summary = state.engine.evaluate_tenant(&unit, &tenant, Utc::now()).await?;
    Ok(Json(summary))
}

pub async fn alert_candidates(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Result<Json<Vec<AlertCandidate>>, ApiError> {
    let tenant = tenant_id(tenant)?;
    let unit = state.store.begin().await?;
    let candidates = state
        .engine
        .documents_for_alerts(&unit, &tenant, Utc::now())
        .await?;
    Ok(Json(candidates))
}

pub async fn reconcile_alerts(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Result<Json<AlertReport>, ApiError> {
    let tenant = tenant_id(tenant)?;
    let unit = state.store.begin_write().await?;
    let report = state
        .engine
        .reconcile_alerts(&unit, &tenant, Utc::now())
        .await?;
    unit.commit().await?;
    Ok(Json(report))
}

/// Record one driver snapshot, or the tenant rollup when no driver is given
pub async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Json(req): Json<CreateSnapshotRequest>,
) -> Result<Json<SnapshotReport>, ApiError> {
    let tenant = tenant_id(tenant)?;
    let unit = state.store.begin_write().await?;
    let report = state
        .engine
        .create_snapshot(&unit, &tenant, req.driver_id.as_deref(), Utc::now())
        .await?;
    unit.commit().await?;
    Ok(Json(report))
}

pub async fn snapshot_all(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Result<Json<SnapshotReport>, ApiError> {
    let tenant = tenant_id(tenant)?;
    let unit = state.store.begin_write().await?;
    let report = state
        .engine
        .snapshot_all_drivers(&unit, &tenant, Utc::now())
        .await?;
    unit.commit().await?;
    Ok(Json(report))
}

/// Reconcile alerts and record snapshots for every tenant
pub async fn compliance_cron(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepResponse>, ApiError> {
    let response = sweep::run_sweep(state, Utc::now()).await?;
    Ok(Json(response))
}
