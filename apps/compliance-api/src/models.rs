//! Database rows and request/response bodies for the compliance API

use chrono::NaiveDate;
use compliance_engine::{AlertReport, SnapshotReport, StoreError};
use serde::{Deserialize, Serialize};
use shared_types::{ComplianceRule, DriverDocument, DriverRecord, TenantId};
use sqlx::FromRow;

/// Database row for compliance_rules
#[derive(Debug, Clone, FromRow)]
pub struct DbRule {
    pub tenant_id: String,
    pub role: String,
    pub doc_type: String,
    pub required: bool,
    pub grace_days: i64,
    /// JSON array of day counts
    pub alert_windows: String,
}

impl DbRule {
    pub fn into_rule(self) -> Result<ComplianceRule, StoreError> {
        let invalid = |reason: String| StoreError::InvalidRow {
            table: "compliance_rules",
            reason,
        };

        let tenant_id = TenantId::new(self.tenant_id).map_err(|e| invalid(e.to_string()))?;
        let windows: Vec<i64> = serde_json::from_str(&self.alert_windows)
            .map_err(|e| invalid(format!("alert_windows is not a JSON array of days: {}", e)))?;

        ComplianceRule::new(
            tenant_id,
            self.role,
            self.doc_type,
            self.required,
            self.grace_days,
            &windows,
        )
        .map_err(|e| invalid(e.to_string()))
    }
}

/// Database row for drivers
#[derive(Debug, Clone, FromRow)]
pub struct DbDriver {
    pub driver_id: String,
    pub role: Option<String>,
    pub active: bool,
    pub deleted_at: Option<String>,
}

impl DbDriver {
    pub fn into_record(self, default_role: &str) -> Result<DriverRecord, StoreError> {
        let role = self
            .role
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| default_role.to_string());

        DriverRecord::new(self.driver_id, role, self.active, self.deleted_at.is_some()).map_err(
            |e| StoreError::InvalidRow {
                table: "drivers",
                reason: e.to_string(),
            },
        )
    }
}

/// Database row for driver_documents
#[derive(Debug, Clone, FromRow)]
pub struct DbDocument {
    pub doc_id: String,
    pub driver_id: String,
    pub doc_type: String,
    pub expires_at: Option<NaiveDate>,
}

impl DbDocument {
    pub fn into_document(self) -> Result<DriverDocument, StoreError> {
        DriverDocument::new(self.doc_id, self.driver_id, self.doc_type, self.expires_at).map_err(
            |e| StoreError::InvalidRow {
                table: "driver_documents",
                reason: e.to_string(),
            },
        )
    }
}

/// Request to evaluate several drivers at once
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub driver_ids: Vec<String>,
}

/// Request to record a snapshot; no driver means the tenant rollup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSnapshotRequest {
    #[serde(default)]
    pub driver_id: Option<String>,
}

/// Outcome of one tenant in the cron sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed {
        alerts: AlertReport,
        snapshots: SnapshotReport,
    },
    /// The tenant ran past its budget and nothing it wrote was kept
    TimedOut { budget_ms: u64 },
    Failed { error: String, retryable: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantSweep {
    pub tenant_id: TenantId,
    #[serde(flatten)]
    pub outcome: SweepOutcome,
}

/// Response from the cron sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepResponse {
    pub tenants: Vec<TenantSweep>,
    pub completed: u32,
    pub timed_out: u32,
    pub failed: u32,
}

impl SweepResponse {
    pub fn from_results(mut tenants: Vec<TenantSweep>) -> Self {
        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));

        let mut response = Self {
            tenants: Vec::new(),
            completed: 0,
            timed_out: 0,
            failed: 0,
        };
        for tenant in &tenants {
            match tenant.outcome {
                SweepOutcome::Completed { .. } => response.completed += 1,
                SweepOutcome::TimedOut { .. } => response.timed_out += 1,
                SweepOutcome::Failed { .. } => response.failed += 1,
            }
        }
        response.tenants = tenants;
        response
    }
}
