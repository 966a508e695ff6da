//! Typed records exchanged between the compliance engine and tenant storage.
//!
//! Raw rows are validated once, through the constructors here, before the
//! engine ever sees them.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating a record at the storage boundary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("alert windows must not be empty")]
    EmptyAlertWindows,

    #[error("alert window must be a positive day count (found {0})")]
    NonPositiveAlertWindow(i64),

    #[error("duplicate alert window: {0} days")]
    DuplicateAlertWindow(i64),

    #[error("grace days must not be negative (found {0})")]
    NegativeGraceDays(i64),
}

/// Explicit tenant context threaded through every engine and storage call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyField("tenant_id"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a list of alert windows into strictly descending positive day counts.
pub fn normalize_alert_windows(raw: &[i64]) -> Result<Vec<u32>, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::EmptyAlertWindows);
    }

    let mut seen = HashSet::new();
    let mut windows = Vec::with_capacity(raw.len());
    for &days in raw {
        if days <= 0 || days > i64::from(u32::MAX) {
            return Err(ValidationError::NonPositiveAlertWindow(days));
        }
        if !seen.insert(days) {
            return Err(ValidationError::DuplicateAlertWindow(days));
        }
        windows.push(days as u32);
    }

    windows.sort_unstable_by(|a, b| b.cmp(a));
    Ok(windows)
}

fn non_empty(value: String, field: &'static str) -> Result<String, ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(value)
    }
}

/// One configured requirement for a (tenant, role, doc type) triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRule {
    pub tenant_id: TenantId,
    pub role: String,
    pub doc_type: String,
    pub required: bool,
    pub grace_days: u32,
    /// Days before expiry, strictly descending (e.g. `[30, 15, 7]`)
    pub alert_windows: Vec<u32>,
}

impl ComplianceRule {
    pub fn new(
        tenant_id: TenantId,
        role: impl Into<String>,
        doc_type: impl Into<String>,
        required: bool,
        grace_days: i64,
        alert_windows: &[i64],
    ) -> Result<Self, ValidationError> {
        if grace_days < 0 || grace_days > i64::from(u32::MAX) {
            return Err(ValidationError::NegativeGraceDays(grace_days));
        }

        Ok(Self {
            tenant_id,
            role: non_empty(role.into(), "role")?,
            doc_type: non_empty(doc_type.into(), "doc_type")?,
            required,
            grace_days: grace_days as u32,
            alert_windows: normalize_alert_windows(alert_windows)?,
        })
    }

    /// Largest alert window, i.e. the first threshold a document crosses
    pub fn max_alert_window(&self) -> u32 {
        self.alert_windows.iter().copied().max().unwrap_or(0)
    }
}

/// A driver as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub driver_id: String,
    pub role: String,
    pub active: bool,
    pub deleted: bool,
}

impl DriverRecord {
    pub fn new(
        driver_id: impl Into<String>,
        role: impl Into<String>,
        active: bool,
        deleted: bool,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            driver_id: non_empty(driver_id.into(), "driver_id")?,
            role: non_empty(role.into(), "role")?,
            active,
            deleted,
        })
    }

    /// Active and not soft-deleted
    pub fn is_evaluable(&self) -> bool {
        self.active && !self.deleted
    }
}

/// A compliance document on file for a driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDocument {
    pub doc_id: String,
    pub driver_id: String,
    pub doc_type: String,
    /// `None` for documents that never expire
    pub expires_at: Option<NaiveDate>,
}

impl DriverDocument {
    pub fn new(
        doc_id: impl Into<String>,
        driver_id: impl Into<String>,
        doc_type: impl Into<String>,
        expires_at: Option<NaiveDate>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            doc_id: non_empty(doc_id.into(), "doc_id")?,
            driver_id: non_empty(driver_id.into(), "driver_id")?,
            doc_type: non_empty(doc_type.into(), "doc_type")?,
            expires_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Missing,
    Expired,
    Expiring,
    Valid,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Missing => "missing",
            DocumentStatus::Expired => "expired",
            DocumentStatus::Expiring => "expiring",
            DocumentStatus::Valid => "valid",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per doc-type slot of a driver evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEvaluation {
    pub doc_id: Option<String>,
    pub doc_type: String,
    pub expires_at: Option<NaiveDate>,
    pub days_until_expiry: Option<i64>,
    pub status: DocumentStatus,
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverEvaluation {
    pub driver_id: String,
    pub compliant: bool,
    pub compliance_score: u8,
    pub expired_count: u32,
    pub expiring_count: u32,
    pub missing_count: u32,
    pub documents: Vec<DocumentEvaluation>,
    pub missing_required_docs: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCount {
    pub doc_type: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantEvaluation {
    pub total_drivers: u32,
    pub compliant_drivers: u32,
    pub non_compliant_drivers: u32,
    pub compliance_percentage: u8,
    pub expired_count: u32,
    pub expiring_count: u32,
    pub missing_count: u32,
    pub top_issues: Vec<IssueCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Expiring,
    Expired,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Expiring => "expiring",
            AlertType::Expired => "expired",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A required document that is expired or expiring and may warrant alerts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub driver_id: String,
    pub doc_id: String,
    pub doc_type: String,
    pub status: DocumentStatus,
    pub expires_at: Option<NaiveDate>,
    pub days_until_expiry: Option<i64>,
    pub alert_windows: Vec<u32>,
}

/// Persisted alert row. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceAlert {
    pub tenant_id: TenantId,
    pub driver_id: String,
    pub doc_id: String,
    pub alert_type: AlertType,
    pub alert_window_days: u32,
    pub sent_at: DateTime<Utc>,
    pub channel: String,
    pub dedupe_key: String,
}

impl ComplianceAlert {
    /// `driverId:docId:alertType:alertWindowDays`
    pub fn dedupe_key(
        driver_id: &str,
        doc_id: &str,
        alert_type: AlertType,
        alert_window_days: u32,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            driver_id,
            doc_id,
            alert_type.as_str(),
            alert_window_days
        )
    }
}

/// Append-only historical record. `driver_id == None` marks a tenant rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSnapshot {
    pub tenant_id: TenantId,
    pub driver_id: Option<String>,
    pub compliance_score: u8,
    pub compliant: bool,
    pub expired_count: u32,
    pub expiring_count: u32,
    pub missing_count: u32,
    pub computed_at: DateTime<Utc>,
    pub details_json: serde_json::Value,
}
