//! Engine configuration
//!
//! Rule defaults and batch tuning live here and are handed to
//! [`crate::ComplianceEngine::new`] at construction. Nothing is read from
//! global state after that.

use serde::{Deserialize, Serialize};
use shared_types::{normalize_alert_windows, ComplianceRule, TenantId};

use crate::error::{ComplianceError, Result};

/// Document types required when a tenant has configured no rules for a role
pub const DEFAULT_REQUIRED_DOCS: &[&str] = &["license", "medical_card", "insurance"];

/// Days before expiry at which alerts fire, largest first
pub const DEFAULT_ALERT_WINDOWS: &[u32] = &[30, 15, 7];

pub const DEFAULT_TOP_ISSUES: usize = 5;
pub const DEFAULT_ALERT_CHANNEL: &str = "in_app";
pub const DEFAULT_ROLE: &str = "driver";
pub const DEFAULT_WRITE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Doc types seeded as required rules when a role has none configured
    pub required_docs: Vec<String>,
    /// Alert windows for seeded rules
    pub alert_windows: Vec<u32>,
    /// Grace days for seeded rules
    pub default_grace_days: u32,
    /// Length of `TenantEvaluation::top_issues`
    pub top_issues_limit: usize,
    /// Channel recorded on every alert row
    pub alert_channel: String,
    /// Role assumed for drivers stored without one
    pub default_role: String,
    /// Maximum in-flight alert/snapshot inserts within one tenant batch
    pub write_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            required_docs: DEFAULT_REQUIRED_DOCS.iter().map(|d| d.to_string()).collect(),
            alert_windows: DEFAULT_ALERT_WINDOWS.to_vec(),
            default_grace_days: 0,
            top_issues_limit: DEFAULT_TOP_ISSUES,
            alert_channel: DEFAULT_ALERT_CHANNEL.to_string(),
            default_role: DEFAULT_ROLE.to_string(),
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
        }
    }
}

impl EngineConfig {
    /// Check the configuration and normalize alert windows to descending order.
    pub fn validate(mut self) -> Result<Self> {
        self.required_docs.retain(|d| !d.trim().is_empty());
        if self.required_docs.is_empty() {
            return Err(ComplianceError::Config(
                "at least one default required document type must be configured".to_string(),
            ));
        }

        let raw: Vec<i64> = self.alert_windows.iter().map(|&w| i64::from(w)).collect();
        self.alert_windows = normalize_alert_windows(&raw)?;

        if self.top_issues_limit == 0 {
            return Err(ComplianceError::Config(
                "top issues limit must be at least 1".to_string(),
            ));
        }
        if self.write_concurrency == 0 {
            return Err(ComplianceError::Config(
                "write concurrency must be at least 1".to_string(),
            ));
        }
        if self.alert_channel.trim().is_empty() {
            return Err(ComplianceError::Config(
                "alert channel must not be empty".to_string(),
            ));
        }
        if self.default_role.trim().is_empty() {
            return Err(ComplianceError::Config(
                "default role must not be empty".to_string(),
            ));
        }

        Ok(self)
    }

    /// Build a configuration from environment variables, falling back to defaults.
    ///
    /// Recognized variables: `COMPLIANCE_REQUIRED_DOCS` (comma separated),
    /// `COMPLIANCE_ALERT_WINDOWS` (comma separated days), `COMPLIANCE_GRACE_DAYS`,
    /// `COMPLIANCE_TOP_ISSUES`, `COMPLIANCE_ALERT_CHANNEL`, `COMPLIANCE_DEFAULT_ROLE`,
    /// `COMPLIANCE_WRITE_CONCURRENCY`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(docs) = lookup("COMPLIANCE_REQUIRED_DOCS") {
            config.required_docs = split_list(&docs).map(str::to_string).collect();
        }
        if let Some(windows) = lookup("COMPLIANCE_ALERT_WINDOWS") {
            let raw = split_list(&windows)
                .map(|w| parse_number::<i64>("COMPLIANCE_ALERT_WINDOWS", w))
                .collect::<Result<Vec<_>>>()?;
            config.alert_windows = normalize_alert_windows(&raw)?;
        }
        if let Some(grace) = lookup("COMPLIANCE_GRACE_DAYS") {
            config.default_grace_days = parse_number("COMPLIANCE_GRACE_DAYS", &grace)?;
        }
        if let Some(limit) = lookup("COMPLIANCE_TOP_ISSUES") {
            config.top_issues_limit = parse_number("COMPLIANCE_TOP_ISSUES", &limit)?;
        }
        if let Some(channel) = lookup("COMPLIANCE_ALERT_CHANNEL") {
            config.alert_channel = channel.trim().to_string();
        }
        if let Some(role) = lookup("COMPLIANCE_DEFAULT_ROLE") {
            config.default_role = role.trim().to_string();
        }
        if let Some(concurrency) = lookup("COMPLIANCE_WRITE_CONCURRENCY") {
            config.write_concurrency = parse_number("COMPLIANCE_WRITE_CONCURRENCY", &concurrency)?;
        }

        config.validate()
    }

    /// Rules seeded for a role that has nothing configured
    pub fn default_rules(&self, tenant_id: &TenantId, role: &str) -> Vec<ComplianceRule> {
        self.required_docs
            .iter()
            .map(|doc_type| ComplianceRule {
                tenant_id: tenant_id.clone(),
                role: role.to_string(),
                doc_type: doc_type.clone(),
                required: true,
                grace_days: self.default_grace_days,
                alert_windows: self.alert_windows.clone(),
            })
            .collect()
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ComplianceError::Config(format!("{} is not a valid number: {:?}", key, raw)))
}
