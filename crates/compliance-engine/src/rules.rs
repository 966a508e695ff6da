//! Rule resolution per role, with configured defaults for roles that have no rules.

use std::collections::{BTreeMap, HashSet};

use shared_types::{ComplianceRule, TenantId};

use crate::config::EngineConfig;
use crate::error::{ComplianceError, Result};

/// Rules grouped by role, ordered by doc type within each role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleBook {
    by_role: BTreeMap<String, Vec<ComplianceRule>>,
}

impl RuleBook {
    /// Group fetched rules by the requested roles.
    ///
    /// Rows for roles that were not requested, or for another tenant, are
    /// ignored. A role with no rows receives the configured defaults. Two
    /// rules for the same (role, doc type) are a configuration error.
    pub fn resolve(
        tenant_id: &TenantId,
        roles: &[String],
        fetched: Vec<ComplianceRule>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let mut by_role: BTreeMap<String, Vec<ComplianceRule>> = roles
            .iter()
            .map(|role| (role.clone(), Vec::new()))
            .collect();

        for rule in fetched {
            if &rule.tenant_id != tenant_id {
                continue;
            }
            if rule.alert_windows.is_empty() {
                return Err(ComplianceError::Config(format!(
                    "rule {}/{} has no alert windows",
                    rule.role, rule.doc_type
                )));
            }
            if let Some(rules) = by_role.get_mut(&rule.role) {
                rules.push(rule);
            }
        }

        for (role, rules) in by_role.iter_mut() {
            if rules.is_empty() {
                tracing::debug!(tenant = %tenant_id, role = %role, "no rules configured, using defaults");
                *rules = config.default_rules(tenant_id, role);
            }

            let mut seen = HashSet::new();
            for rule in rules.iter() {
                if !seen.insert(rule.doc_type.as_str()) {
                    return Err(ComplianceError::Config(format!(
                        "duplicate rule for role {} and doc type {}",
                        role, rule.doc_type
                    )));
                }
            }
            rules.sort_by(|a, b| a.doc_type.cmp(&b.doc_type));
        }

        Ok(Self { by_role })
    }

    /// Rules for a role. Empty if the role was not resolved.
    pub fn rules_for(&self, role: &str) -> &[ComplianceRule] {
        self.by_role.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn into_rules(mut self, role: &str) -> Vec<ComplianceRule> {
        self.by_role.remove(role).unwrap_or_default()
    }
}
