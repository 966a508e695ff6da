//! Tamper-evident audit log for compliance batch operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::types::TenantId;

/// Batch operations recorded in a tenant's audit log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    AlertsReconciled {
        sent: u32,
        skipped: u32,
        errors: u32,
    },
    SnapshotsRecorded {
        created: u32,
        errors: u32,
    },
}

/// A single audit log entry, linked to its predecessor by hash
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub event_id: String,
    pub tenant_id: TenantId,
    pub recorded_at: DateTime<Utc>,
    pub action: AuditAction,
    pub actor: String,
    pub previous_hash: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("audit chain broken at entry {index}: expected previous {expected:?}, found {found:?}")]
pub struct AuditChainError {
    pub index: usize,
    pub expected: Option<String>,
    pub found: Option<String>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: TenantId,
        action: AuditAction,
        actor: &str,
        recorded_at: DateTime<Utc>,
        previous_hash: Option<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            tenant_id,
            recorded_at,
            action,
            actor: actor.to_string(),
            previous_hash,
            details,
        }
    }

    /// Compute the hash of this entry (for chain linking)
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.event_id.as_bytes());
        hasher.update(self.tenant_id.as_str().as_bytes());
        hasher.update(self.recorded_at.to_rfc3339().as_bytes());
        hasher.update(format!("{:?}", self.action).as_bytes());
        hasher.update(self.actor.as_bytes());
        if let Some(ref details) = self.details {
            hasher.update(details.as_bytes());
        }
        if let Some(ref prev) = self.previous_hash {
            hasher.update(prev.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Verify that every entry links to the hash of the one before it
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), AuditChainError> {
    let mut expected_prev: Option<String> = None;

    for (index, entry) in entries.iter().enumerate() {
        if entry.previous_hash != expected_prev {
            return Err(AuditChainError {
                index,
                expected: expected_prev,
                found: entry.previous_hash.clone(),
            });
        }
        expected_prev = Some(entry.compute_hash());
    }

    Ok(())
}
