//! Batch audit trail, hash-linked per tenant

use chrono::{DateTime, Utc};
use shared_types::{AuditAction, AuditEntry, TenantId};

use crate::store::ComplianceStore;
use crate::ComplianceEngine;

const AUDIT_ACTOR: &str = "compliance-engine";

impl ComplianceEngine {
    /// Append one audit entry linked to the tenant's previous one.
    ///
    /// Failures are logged only: the rows the entry describes are already written.
    pub(crate) async fn record_audit<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        action: AuditAction,
        now: DateTime<Utc>,
    ) where
        S: ComplianceStore + ?Sized,
    {
        let previous_hash = match store.last_audit_hash(tenant_id).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(tenant = %tenant_id, error = %e, "could not read audit chain head");
                return;
            }
        };

        let entry = AuditEntry::new(
            tenant_id.clone(),
            action,
            AUDIT_ACTOR,
            now,
            previous_hash,
            None,
        );
        if let Err(e) = store.append_audit(&entry).await {
            tracing::warn!(tenant = %tenant_id, error = %e, "failed to append audit entry");
        }
    }
}
