pub mod audit;
pub mod types;

pub use audit::{verify_chain, AuditAction, AuditChainError, AuditEntry};
pub use types::{
    normalize_alert_windows, AlertCandidate, AlertType, ComplianceAlert, ComplianceRule,
    ComplianceSnapshot, DocumentEvaluation, DocumentStatus, DriverDocument, DriverEvaluation,
    DriverRecord, IssueCount, TenantEvaluation, TenantId, ValidationError,
};
