//! Per-driver evaluation: applies the classifier across every rule for the driver's role.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use shared_types::{ComplianceRule, DocumentEvaluation, DocumentStatus, DriverDocument, DriverEvaluation};

use crate::classifier::classify;

/// Ordering used to pick the authoritative document among several of one type.
///
/// A document without an expiry outranks any dated one, a later expiry
/// outranks an earlier one, and remaining ties go to the smallest doc id.
fn authority(a: &DriverDocument, b: &DriverDocument) -> Ordering {
    let by_expiry = match (a.expires_at, b.expires_at) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    };
    by_expiry.then_with(|| b.doc_id.cmp(&a.doc_id))
}

/// Keep only the authoritative document per doc type.
pub fn authoritative_documents<'a, I>(documents: I) -> HashMap<&'a str, &'a DriverDocument>
where
    I: IntoIterator<Item = &'a DriverDocument>,
{
    let mut by_type: HashMap<&'a str, &'a DriverDocument> = HashMap::new();
    for doc in documents {
        by_type
            .entry(doc.doc_type.as_str())
            .and_modify(|current| {
                if authority(doc, current) == Ordering::Greater {
                    *current = doc;
                }
            })
            .or_insert(doc);
    }
    by_type
}

/// Evaluate one driver. Pure: no I/O, deterministic for a fixed `now`.
///
/// Only required rules count toward `compliant` and the score. Optional doc
/// types are reported when a document is on file and otherwise omitted.
pub fn evaluate_driver<'a, I>(
    driver_id: &str,
    rules: &[ComplianceRule],
    documents: I,
    now: DateTime<Utc>,
) -> DriverEvaluation
where
    I: IntoIterator<Item = &'a DriverDocument>,
{
    let by_type = authoritative_documents(documents);

    let mut evaluations = Vec::with_capacity(rules.len());
    let mut missing_required_docs = BTreeSet::new();
    let mut required_count = 0u32;
    let mut expired_count = 0u32;
    let mut expiring_count = 0u32;
    let mut missing_count = 0u32;

    for rule in rules {
        if rule.required {
            required_count += 1;
        }

        let Some(doc) = by_type.get(rule.doc_type.as_str()) else {
            if rule.required {
                missing_count += 1;
                missing_required_docs.insert(rule.doc_type.clone());
                evaluations.push(DocumentEvaluation {
                    doc_id: None,
                    doc_type: rule.doc_type.clone(),
                    expires_at: None,
                    days_until_expiry: None,
                    status: DocumentStatus::Missing,
                    is_required: true,
                });
            }
            continue;
        };

        let (status, days_until_expiry) = match doc.expires_at {
            Some(expires_at) => {
                let c = classify(expires_at, rule.grace_days, &rule.alert_windows, now);
                (c.status, Some(c.days_until_expiry))
            }
            None => (DocumentStatus::Valid, None),
        };

        if rule.required {
            match status {
                DocumentStatus::Expired => expired_count += 1,
                DocumentStatus::Expiring => expiring_count += 1,
                _ => {}
            }
        }

        evaluations.push(DocumentEvaluation {
            doc_id: Some(doc.doc_id.clone()),
            doc_type: rule.doc_type.clone(),
            expires_at: doc.expires_at,
            days_until_expiry,
            status,
            is_required: rule.required,
        });
    }

    DriverEvaluation {
        driver_id: driver_id.to_string(),
        compliant: expired_count == 0 && missing_count == 0,
        compliance_score: compliance_score(required_count, expired_count, missing_count),
        expired_count,
        expiring_count,
        missing_count,
        documents: evaluations,
        missing_required_docs,
    }
}

/// Share of required documents that are neither expired nor missing, 0..=100.
pub fn compliance_score(required: u32, expired: u32, missing: u32) -> u8 {
    if required == 0 {
        return 100;
    }
    let healthy = required.saturating_sub(expired.saturating_add(missing));
    let score = (100.0 * f64::from(healthy) / f64::from(required)).round();
    score.clamp(0.0, 100.0) as u8
}


#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use proptest::prelude::*;
    use shared_types::TenantId;

    const DOC_TYPES: &[&str] = &["license", "medical_card", "insurance", "twic_card"];

    fn rules() -> Vec<ComplianceRule> {
        DOC_TYPES
            .iter()
            .map(|t| {
                ComplianceRule::new(TenantId::new("acme").unwrap(), "driver", *t, true, 0, &[30])
                    .unwrap()
            })
            .collect()
    }

    proptest! {
        /// Property: adding an expired document of a required type never raises the score
        #[test]
        fn score_monotonic_under_expired_docs(
            offsets in prop::collection::vec((0usize..4, -60i64..120), 0..8),
            added_type in 0usize..4,
        ) {
            let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
            let base = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
            let mut docs: Vec<DriverDocument> = offsets
                .iter()
                .enumerate()
                .map(|(i, (t, off))| DriverDocument::new(
                    format!("doc-{}", i), "drv", DOC_TYPES[*t], Some(base + Duration::days(*off))
                ).unwrap())
                .collect();

            let before = evaluate_driver("drv", &rules(), &docs, now);
            docs.push(DriverDocument::new(
                "expired-extra", "drv", DOC_TYPES[added_type], Some(base - Duration::days(365))
            ).unwrap());
            let after = evaluate_driver("drv", &rules(), &docs, now);

            prop_assert!(after.compliance_score <= before.compliance_score);
        }

        /// Property: compliance is exactly "no expired and no missing required docs"
        #[test]
        fn compliant_iff_no_expired_or_missing(
            offsets in prop::collection::vec((0usize..4, -60i64..120), 0..8),
        ) {
            let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
            let base = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
            let docs: Vec<DriverDocument> = offsets
                .iter()
                .enumerate()
                .map(|(i, (t, off))| DriverDocument::new(
                    format!("doc-{}", i), "drv", DOC_TYPES[*t], Some(base + Duration::days(*off))
                ).unwrap())
                .collect();

            let eval = evaluate_driver("drv", &rules(), &docs, now);
            prop_assert_eq!(eval.compliant, eval.expired_count == 0 && eval.missing_count == 0);
            prop_assert_eq!(eval.compliant, eval.compliance_score == 100);
            prop_assert_eq!(eval.documents.len(), DOC_TYPES.len());
        }
    }
}
