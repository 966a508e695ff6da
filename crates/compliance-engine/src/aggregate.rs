//! Tenant-level rollup of driver evaluations

use std::collections::{BTreeSet, HashMap};

use shared_types::{DocumentStatus, DriverEvaluation, IssueCount, TenantEvaluation};

/// Doc types that count as an issue for one driver: required docs that are
/// missing, expired or expiring. Each type counts once per driver.
fn driver_issues(evaluation: &DriverEvaluation) -> BTreeSet<&str> {
    let mut issues: BTreeSet<&str> = evaluation
        .missing_required_docs
        .iter()
        .map(String::as_str)
        .collect();
    issues.extend(
        evaluation
            .documents
            .iter()
            .filter(|d| {
                d.is_required
                    && matches!(d.status, DocumentStatus::Expired | DocumentStatus::Expiring)
            })
            .map(|d| d.doc_type.as_str()),
    );
    issues
}

fn percentage(part: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    (100.0 * f64::from(part) / f64::from(total)).round() as u8
}

/// Reduce driver evaluations into a tenant summary.
///
/// `top_issues` is sorted by count descending, then doc type ascending, and
/// holds at most `top_issues_limit` entries.
pub fn aggregate<'a, I>(evaluations: I, top_issues_limit: usize) -> TenantEvaluation
where
    I: IntoIterator<Item = &'a DriverEvaluation>,
{
    let mut total_drivers = 0u32;
    let mut compliant_drivers = 0u32;
    let mut expired_count = 0u32;
    let mut expiring_count = 0u32;
    let mut missing_count = 0u32;
    let mut tally: HashMap<&str, u32> = HashMap::new();

    for evaluation in evaluations {
        total_drivers += 1;
        if evaluation.compliant {
            compliant_drivers += 1;
        }
        expired_count += evaluation.expired_count;
        expiring_count += evaluation.expiring_count;
        missing_count += evaluation.missing_count;

        for doc_type in driver_issues(evaluation) {
            *tally.entry(doc_type).or_insert(0) += 1;
        }
    }

    let mut top_issues: Vec<IssueCount> = tally
        .into_iter()
        .map(|(doc_type, count)| IssueCount {
            doc_type: doc_type.to_string(),
            count,
        })
        .collect();
    top_issues.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.doc_type.cmp(&b.doc_type)));
    top_issues.truncate(top_issues_limit);

    TenantEvaluation {
        total_drivers,
        compliant_drivers,
        non_compliant_drivers: total_drivers - compliant_drivers,
        compliance_percentage: percentage(compliant_drivers, total_drivers),
        expired_count,
        expiring_count,
        missing_count,
        top_issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shared_types::DocumentEvaluation;

    fn doc(doc_type: &str, status: DocumentStatus, is_required: bool) -> DocumentEvaluation {
        DocumentEvaluation {
            doc_id: (status != DocumentStatus::Missing).then(|| format!("{}-doc", doc_type)),
            doc_type: doc_type.to_string(),
            expires_at: None,
            days_until_expiry: None,
            status,
            is_required,
        }
    }

    fn driver(id: &str, documents: Vec<DocumentEvaluation>) -> DriverEvaluation {
        let required: Vec<_> = documents.iter().filter(|d| d.is_required).collect();
        let count = |s: DocumentStatus| required.iter().filter(|d| d.status == s).count() as u32;
        let expired_count = count(DocumentStatus::Expired);
        let missing_count = count(DocumentStatus::Missing);
        DriverEvaluation {
            driver_id: id.to_string(),
            compliant: expired_count == 0 && missing_count == 0,
            compliance_score: 0,
            expired_count,
            expiring_count: count(DocumentStatus::Expiring),
            missing_count,
            missing_required_docs: required
                .iter()
                .filter(|d| d.status == DocumentStatus::Missing)
                .map(|d| d.doc_type.clone())
                .collect(),
            documents,
        }
    }

    #[test]
    fn test_empty_tenant() {
        let none: Vec<DriverEvaluation> = Vec::new();
        let summary = aggregate(&none, 5);
        assert_eq!(summary.total_drivers, 0);
        assert_eq!(summary.compliance_percentage, 0);
        assert!(summary.top_issues.is_empty());
    }

    #[test]
    fn test_rollup_counts_and_percentage() {
        let drivers = vec![
            driver("a", vec![doc("license", DocumentStatus::Valid, true)]),
            driver("b", vec![doc("license", DocumentStatus::Expiring, true)]),
            driver("c", vec![doc("license", DocumentStatus::Missing, true)]),
        ];
        let summary = aggregate(&drivers, 5);

        assert_eq!(summary.total_drivers, 3);
        assert_eq!(summary.compliant_drivers, 2);
        assert_eq!(summary.non_compliant_drivers, 1);
        assert_eq!(summary.compliance_percentage, 67);
        assert_eq!(summary.expiring_count, 1);
        assert_eq!(summary.missing_count, 1);
        assert_eq!(
            summary.top_issues,
            vec![IssueCount {
                doc_type: "license".to_string(),
                count: 2
            }]
        );
    }

    #[test]
    fn test_top_issues_ranking_and_tie_break() {
        let drivers = vec![
            driver(
                "a",
                vec![
                    doc("medical_card", DocumentStatus::Expired, true),
                    doc("insurance", DocumentStatus::Missing, true),
                    doc("hazmat", DocumentStatus::Expired, false),
                ],
            ),
            driver(
                "b",
                vec![
                    doc("medical_card", DocumentStatus::Expiring, true),
                    doc("license", DocumentStatus::Missing, true),
                ],
            ),
            driver("c", vec![doc("insurance", DocumentStatus::Expired, true)]),
        ];
        let summary = aggregate(&drivers, 3);

        let ranked: Vec<(&str, u32)> = summary
            .top_issues
            .iter()
            .map(|i| (i.doc_type.as_str(), i.count))
            .collect();
        assert_eq!(
            ranked,
            vec![("insurance", 2), ("medical_card", 2), ("license", 1)]
        );
    }

    #[test]
    fn test_top_issues_truncated() {
        let drivers = vec![driver(
            "a",
            vec![
                doc("a", DocumentStatus::Missing, true),
                doc("b", DocumentStatus::Missing, true),
                doc("c", DocumentStatus::Missing, true),
            ],
        )];
        assert_eq!(aggregate(&drivers, 2).top_issues.len(), 2);
    }
}
