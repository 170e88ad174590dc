//! Page validation: raw records in, normalized records and an outcome out.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::feedback::ValidationOutcome;
use crate::types::product::{ProductRecord, RecordIssue};
use crate::types::session::PageValidationInfo;

/// Result of validating one extracted page.
#[derive(Debug, Clone)]
pub struct PageValidation {
    /// Records that normalized cleanly
    pub records: Vec<ProductRecord>,
    pub outcome: ValidationOutcome,
    pub info: PageValidationInfo,
}

/// Normalize every raw record and judge the page.
///
/// The page passes when at least `min_valid_ratio` of the raw records are
/// valid and at least one is. Issues are grouped by kind so the feedback
/// stays short on large pages.
pub fn validate_page(
    raw: &[Value],
    vendor: &str,
    category: &str,
    min_valid_ratio: f64,
) -> PageValidation {
    if raw.is_empty() {
        return PageValidation {
            records: Vec::new(),
            outcome: ValidationOutcome::Failed {
                issues: vec!["no products were extracted".to_string()],
                suggestions: vec![
                    "Wait for the product grid to load and extract every product card on the page"
                        .to_string(),
                ],
                confidence: 0.0,
            },
            info: PageValidationInfo {
                issues: vec!["no products were extracted".to_string()],
                ..PageValidationInfo::default()
            },
        };
    }

    let mut records = Vec::with_capacity(raw.len());
    let mut by_label: BTreeMap<&'static str, (usize, &'static str)> = BTreeMap::new();
    for item in raw {
        match ProductRecord::from_raw(item, vendor, category) {
            Ok(record) => records.push(record),
            Err(issue) => tally(&mut by_label, &issue),
        }
    }

    let total = raw.len();
    let ratio = records.len() as f64 / total as f64;
    let passed = !records.is_empty() && ratio >= min_valid_ratio;

    let issues: Vec<String> = by_label
        .iter()
        .map(|(label, (count, _))| format!("{} of {} products: {}", count, total, label))
        .collect();
    let mut suggestions: Vec<String> = Vec::new();
    for (_, suggestion) in by_label.values() {
        if !suggestions.iter().any(|s| s == suggestion) {
            suggestions.push(suggestion.to_string());
        }
    }

    let average_quality = if records.is_empty() {
        None
    } else {
        Some(records.iter().map(|r| r.quality_score()).sum::<f64>() / records.len() as f64)
    };

    let outcome = if passed {
        ValidationOutcome::Passed { confidence: ratio }
    } else {
        ValidationOutcome::Failed {
            issues: issues.clone(),
            suggestions,
            confidence: ratio,
        }
    };

    PageValidation {
        info: PageValidationInfo {
            raw_count: total,
            valid_count: records.len(),
            passed,
            attempts: 0,
            average_quality,
            issues,
        },
        records,
        outcome,
    }
}

fn tally(by_label: &mut BTreeMap<&'static str, (usize, &'static str)>, issue: &RecordIssue) {
    by_label
        .entry(issue.label())
        .or_insert((0, issue.suggestion()))
        .0 += 1;
}
