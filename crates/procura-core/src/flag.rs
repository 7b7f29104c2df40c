//! Advisory anomaly flags.
//!
//! Flags are produced fresh on every detection run and are never merged with
//! a previous run's output. They point a reviewer at a record; they never
//! change data.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::RecordId;

/// Why a record was flagged.
///
/// Declaration order is the sort order of flags for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyReason {
    AmountOutlier,
    DurationOutlier,
    DuplicateSignature,
    MissingRequiredField,
}

impl AnomalyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmountOutlier => "AMOUNT_OUTLIER",
            Self::DurationOutlier => "DURATION_OUTLIER",
            Self::DuplicateSignature => "DUPLICATE_SIGNATURE",
            Self::MissingRequiredField => "MISSING_REQUIRED_FIELD",
        }
    }
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub record_id: RecordId,
    pub reason: AnomalyReason,
    /// Higher is more suspicious. Robust score for outliers, group size for
    /// duplicates, 1.0 for missing fields.
    pub severity: f64,
    pub detected_at: DateTime<Utc>,
}

/// Put flags in review order: by record id, then reason.
pub fn sort_flags(flags: &mut [AnomalyFlag]) {
    flags.sort_by(|a, b| {
        a.record_id
            .cmp(&b.record_id)
            .then_with(|| a.reason.cmp(&b.reason))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(id: &str, reason: AnomalyReason) -> AnomalyFlag {
        AnomalyFlag {
            record_id: id.into(),
            reason,
            severity: 1.0,
            detected_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn reason_order_matches_code_order() {
        let mut reasons = vec![
            AnomalyReason::MissingRequiredField,
            AnomalyReason::AmountOutlier,
            AnomalyReason::DuplicateSignature,
            AnomalyReason::DurationOutlier,
        ];
        reasons.sort();
        let codes: Vec<&str> = reasons.iter().map(|r| r.as_str()).collect();
        let mut sorted_codes = codes.clone();
        sorted_codes.sort();
        assert_eq!(codes, sorted_codes);
    }

    #[test]
    fn sorts_by_record_then_reason() {
        let mut flags = vec![
            flag("B", AnomalyReason::AmountOutlier),
            flag("A", AnomalyReason::MissingRequiredField),
            flag("A", AnomalyReason::AmountOutlier),
        ];
        sort_flags(&mut flags);
        let order: Vec<(&str, AnomalyReason)> = flags
            .iter()
            .map(|f| (f.record_id.as_str(), f.reason))
            .collect();
        assert_eq!(
            order,
            vec![
                ("A", AnomalyReason::AmountOutlier),
                ("A", AnomalyReason::MissingRequiredField),
                ("B", AnomalyReason::AmountOutlier),
            ]
        );
    }

    #[test]
    fn reason_serializes_as_code() {
        let json = serde_json::to_string(&AnomalyReason::DuplicateSignature).unwrap();
        assert_eq!(json, "\"DUPLICATE_SIGNATURE\"");
    }
}
