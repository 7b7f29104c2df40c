use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use procura_core::{ModelError, RecordId};
use thiserror::Error;

/// Why a single raw row could not be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NormalizationErrorKind {
    BadDate,
    BadAmount,
    MissingField,
    DateOrder,
    DuplicateId,
}

impl NormalizationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadDate => "BAD_DATE",
            Self::BadAmount => "BAD_AMOUNT",
            Self::MissingField => "MISSING_FIELD",
            Self::DateOrder => "DATE_ORDER",
            Self::DuplicateId => "DUPLICATE_ID",
        }
    }
}

impl fmt::Display for NormalizationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-row failure. Collected and reported; never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{record_id}: {kind} in '{field}': {detail}")]
pub struct NormalizationError {
    pub record_id: RecordId,
    pub field: String,
    pub kind: NormalizationErrorKind,
    pub detail: String,
}

impl NormalizationError {
    pub fn new(
        record_id: &RecordId,
        field: impl Into<String>,
        kind: NormalizationErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.clone(),
            field: field.into(),
            kind,
            detail: detail.into(),
        }
    }
}

/// A defect in the fix ledger. Aborts the run.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("fix for '{record_id}' overrides unknown field '{field}'")]
    UnknownField { record_id: RecordId, field: String },

    #[error("fix for '{record_id}' overrides read-only field '{field}'")]
    ReadOnlyField { record_id: RecordId, field: String },

    #[error("fix for '{record_id}' has an invalid value for '{field}': {reason}")]
    InvalidValue {
        record_id: RecordId,
        field: String,
        reason: String,
    },

    #[error("fix for '{record_id}' leaves end date {end} before start date {start}")]
    DateOrder {
        record_id: RecordId,
        start: NaiveDate,
        end: NaiveDate,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config validation failed: {0}")]
    Validation(String),

    #[error("no period named '{0}'")]
    UnknownPeriod(String),
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("total for '{group_key}' ({currency}) overflows")]
    Overflow { group_key: String, currency: String },
}

/// Fatal errors of a full pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
