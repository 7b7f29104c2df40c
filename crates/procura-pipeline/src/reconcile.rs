//! Apply the fix ledger to normalized records.
//!
//! DROP removes a record, OVERRIDE replaces exactly the named fields, and a
//! record without an active entry passes through unchanged. A bad override
//! is a defect in the ledger, so it aborts the run instead of being skipped.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use procura_core::{
    ContractRecord, FieldName, FixAction, LedgerSnapshot, ModelError, Money, Party, RecordId,
    RecordParts, is_currency_code,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ReconciliationError;
use crate::normalize::Normalizer;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub dropped: Vec<RecordId>,
    pub overridden: Vec<RecordId>,
    /// Active ledger entries whose record is not in this run.
    pub orphaned: Vec<RecordId>,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    /// Sorted by id.
    pub records: Vec<ContractRecord>,
    pub report: ReconcileReport,
}

pub fn reconcile(
    records: Vec<ContractRecord>,
    ledger: &LedgerSnapshot,
    normalizer: &Normalizer,
) -> Result<Reconciled, ReconciliationError> {
    let present: BTreeSet<RecordId> = records.iter().map(|r| r.id().clone()).collect();
    let mut report = ReconcileReport::default();
    let mut out = Vec::with_capacity(records.len());

    for record in records {
        let Some(entry) = ledger.get(record.id()) else {
            out.push(record);
            continue;
        };
        match &entry.action {
            FixAction::Drop => report.dropped.push(record.id().clone()),
            FixAction::Override { overrides } => {
                let id = record.id().clone();
                let mut parts = record.into_parts();
                for (field, value) in overrides {
                    apply_override(&mut parts, field, value, normalizer)?;
                }
                let record = parts.build().map_err(|e| match e {
                    ModelError::DateOrder { start, end } => ReconciliationError::DateOrder {
                        record_id: id.clone(),
                        start,
                        end,
                    },
                    other => ReconciliationError::InvalidValue {
                        record_id: id.clone(),
                        field: "record".into(),
                        reason: other.to_string(),
                    },
                })?;
                report.overridden.push(id);
                out.push(record);
            }
        }
    }

    for (id, _) in ledger.iter() {
        if !present.contains(id) {
            warn!(record_id = %id, "fix entry has no matching record in this run");
            report.orphaned.push(id.clone());
        }
    }

    out.sort_by(|a, b| a.id().cmp(b.id()));
    report.dropped.sort();
    report.overridden.sort();
    info!(
        records = out.len(),
        dropped = report.dropped.len(),
        overridden = report.overridden.len(),
        orphaned = report.orphaned.len(),
        "reconciliation complete"
    );
    Ok(Reconciled {
        records: out,
        report,
    })
}

fn apply_override(
    parts: &mut RecordParts,
    field: &str,
    value: &Value,
    normalizer: &Normalizer,
) -> Result<(), ReconciliationError> {
    let record_id = parts.id.clone();
    let name: FieldName = field.parse().map_err(|e| match e {
        ModelError::ReadOnlyField(f) => ReconciliationError::ReadOnlyField {
            record_id: record_id.clone(),
            field: f,
        },
        _ => ReconciliationError::UnknownField {
            record_id: record_id.clone(),
            field: field.to_string(),
        },
    })?;
    let invalid = |reason: String| ReconciliationError::InvalidValue {
        record_id: record_id.clone(),
        field: field.to_string(),
        reason,
    };

    match name {
        FieldName::Entity => {
            parts.entity = Party::from_name(required_text(value).map_err(invalid)?);
        }
        FieldName::Contractor => {
            parts.contractor = Party::from_name(required_text(value).map_err(invalid)?);
        }
        FieldName::ServiceCategory => {
            let category = normalizer.classify(required_text(value).map_err(invalid)?);
            if category.is_unclassified() {
                return Err(invalid("not a recognized service category".into()));
            }
            parts.service_category = category;
        }
        FieldName::Amount => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => return Err(invalid(format!("expected a string or number, got {other}"))),
            };
            let minor = normalizer
                .parse_amount(&text)
                .map_err(|e| invalid(e.to_string()))?;
            parts.amount = Money::new(minor, parts.amount.currency.clone());
        }
        FieldName::Currency => {
            let code = required_text(value).map_err(invalid)?.to_ascii_uppercase();
            if !is_currency_code(&code) {
                return Err(invalid(format!("'{code}' is not a three-letter currency code")));
            }
            parts.amount = Money::new(parts.amount.minor, code);
        }
        FieldName::StartDate => {
            let text = required_text(value).map_err(invalid)?;
            parts.start_date = date(normalizer, text).map_err(invalid)?;
        }
        FieldName::EndDate => {
            parts.end_date = optional_date(normalizer, value).map_err(invalid)?;
        }
        FieldName::GrantedOn => {
            parts.granted_on = optional_date(normalizer, value).map_err(invalid)?;
        }
        FieldName::CancelledOn => {
            parts.cancelled_on = optional_date(normalizer, value).map_err(invalid)?;
        }
        FieldName::ContractNumber => {
            parts.contract_number = match value {
                Value::Null => None,
                _ => Some(required_text(value).map_err(invalid)?.to_string()),
            };
        }
    }
    Ok(())
}

fn required_text(value: &Value) -> Result<&str, String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim()),
        Value::String(_) => Err("value must not be empty".into()),
        other => Err(format!("expected a string, got {other}")),
    }
}

fn date(normalizer: &Normalizer, text: &str) -> Result<NaiveDate, String> {
    normalizer.parse_date(text).map_err(|e| e.to_string())
}

/// `null` clears the date.
fn optional_date(normalizer: &Normalizer, value: &Value) -> Result<Option<NaiveDate>, String> {
    match value {
        Value::Null => Ok(None),
        _ => date(normalizer, required_text(value)?).map(Some),
    }
}
