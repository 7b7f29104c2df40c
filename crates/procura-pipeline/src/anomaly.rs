//! Advisory anomaly detection over normalized records.
//!
//! Records with an active fix entry have been adjudicated: they are neither
//! flagged nor used as peers in the statistics. Output is sorted by record id
//! then reason and, because the run timestamp is an input, is identical for
//! identical input.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use procura_core::{
    AnomalyFlag, AnomalyReason, ContractRecord, Dimension, LedgerSnapshot, RecordId, sort_flags,
};
use tracing::info;

use crate::config::AnomalyConfig;
use crate::stats::{leave_one_out_scores, round4};

/// Smallest spread used for amounts: one minor unit.
const AMOUNT_FLOOR: f64 = 1.0;
/// Smallest spread used for durations: one day.
const DURATION_FLOOR: f64 = 1.0;

pub fn detect(
    records: &[ContractRecord],
    ledger: &LedgerSnapshot,
    config: &AnomalyConfig,
    detected_at: DateTime<Utc>,
) -> Vec<AnomalyFlag> {
    let open: Vec<&ContractRecord> = records
        .iter()
        .filter(|r| !ledger.contains(r.id()))
        .collect();

    let mut flags = Vec::new();
    let mut push = |record_id: &RecordId, reason: AnomalyReason, severity: f64| {
        flags.push(AnomalyFlag {
            record_id: record_id.clone(),
            reason,
            severity,
            detected_at,
        });
    };

    let amount_samples = open.iter().filter(|r| {
        r.amount().is_positive() && r.amount().minor >= config.min_amount_minor
    });
    for (id, score) in outliers(amount_samples, config, AMOUNT_FLOOR, |r| {
        Some(r.amount().minor as f64)
    }) {
        push(id, AnomalyReason::AmountOutlier, score);
    }

    if config.durations {
        for (id, score) in outliers(open.iter(), config, DURATION_FLOOR, |r| {
            r.duration_days().map(|d| d as f64)
        }) {
            push(id, AnomalyReason::DurationOutlier, score);
        }
    }

    for (ids, size) in duplicate_signatures(&open) {
        for id in ids {
            push(id, AnomalyReason::DuplicateSignature, size as f64);
        }
    }

    for record in &open {
        if record.service_category().is_unclassified() || !record.amount().is_positive() {
            push(record.id(), AnomalyReason::MissingRequiredField, 1.0);
        }
    }

    sort_flags(&mut flags);
    info!(
        records = records.len(),
        adjudicated = records.len() - open.len(),
        flags = flags.len(),
        "anomaly detection complete"
    );
    flags
}

/// Peer group key: the configured dimension's code plus currency, so
/// amounts in different currencies are never compared.
fn group_key(record: &ContractRecord, dimension: Dimension) -> Option<(String, String)> {
    let code = match dimension {
        Dimension::Entity => record.entity().code.clone(),
        Dimension::Contractor => record.contractor().code.clone(),
        Dimension::Service => {
            if record.service_category().is_unclassified() {
                return None;
            }
            record.service_category().code().to_string()
        }
    };
    Some((code, record.amount().currency.clone()))
}

/// Records whose value scores above the multiplier within their peer group.
fn outliers<'a>(
    records: impl Iterator<Item = &'a &'a ContractRecord>,
    config: &AnomalyConfig,
    floor: f64,
    value: impl Fn(&ContractRecord) -> Option<f64>,
) -> Vec<(&'a RecordId, f64)> {
    let mut groups: BTreeMap<(String, String), Vec<(&RecordId, f64)>> = BTreeMap::new();
    for record in records {
        if let Some(key) = group_key(record, config.group_by)
            && let Some(v) = value(*record)
        {
            groups.entry(key).or_default().push((record.id(), v));
        }
    }

    let mut out = Vec::new();
    for members in groups.into_values() {
        if members.len() < config.min_group_size {
            continue;
        }
        let values: Vec<f64> = members.iter().map(|(_, v)| *v).collect();
        let scores = leave_one_out_scores(&values, config.min_relative_spread, floor);
        for ((id, _), score) in members.into_iter().zip(scores) {
            if score > config.mad_multiplier {
                out.push((id, round4(score)));
            }
        }
    }
    out
}

type Signature<'a> = (&'a str, &'a str, i64, &'a str, NaiveDate);

/// Groups of distinct ids sharing `(entity, contractor, amount, start_date)`.
fn duplicate_signatures<'a>(records: &[&'a ContractRecord]) -> Vec<(BTreeSet<&'a RecordId>, usize)> {
    let mut groups: BTreeMap<Signature<'a>, BTreeSet<&'a RecordId>> = BTreeMap::new();
    for &record in records {
        let signature = (
            record.entity().code.as_str(),
            record.contractor().code.as_str(),
            record.amount().minor,
            record.amount().currency.as_str(),
            record.start_date(),
        );
        groups.entry(signature).or_default().insert(record.id());
    }
    groups
        .into_values()
        .filter(|ids| ids.len() > 1)
        .map(|ids| {
            let size = ids.len();
            (ids, size)
        })
        .collect()
}
