//! Date-filtered spend aggregation by entity, contractor or service.
//!
//! A record is in a period when its `start_date` falls inside the inclusive
//! range; end dates are ignored. Buckets are keyed by `(group_key, currency)`
//! so currencies are never summed together, and only non-empty buckets are
//! produced.

use std::collections::BTreeMap;

use procura_core::{
    AggregateBucket, AggregateTrio, AggregateView, ContractRecord, DateRange, Dimension, Money,
    RecordId,
};
use tracing::info;

use crate::error::AggregateError;

struct Accumulator {
    label: String,
    total: i64,
    ids: Vec<RecordId>,
    cancelled_ids: Vec<RecordId>,
}

/// `(group_key, label)` of a record under one dimension.
fn group_of(record: &ContractRecord, dimension: Dimension) -> (&str, &str) {
    match dimension {
        Dimension::Entity => (record.entity().code.as_str(), record.entity().name.as_str()),
        Dimension::Contractor => (
            record.contractor().code.as_str(),
            record.contractor().name.as_str(),
        ),
        Dimension::Service => (
            record.service_category().code(),
            record.service_category().label(),
        ),
    }
}

pub fn aggregate(
    records: &[ContractRecord],
    period: DateRange,
    dimension: Dimension,
) -> Result<AggregateView, AggregateError> {
    let mut groups: BTreeMap<(String, String), Accumulator> = BTreeMap::new();
    for record in records.iter().filter(|r| period.contains(r.start_date())) {
        let (key, label) = group_of(record, dimension);
        let currency = &record.amount().currency;
        let acc = groups
            .entry((key.to_string(), currency.clone()))
            .or_insert_with(|| Accumulator {
                label: label.to_string(),
                total: 0,
                ids: Vec::new(),
                cancelled_ids: Vec::new(),
            });
        // Smallest label wins so the result does not depend on input order.
        if label < acc.label.as_str() {
            acc.label = label.to_string();
        }
        acc.total = acc
            .total
            .checked_add(record.amount().minor)
            .ok_or_else(|| AggregateError::Overflow {
                group_key: key.to_string(),
                currency: currency.clone(),
            })?;
        acc.ids.push(record.id().clone());
        if record.cancelled_on().is_some() {
            acc.cancelled_ids.push(record.id().clone());
        }
    }

    let mut buckets = Vec::with_capacity(groups.len());
    for ((group_key, currency), mut acc) in groups {
        acc.ids.sort();
        acc.cancelled_ids.sort();
        let count = acc.ids.len() as u64;
        let total_amount = Money::new(acc.total, currency.clone());
        let mean_amount = total_amount
            .div_round(count)
            .ok_or_else(|| AggregateError::Overflow {
                group_key: group_key.clone(),
                currency: currency.clone(),
            })?;
        buckets.push(AggregateBucket {
            group_key,
            label: acc.label,
            currency,
            period,
            total_amount,
            contract_count: count,
            mean_amount,
            cancelled_count: acc.cancelled_ids.len() as u64,
            contract_ids: acc.ids,
            cancelled_ids: acc.cancelled_ids,
        });
    }

    info!(
        %dimension,
        %period,
        buckets = buckets.len(),
        "aggregation complete"
    );
    Ok(AggregateView {
        dimension,
        period,
        buckets,
    })
}

/// All three dimensions over one period.
pub fn aggregate_all(
    records: &[ContractRecord],
    period: DateRange,
) -> Result<AggregateTrio, AggregateError> {
    Ok(AggregateTrio {
        entity: aggregate(records, period, Dimension::Entity)?,
        contractor: aggregate(records, period, Dimension::Contractor)?,
        service: aggregate(records, period, Dimension::Service)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use procura_core::{Party, RawRow, RecordId, RecordParts, ServiceCategory};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(from: &str, to: &str) -> DateRange {
        DateRange::new(d(from), d(to)).unwrap()
    }

    fn record(id: &str, entity: &str, service: &str, minor: i64, start: &str) -> ContractRecord {
        RecordParts {
            id: RecordId::new(id),
            entity: Party::from_name(entity),
            contractor: Party::from_name("C1"),
            service_category: ServiceCategory::classified(procura_core::name_key(service), service),
            amount: Money::new(minor, "USD"),
            start_date: d(start),
            end_date: None,
            contract_number: None,
            granted_on: None,
            cancelled_on: None,
            raw_fields: RawRow::new(),
        }
        .build()
        .unwrap()
    }

    #[test]
    fn totals_counts_and_means() {
        let records = vec![
            record("1", "E1", "Legal", 100_000, "2023-01-05"),
            record("2", "E1", "Legal", 50_001, "2023-01-06"),
            record("3", "E2", "IT", 20_000, "2023-01-07"),
        ];
        let view = aggregate(&records, range("2023-01-01", "2023-01-31"), Dimension::Service).unwrap();
        assert_eq!(view.buckets.len(), 2);
        let it = &view.buckets[0];
        assert_eq!((it.group_key.as_str(), it.label.as_str()), ("it", "IT"));
        let legal = &view.buckets[1];
        assert_eq!(legal.total_amount, Money::new(150_001, "USD"));
        assert_eq!(legal.contract_count, 2);
        // 75,000.5 cents rounds away from zero.
        assert_eq!(legal.mean_amount, Money::new(75_001, "USD"));
    }

    #[test]
    fn bounds_are_inclusive_and_use_start_date() {
        let mut late = record("3", "E1", "Legal", 1, "2023-01-31").into_parts();
        late.end_date = Some(d("2023-12-31"));
        let records = vec![
            record("1", "E1", "Legal", 1, "2023-01-01"),
            record("2", "E1", "Legal", 1, "2022-12-31"),
            late.build().unwrap(),
            record("4", "E1", "Legal", 1, "2023-02-01"),
        ];
        let view = aggregate(&records, range("2023-01-01", "2023-01-31"), Dimension::Entity).unwrap();
        assert_eq!(view.buckets.len(), 1);
        assert_eq!(view.buckets[0].contract_count, 2);
    }

    #[test]
    fn conservation_across_dimensions() {
        let records = vec![
            record("1", "E1", "Legal", 100_000, "2023-01-05"),
            record("2", "E2", "Legal", 25_000, "2023-01-06"),
            record("3", "E2", "IT", 30_000, "2023-01-07"),
            record("4", "E3", "IT", 5, "2023-03-07"),
        ];
        let period = range("2023-01-01", "2023-01-31");
        let expected: i64 = records
            .iter()
            .filter(|r| period.contains(r.start_date()))
            .map(|r| r.amount().minor)
            .sum();
        let trio = aggregate_all(&records, period).unwrap();
        for dim in Dimension::ALL {
            let view = trio.get(dim);
            assert_eq!(view.total_minor("USD"), expected, "{dim}");
            assert_eq!(view.contract_count(), 3, "{dim}");
        }
    }

    #[test]
    fn currencies_are_kept_apart() {
        let mut eur = record("2", "E1", "Legal", 700, "2023-01-06").into_parts();
        eur.amount = Money::new(700, "EUR");
        let records = vec![record("1", "E1", "Legal", 100, "2023-01-05"), eur.build().unwrap()];
        let view = aggregate(&records, range("2023-01-01", "2023-01-31"), Dimension::Entity).unwrap();
        assert_eq!(view.buckets.len(), 2);
        assert_eq!(view.buckets[0].currency, "EUR");
        assert_eq!(view.buckets[1].currency, "USD");
    }

    #[test]
    fn cancelled_contracts_are_counted() {
        let mut cancelled = record("2", "E1", "Legal", 700, "2023-01-06").into_parts();
        cancelled.cancelled_on = Some(d("2023-02-01"));
        let records = vec![cancelled.build().unwrap(), record("1", "E1", "Legal", 100, "2023-01-05")];
        let view = aggregate(&records, range("2023-01-01", "2023-01-31"), Dimension::Entity).unwrap();
        let bucket = &view.buckets[0];
        assert_eq!(bucket.cancelled_count, 1);
        assert_eq!(bucket.contract_count, 2);
        assert_eq!(bucket.contract_ids, vec![RecordId::new("1"), RecordId::new("2")]);
        assert_eq!(bucket.cancelled_ids, vec![RecordId::new("2")]);
    }

    #[test]
    fn empty_window_has_no_buckets() {
        let records = vec![record("1", "E1", "Legal", 100, "2023-01-05")];
        let view = aggregate(&records, range("2024-01-01", "2024-12-31"), Dimension::Service).unwrap();
        assert!(view.buckets.is_empty());
    }

    #[test]
    fn overflow_is_an_error() {
        let records = vec![
            record("1", "E1", "Legal", i64::MAX, "2023-01-05"),
            record("2", "E1", "Legal", 1, "2023-01-06"),
        ];
        let err = aggregate(&records, range("2023-01-01", "2023-01-31"), Dimension::Entity);
        assert!(matches!(err, Err(AggregateError::Overflow { .. })));
    }
}
