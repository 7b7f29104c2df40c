//! Conversions between pipeline values and Arrow RecordBatches.
//!
//! Raw registry rows come in with whatever schema the scraper produced, so
//! they are read through the Arrow JSON writer and flattened to strings.
//! Everything written back out uses the fixed schemas in
//! [`procura_core::tables`].

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, Date32Array, Float64Array, Int64Array, ListBuilder, StringArray, StringBuilder,
    TimestampMicrosecondArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::json::ArrayWriter;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::{Datelike, NaiveDate};
use procura_core::{
    AggregateBucket, AnomalyFlag, ContractRecord, Dimension, RawRow, RecordId, ServiceCategory,
    raw_row_from_json, tables,
};

use crate::StoreError;

/// `num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn date32(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

/// Flatten batches of any schema into raw rows, one per batch row.
///
/// Null cells are left out of the row, so a missing value and a null look
/// the same to the normalizer.
pub fn batches_to_raw_rows(batches: &[RecordBatch]) -> Result<Vec<RawRow>, StoreError> {
    let mut rows = Vec::with_capacity(batches.iter().map(|b| b.num_rows()).sum());
    for batch in batches {
        if batch.num_rows() == 0 {
            continue;
        }
        let mut writer = ArrayWriter::new(Vec::new());
        writer.write(batch)?;
        writer.finish()?;
        let objects: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_slice(&writer.into_inner())?;
        rows.extend(objects.iter().map(raw_row_from_json));
    }
    Ok(rows)
}

/// Raw rows as one all-string batch.
///
/// Columns are the union of row keys and `columns`, sorted by name; a key
/// missing from a row becomes null. Passing the registry's known fields in
/// `columns` keeps the schema stable even for an empty pull.
pub fn raw_rows_to_batch(rows: &[RawRow], columns: &[&str]) -> Result<RecordBatch, StoreError> {
    let mut names: BTreeSet<&str> = columns.iter().copied().collect();
    for row in rows {
        names.extend(row.keys().map(String::as_str));
    }
    let fields: Vec<Field> = names
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, true))
        .collect();
    let arrays: Vec<ArrayRef> = names
        .iter()
        .map(|name| {
            Arc::new(StringArray::from_iter(
                rows.iter().map(|row| row.get(*name).map(String::as_str)),
            )) as ArrayRef
        })
        .collect();
    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        arrays,
        &options,
    )?)
}

/// Canonical records in `contracts_schema` layout.
pub fn records_to_batch(records: &[ContractRecord]) -> Result<RecordBatch, StoreError> {
    let mut raw_fields = Vec::with_capacity(records.len());
    for record in records {
        raw_fields.push(serde_json::to_string(record.raw_fields())?);
    }
    let service_raw: Vec<Option<&str>> = records
        .iter()
        .map(|r| match r.service_category() {
            ServiceCategory::Unclassified { raw } => Some(raw.as_str()),
            ServiceCategory::Classified { .. } => None,
        })
        .collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.id().as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.entity().code.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.entity().name.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.contractor().code.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.contractor().name.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.service_category().code()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.service_category().label()),
        )),
        Arc::new(StringArray::from(service_raw)),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.amount().minor),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.amount().currency.as_str()),
        )),
        Arc::new(Date32Array::from_iter_values(
            records.iter().map(|r| date32(r.start_date())),
        )),
        Arc::new(Date32Array::from_iter(
            records.iter().map(|r| r.end_date().map(date32)),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.contract_number()),
        )),
        Arc::new(Date32Array::from_iter(
            records.iter().map(|r| r.granted_on().map(date32)),
        )),
        Arc::new(Date32Array::from_iter(
            records.iter().map(|r| r.cancelled_on().map(date32)),
        )),
        Arc::new(StringArray::from(raw_fields)),
    ];
    Ok(RecordBatch::try_new(
        Arc::new(tables::contracts_schema()),
        columns,
    )?)
}

/// Aggregate buckets of one dimension in `aggregates_schema` layout.
pub fn buckets_to_batch(
    dimension: Dimension,
    buckets: &[AggregateBucket],
) -> Result<RecordBatch, StoreError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            buckets.iter().map(|_| dimension.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            buckets.iter().map(|b| b.group_key.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            buckets.iter().map(|b| b.label.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            buckets.iter().map(|b| b.currency.as_str()),
        )),
        Arc::new(Date32Array::from_iter_values(
            buckets.iter().map(|b| date32(b.period.from())),
        )),
        Arc::new(Date32Array::from_iter_values(
            buckets.iter().map(|b| date32(b.period.to())),
        )),
        Arc::new(Int64Array::from_iter_values(
            buckets.iter().map(|b| b.total_amount.minor),
        )),
        Arc::new(UInt64Array::from_iter_values(
            buckets.iter().map(|b| b.contract_count),
        )),
        Arc::new(Int64Array::from_iter_values(
            buckets.iter().map(|b| b.mean_amount.minor),
        )),
        Arc::new(UInt64Array::from_iter_values(
            buckets.iter().map(|b| b.cancelled_count),
        )),
        id_lists(buckets.iter().map(|b| b.contract_ids.as_slice())),
        id_lists(buckets.iter().map(|b| b.cancelled_ids.as_slice())),
    ];
    Ok(RecordBatch::try_new(
        Arc::new(tables::aggregates_schema()),
        columns,
    )?)
}

fn id_lists<'a>(lists: impl Iterator<Item = &'a [RecordId]>) -> ArrayRef {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for ids in lists {
        for id in ids {
            builder.values().append_value(id.as_str());
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}

/// Anomaly flags in `flags_schema` layout.
pub fn flags_to_batch(flags: &[AnomalyFlag]) -> Result<RecordBatch, StoreError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            flags.iter().map(|f| f.record_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            flags.iter().map(|f| f.reason.as_str()),
        )),
        Arc::new(Float64Array::from_iter_values(
            flags.iter().map(|f| f.severity),
        )),
        Arc::new(
            TimestampMicrosecondArray::from_iter_values(
                flags.iter().map(|f| f.detected_at.timestamp_micros()),
            )
            .with_timezone("UTC"),
        ),
    ];
    Ok(RecordBatch::try_new(Arc::new(tables::flags_schema()), columns)?)
}
