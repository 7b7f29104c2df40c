//! CSV exports for human review.

use std::io::Write;

use procura_core::{AggregateBucket, AggregateView, AnomalyFlag, RecordId};
use serde::Serialize;

use crate::StoreError;

#[derive(Debug, Serialize)]
struct BucketRow<'a> {
    dimension: &'a str,
    group_key: &'a str,
    label: &'a str,
    currency: &'a str,
    period_from: String,
    period_to: String,
    total_amount: String,
    contract_count: u64,
    mean_amount: String,
    cancelled_count: u64,
    share_percent: String,
    count_share_percent: String,
    cancelled_share_percent: String,
    contract_ids: String,
    cancelled_ids: String,
}

impl<'a> BucketRow<'a> {
    fn new(view: &'a AggregateView, bucket: &'a AggregateBucket) -> Self {
        Self {
            dimension: view.dimension.as_str(),
            group_key: &bucket.group_key,
            label: &bucket.label,
            currency: &bucket.currency,
            period_from: bucket.period.from().to_string(),
            period_to: bucket.period.to().to_string(),
            total_amount: bucket.total_amount.to_decimal_string(),
            contract_count: bucket.contract_count,
            mean_amount: bucket.mean_amount.to_decimal_string(),
            cancelled_count: bucket.cancelled_count,
            share_percent: format!("{:.2}", view.share_percent(bucket)),
            count_share_percent: format!("{:.2}", view.count_share_percent(bucket)),
            cancelled_share_percent: format!("{:.2}", view.cancelled_share_percent(bucket)),
            contract_ids: join_ids(&bucket.contract_ids),
            cancelled_ids: join_ids(&bucket.cancelled_ids),
        }
    }
}

/// Ids joined with `;` so one bucket stays one CSV cell.
fn join_ids(ids: &[RecordId]) -> String {
    ids.iter().map(RecordId::as_str).collect::<Vec<_>>().join(";")
}

#[derive(Debug, Serialize)]
struct FlagRow<'a> {
    record_id: &'a str,
    reason: &'a str,
    severity: f64,
    detected_at: String,
}

/// Write any serializable rows as CSV with a header line.
pub fn write_rows<W: Write, T: Serialize>(
    out: W,
    rows: impl IntoIterator<Item = T>,
) -> Result<usize, StoreError> {
    let mut writer = csv::Writer::from_writer(out);
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Buckets of each view in ranked order (largest total first), amounts as
/// decimals. Views share one header, told apart by the `dimension` column.
pub fn write_views_csv<W: Write>(out: W, views: &[&AggregateView]) -> Result<usize, StoreError> {
    write_rows(
        out,
        views.iter().copied().flat_map(|view| {
            view.ranked()
                .into_iter()
                .map(move |b| BucketRow::new(view, b))
        }),
    )
}

pub fn write_flags_csv<W: Write>(out: W, flags: &[AnomalyFlag]) -> Result<usize, StoreError> {
    write_rows(
        out,
        flags.iter().map(|f| FlagRow {
            record_id: f.record_id.as_str(),
            reason: f.reason.as_str(),
            severity: f.severity,
            detected_at: f.detected_at.to_rfc3339(),
        }),
    )
}
