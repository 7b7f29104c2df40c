//! Terminal rendering for run summaries, aggregate views, flags and fixes.
//!
//! Everything here prints to stdout; logs go to stderr.

use procura_core::{AggregateView, AnomalyFlag, FixAction, FixEntry};
use procura_pipeline::{NormalizeOutcome, ReconcileReport};

const LABEL_WIDTH: usize = 40;

// ── Summaries ──

fn line(label: &str, value: impl std::fmt::Display) {
    println!("  {:<26} {}", label, value);
}

pub fn print_normalize_summary(rows: usize, outcome: &NormalizeOutcome) {
    println!("Normalization");
    line("raw rows", rows);
    line("records", outcome.records.len());
    line("duplicates collapsed", outcome.duplicates_collapsed);
    line("failures", outcome.failures.len());
    for (kind, count) in outcome.failure_counts() {
        line(&format!("  {kind}"), count);
    }
    println!();
}

pub fn print_failures(outcome: &NormalizeOutcome, limit: usize) {
    if outcome.failures.is_empty() {
        return;
    }
    println!("First failures");
    for failure in outcome.failures.iter().take(limit) {
        println!("  {failure}");
    }
    if outcome.failures.len() > limit {
        println!("  ... {} more", outcome.failures.len() - limit);
    }
    println!();
}

pub fn print_reconcile_summary(report: &ReconcileReport) {
    println!("Reconciliation");
    line("dropped", report.dropped.len());
    line("overridden", report.overridden.len());
    line("orphaned fix entries", report.orphaned.len());
    println!();
}

// ── Aggregates ──

/// One view as a ranked table, truncated to `top` rows (0 = all).
pub fn print_view(view: &AggregateView, top: usize) {
    println!("=== {} · {} ===", view.dimension, view.period);
    if view.buckets.is_empty() {
        println!("  (no contracts in period)");
        println!();
        return;
    }
    println!(
        "  {:<width$} {:>4} {:>18} {:>7} {:>16} {:>7}",
        "group",
        "cur",
        "total",
        "count",
        "mean",
        "share",
        width = LABEL_WIDTH
    );
    let ranked = view.ranked();
    let shown = if top == 0 { ranked.len() } else { top.min(ranked.len()) };
    for bucket in &ranked[..shown] {
        let mut count = bucket.contract_count.to_string();
        if bucket.cancelled_count > 0 {
            count.push_str(&format!(" ({}x)", bucket.cancelled_count));
        }
        println!(
            "  {:<width$} {:>4} {:>18} {:>7} {:>16} {:>6.2}%",
            truncate(&bucket.label, LABEL_WIDTH),
            bucket.currency,
            bucket.total_amount.to_decimal_string(),
            count,
            bucket.mean_amount.to_decimal_string(),
            view.share_percent(bucket),
            width = LABEL_WIDTH
        );
    }
    if shown < ranked.len() {
        println!("  ... {} more groups", ranked.len() - shown);
    }
    println!("  {} contracts in {} groups", view.contract_count(), view.buckets.len());
    println!();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push('…');
    out
}

// ── Flags ──

pub fn print_flags(flags: &[AnomalyFlag]) -> anyhow::Result<()> {
    if flags.is_empty() {
        println!("No anomalies flagged.");
        return Ok(());
    }
    let batch = procura_store::flags_to_batch(flags)?;
    println!("{}", arrow::util::pretty::pretty_format_batches(&[batch])?);
    println!("{} flags", flags.len());
    Ok(())
}

// ── Fixes ──

pub fn print_fix_entry(entry: &FixEntry) {
    println!("=== {} ===", entry.record_id);
    line("action", format!("{:?}", entry.kind()).to_uppercase());
    line("authored_at", entry.authored_at.to_rfc3339());
    if !entry.rationale.is_empty() {
        line("rationale", &entry.rationale);
    }
    if let FixAction::Override { overrides } = &entry.action {
        for (field, value) in overrides {
            line(&format!("  {field}"), value);
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("Educación", 20), "Educación");
        assert_eq!(truncate("Departamento de Educación", 10), "Departame…");
    }
}
