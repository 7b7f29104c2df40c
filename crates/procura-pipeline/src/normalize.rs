//! Raw registry rows to canonical contract records.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use procura_core::{
    ContractRecord, ModelError, Money, Party, RawRow, RecordId, RecordParts, ServiceCategory,
    UNCLASSIFIED_CODE, display_form, is_currency_code, name_key,
};
use tracing::{debug, info};

use crate::amount::{AmountParseError, parse_amount};
use crate::canonical::merge_names;
use crate::config::{CatalogMode, PipelineConfig, lookup};
use crate::dates::parse_date;
use crate::error::{NormalizationError, NormalizationErrorKind as Kind};

/// Joiner for contractor lists delivered as JSON.
pub const CONTRACTOR_SEPARATOR: &str = "; ";

/// Result of normalizing a batch.
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    /// Sorted by id.
    pub records: Vec<ContractRecord>,
    /// Sorted by record id, then field.
    pub failures: Vec<NormalizationError>,
    /// Byte-identical rows that were collapsed into one.
    pub duplicates_collapsed: usize,
}

impl NormalizeOutcome {
    pub fn failure_counts(&self) -> BTreeMap<Kind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Row normalizer bound to one configuration.
///
/// Holds the prebuilt catalog index so classification is a hash lookup.
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: PipelineConfig,
    catalog: HashMap<String, usize>,
}

impl Normalizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            catalog: config.catalog.index(),
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Registry id when present, content digest otherwise.
    pub fn record_id(&self, raw: &RawRow) -> RecordId {
        match lookup(raw, &self.config.fields.id) {
            Some(id) => RecordId::new(id),
            None => RecordId::digest(raw),
        }
    }

    /// Map a raw service string onto the catalog.
    pub fn classify(&self, raw: &str) -> ServiceCategory {
        let key = name_key(raw);
        if let Some(&i) = self.catalog.get(&key) {
            let def = &self.config.catalog.categories[i];
            return ServiceCategory::classified(def.code.clone(), def.label.clone());
        }
        match self.config.catalog.mode {
            CatalogMode::Open if !key.is_empty() && key != UNCLASSIFIED_CODE => {
                ServiceCategory::classified(key, display_form(raw))
            }
            _ => ServiceCategory::unclassified(raw.trim()),
        }
    }

    pub fn parse_amount(&self, value: &str) -> Result<i64, AmountParseError> {
        parse_amount(value, &self.config.amount)
    }

    pub fn parse_date(&self, value: &str) -> Result<NaiveDate, crate::dates::DateParseError> {
        parse_date(value, self.config.dates.slash_order)
    }

    /// Normalize one row.
    pub fn normalize_row(&self, raw: &RawRow) -> Result<ContractRecord, NormalizationError> {
        let fields = &self.config.fields;
        let id = self.record_id(raw);
        let missing = |field: &str| {
            NormalizationError::new(&id, field, Kind::MissingField, "no value in any source column")
        };

        let entity = lookup(raw, &fields.entity).ok_or_else(|| missing("entity"))?;
        let contractor = lookup(raw, &fields.contractor)
            .map(contractor_names)
            .filter(|names| !names.is_empty())
            .ok_or_else(|| missing("contractor"))?;
        let service = lookup(raw, &fields.service).unwrap_or_default();

        let amount_minor = match lookup(raw, &fields.amount) {
            None => 0,
            Some(value) => self.parse_amount(value).map_err(|e| {
                NormalizationError::new(&id, "amount", Kind::BadAmount, e.to_string())
            })?,
        };
        let currency = match lookup(raw, &fields.currency) {
            None => self.config.currency.clone(),
            Some(value) => {
                let code = value.to_ascii_uppercase();
                if !is_currency_code(&code) {
                    return Err(NormalizationError::new(
                        &id,
                        "currency",
                        Kind::BadAmount,
                        format!("'{value}' is not a three-letter currency code"),
                    ));
                }
                code
            }
        };

        let start_value = lookup(raw, &fields.start_date).ok_or_else(|| missing("start_date"))?;
        let start_date = self.parse_date(start_value).map_err(|e| {
            NormalizationError::new(&id, "start_date", Kind::BadDate, e.to_string())
        })?;
        let end_date = self.date_field(&id, "end_date", lookup(raw, &fields.end_date))?;
        let granted_on = self.date_field(&id, "granted_on", lookup(raw, &fields.granted_on))?;
        let cancelled_on =
            self.date_field(&id, "cancelled_on", lookup(raw, &fields.cancelled_on))?;

        let parts = RecordParts {
            id: id.clone(),
            entity: Party::from_name(entity),
            contractor: Party::from_name(&contractor),
            service_category: self.classify(service),
            amount: Money::new(amount_minor, currency),
            start_date,
            end_date,
            contract_number: lookup(raw, &fields.contract_number).map(str::to_string),
            granted_on,
            cancelled_on,
            raw_fields: raw.clone(),
        };
        parts.build().map_err(|e| match e {
            ModelError::DateOrder { .. } => {
                NormalizationError::new(&id, "end_date", Kind::DateOrder, e.to_string())
            }
            other => NormalizationError::new(&id, "record", Kind::MissingField, other.to_string()),
        })
    }

    fn date_field(
        &self,
        id: &RecordId,
        field: &str,
        value: Option<&str>,
    ) -> Result<Option<NaiveDate>, NormalizationError> {
        value
            .map(|v| self.parse_date(v))
            .transpose()
            .map_err(|e| NormalizationError::new(id, field, Kind::BadDate, e.to_string()))
    }

    /// Normalize a batch.
    ///
    /// Rows are independent, so they are split into contiguous chunks and
    /// normalized on scoped worker threads. Byte-identical rows collapse to
    /// one; distinct rows sharing an id are all rejected, whatever their
    /// order. Records then get canonical display names and are sorted by id.
    pub fn normalize_all(&self, rows: &[RawRow]) -> NormalizeOutcome {
        let mut seen: HashSet<&RawRow> = HashSet::with_capacity(rows.len());
        let unique: Vec<&RawRow> = rows.iter().filter(|r| seen.insert(*r)).collect();
        let duplicates_collapsed = rows.len() - unique.len();

        let ids: Vec<RecordId> = unique.iter().map(|r| self.record_id(r)).collect();
        let mut id_counts: HashMap<&RecordId, usize> = HashMap::new();
        for id in &ids {
            *id_counts.entry(id).or_insert(0) += 1;
        }

        let mut failures = Vec::new();
        let mut work = Vec::with_capacity(unique.len());
        for (row, id) in unique.iter().zip(&ids) {
            if id_counts[id] > 1 {
                failures.push(NormalizationError::new(
                    id,
                    "id",
                    Kind::DuplicateId,
                    format!("{} distinct rows share this id", id_counts[id]),
                ));
            } else {
                work.push(*row);
            }
        }

        let workers = self.config.worker_count().max(1);
        let chunk_size = work.len().div_ceil(workers).max(1);
        let results: Vec<Result<ContractRecord, NormalizationError>> = std::thread::scope(|s| {
            let handles: Vec<_> = work
                .chunks(chunk_size)
                .map(|chunk| {
                    s.spawn(move || {
                        chunk
                            .iter()
                            .map(|r| self.normalize_row(r))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });
        debug!(workers, chunk_size, rows = work.len(), "normalized chunks");

        let mut records = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(record) => records.push(record),
                Err(e) => failures.push(e),
            }
        }

        let mut records = merge_names(records);
        records.sort_by(|a, b| a.id().cmp(b.id()));
        failures.sort_by(|a, b| {
            a.record_id
                .cmp(&b.record_id)
                .then_with(|| a.field.cmp(&b.field))
        });

        info!(
            rows = rows.len(),
            records = records.len(),
            failures = failures.len(),
            duplicates_collapsed,
            "normalization complete"
        );
        NormalizeOutcome {
            records,
            failures,
            duplicates_collapsed,
        }
    }
}

/// Normalize one row under `config`.
pub fn normalize_row(
    raw: &RawRow,
    config: &PipelineConfig,
) -> Result<ContractRecord, NormalizationError> {
    Normalizer::new(config).normalize_row(raw)
}

/// Contractors arrive either as plain text or as a JSON list of
/// `{"Name": ...}` objects (sometimes bare strings).
fn contractor_names(value: &str) -> String {
    if value.starts_with('[')
        && let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(value)
    {
        let names: Vec<String> = items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.as_str()),
                serde_json::Value::Object(map) => map.get("Name").and_then(|v| v.as_str()),
                _ => None,
            })
            .map(display_form)
            .filter(|n| !n.is_empty())
            .collect();
        return names.join(CONTRACTOR_SEPARATOR);
    }
    display_form(value)
}
