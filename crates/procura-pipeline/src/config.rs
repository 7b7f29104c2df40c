//! Pipeline configuration (`procura.toml`).
//!
//! Every section has defaults matching the registry's search export, so an
//! empty file is a valid configuration.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use procura_core::{
    DEFAULT_CURRENCY, DateRange, Dimension, RawRow, UNCLASSIFIED_CODE, is_currency_code, name_key,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Top level ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Currency for rows that carry no currency column.
    pub currency: String,
    /// Worker threads for batch normalization; 0 means one per core.
    pub workers: usize,
    pub fields: FieldMap,
    pub amount: AmountFormat,
    pub dates: DateFormat,
    pub catalog: CategoryCatalog,
    pub anomaly: AnomalyConfig,
    #[serde(rename = "period")]
    pub periods: Vec<NamedPeriod>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY.to_string(),
            workers: 0,
            fields: FieldMap::default(),
            amount: AmountFormat::default(),
            dates: DateFormat::default(),
            catalog: CategoryCatalog::default(),
            anomaly: AnomalyConfig::default(),
            periods: Vec::new(),
        }
    }
}

// ── Column mapping ──

/// Registry field names for each canonical field, tried in order.
///
/// The first candidate holding a non-blank value wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldMap {
    pub id: Vec<String>,
    pub entity: Vec<String>,
    pub contractor: Vec<String>,
    pub service: Vec<String>,
    pub amount: Vec<String>,
    pub currency: Vec<String>,
    pub start_date: Vec<String>,
    pub end_date: Vec<String>,
    pub contract_number: Vec<String>,
    pub granted_on: Vec<String>,
    pub cancelled_on: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            id: names(&["ContractId"]),
            entity: names(&["EntityName", "EntityId"]),
            contractor: names(&["Contractors"]),
            service: names(&["Service"]),
            amount: names(&["AmountToPay"]),
            currency: Vec::new(),
            start_date: names(&["EffectiveDateFrom", "DateOfGrant"]),
            end_date: names(&["EffectiveDateTo"]),
            contract_number: names(&["ContractNumber"]),
            granted_on: names(&["DateOfGrant"]),
            cancelled_on: names(&["CancellationDate"]),
        }
    }
}

/// Registry placeholders that mean "no value".
const BLANK_MARKERS: &[&str] = &["null", "none", "nan", "nat"];

pub(crate) fn is_blank(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || BLANK_MARKERS.iter().any(|m| v.eq_ignore_ascii_case(m))
}

/// First non-blank value among `candidates`, trimmed.
pub fn lookup<'a>(row: &'a RawRow, candidates: &[String]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|name| row.get(name))
        .map(|v| v.trim())
        .find(|v| !is_blank(v))
}

// ── Amount locale ──

/// Separators used by the source's amount strings. Configured, never inferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AmountFormat {
    pub thousands_separator: char,
    pub decimal_separator: char,
}

impl Default for AmountFormat {
    fn default() -> Self {
        Self {
            thousands_separator: ',',
            decimal_separator: '.',
        }
    }
}

// ── Dates ──

/// How to read `NN/NN/YYYY` dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlashDateOrder {
    /// `DD/MM/YYYY`, as the registry's search form uses.
    #[default]
    DayFirst,
    /// `MM/DD/YYYY`.
    MonthFirst,
    /// Treat every slash date as ambiguous.
    Reject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DateFormat {
    pub slash_order: SlashDateOrder,
}

// ── Service catalog ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogMode {
    /// Any non-empty service string is its own category, keyed by name key.
    #[default]
    Open,
    /// Only configured categories are recognized; everything else is
    /// unclassified.
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryDef {
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CategoryCatalog {
    pub mode: CatalogMode,
    #[serde(rename = "category")]
    pub categories: Vec<CategoryDef>,
}

impl CategoryCatalog {
    /// Name key → index into `categories`, covering codes, labels and aliases.
    pub(crate) fn index(&self) -> HashMap<String, usize> {
        let mut index = HashMap::new();
        for (i, def) in self.categories.iter().enumerate() {
            let spellings = [&def.code, &def.label].into_iter().chain(def.aliases.iter());
            for spelling in spellings {
                let key = name_key(spelling);
                if !key.is_empty() {
                    index.entry(key).or_insert(i);
                }
            }
        }
        index
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut owner: HashMap<String, &str> = HashMap::new();
        for def in &self.categories {
            if def.code.trim().is_empty() {
                return Err(ConfigError::Validation("category code must not be empty".into()));
            }
            if def.code == UNCLASSIFIED_CODE {
                return Err(ConfigError::Validation(format!(
                    "category code '{UNCLASSIFIED_CODE}' is reserved"
                )));
            }
            let spellings = [&def.code, &def.label].into_iter().chain(def.aliases.iter());
            for spelling in spellings {
                let key = name_key(spelling);
                if let Some(prev) = owner.get(&key)
                    && *prev != def.code
                {
                    return Err(ConfigError::Validation(format!(
                        "'{spelling}' maps to both '{prev}' and '{}'",
                        def.code
                    )));
                }
                owner.insert(key, &def.code);
            }
        }
        if self.mode == CatalogMode::Strict && self.categories.is_empty() {
            return Err(ConfigError::Validation(
                "strict catalog mode needs at least one category".into(),
            ));
        }
        Ok(())
    }
}

// ── Anomaly thresholds ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnomalyConfig {
    /// Flag when the robust score exceeds this many scaled MADs.
    pub mad_multiplier: f64,
    /// Groups with fewer eligible records are not scored.
    pub min_group_size: usize,
    /// Spread floor as a fraction of the peer median.
    pub min_relative_spread: f64,
    /// Amounts below this many minor units are left out of amount statistics.
    pub min_amount_minor: i64,
    pub group_by: Dimension,
    pub durations: bool,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            mad_multiplier: 3.5,
            min_group_size: 3,
            min_relative_spread: 0.5,
            min_amount_minor: 0,
            group_by: Dimension::Service,
            durations: true,
        }
    }
}

impl AnomalyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.mad_multiplier.is_finite() && self.mad_multiplier > 0.0) {
            return Err(ConfigError::Validation(format!(
                "mad_multiplier must be positive, got {}",
                self.mad_multiplier
            )));
        }
        if self.min_group_size < 2 {
            return Err(ConfigError::Validation(format!(
                "min_group_size must be at least 2, got {}",
                self.min_group_size
            )));
        }
        if !(self.min_relative_spread.is_finite() && self.min_relative_spread >= 0.0) {
            return Err(ConfigError::Validation(format!(
                "min_relative_spread must be non-negative, got {}",
                self.min_relative_spread
            )));
        }
        if self.min_amount_minor < 0 {
            return Err(ConfigError::Validation(
                "min_amount_minor must not be negative".into(),
            ));
        }
        Ok(())
    }
}

// ── Named periods ──

/// A reporting window that can be selected by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamedPeriod {
    pub name: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

// ── Parse + Validate ──

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_currency_code(&self.currency) {
            return Err(ConfigError::Validation(format!(
                "currency must be a three-letter ISO code, got '{}'",
                self.currency
            )));
        }

        let (t, d) = (self.amount.thousands_separator, self.amount.decimal_separator);
        if t == d {
            return Err(ConfigError::Validation(format!(
                "thousands and decimal separators must differ, both are '{t}'"
            )));
        }
        if t.is_ascii_digit() || d.is_ascii_digit() || matches!(t, '-' | '+') || matches!(d, '-' | '+') {
            return Err(ConfigError::Validation(
                "amount separators must not be digits or signs".into(),
            ));
        }

        let required = [
            ("id", &self.fields.id),
            ("entity", &self.fields.entity),
            ("contractor", &self.fields.contractor),
            ("amount", &self.fields.amount),
            ("start_date", &self.fields.start_date),
        ];
        for (name, candidates) in required {
            if candidates.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "fields.{name} needs at least one source column"
                )));
            }
        }

        self.catalog.validate()?;
        self.anomaly.validate()?;

        let mut seen = HashMap::new();
        for period in &self.periods {
            if period.from > period.to {
                return Err(ConfigError::Validation(format!(
                    "period '{}' starts after it ends",
                    period.name
                )));
            }
            if seen.insert(period.name.as_str(), ()).is_some() {
                return Err(ConfigError::Validation(format!(
                    "period '{}' defined twice",
                    period.name
                )));
            }
        }
        Ok(())
    }

    /// Resolve a named period into an inclusive date range.
    pub fn period(&self, name: &str) -> Result<DateRange, ConfigError> {
        let period = self
            .periods
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::UnknownPeriod(name.to_string()))?;
        DateRange::new(period.from, period.to)
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
currency = "USD"
workers = 2

[fields]
start_date = ["DateOfGrant"]

[amount]
thousands_separator = "."
decimal_separator = ","

[dates]
slash_order = "month_first"

[catalog]
mode = "strict"

[[catalog.category]]
code = "legal"
label = "Servicios Legales"
aliases = ["Legal Services", "Serv. Legales"]

[[catalog.category]]
code = "it"
label = "Tecnología"

[anomaly]
mad_multiplier = 5.0
min_group_size = 4
group_by = "contractor"

[[period]]
name = "q1-2023"
from = "2023-01-01"
to = "2023-03-31"
"#;

    #[test]
    fn empty_config_is_valid() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config.currency, "USD");
        assert_eq!(config.fields.id, vec!["ContractId"]);
        assert_eq!(config.fields.start_date, vec!["EffectiveDateFrom", "DateOfGrant"]);
        assert_eq!(config.anomaly.min_group_size, 3);
        assert_eq!(config.anomaly.group_by, Dimension::Service);
        assert_eq!(config.dates.slash_order, SlashDateOrder::DayFirst);
        assert_eq!(config.catalog.mode, CatalogMode::Open);
    }

    #[test]
    fn parse_full_config() {
        let config = PipelineConfig::from_toml(FULL).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.fields.start_date, vec!["DateOfGrant"]);
        assert_eq!(config.fields.entity, vec!["EntityName", "EntityId"]);
        assert_eq!(config.amount.thousands_separator, '.');
        assert_eq!(config.dates.slash_order, SlashDateOrder::MonthFirst);
        assert_eq!(config.catalog.categories.len(), 2);
        assert_eq!(config.anomaly.group_by, Dimension::Contractor);
        assert_eq!(config.anomaly.min_relative_spread, 0.5);
        let q1 = config.period("q1-2023").unwrap();
        assert_eq!(q1.to().to_string(), "2023-03-31");
    }

    #[test]
    fn unknown_period() {
        let config = PipelineConfig::from_toml(FULL).unwrap();
        assert!(matches!(
            config.period("q2-2023"),
            Err(ConfigError::UnknownPeriod(_))
        ));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = PipelineConfig::from_toml("[anomaly]\nmad_multipler = 3.0\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_equal_separators() {
        let input = "[amount]\nthousands_separator = \".\"\ndecimal_separator = \".\"\n";
        assert!(matches!(
            PipelineConfig::from_toml(input),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_tiny_groups() {
        let input = "[anomaly]\nmin_group_size = 1\n";
        assert!(matches!(
            PipelineConfig::from_toml(input),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_inverted_period() {
        let input = "[[period]]\nname = \"bad\"\nfrom = \"2023-02-01\"\nto = \"2023-01-01\"\n";
        assert!(matches!(
            PipelineConfig::from_toml(input),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_alias_claimed_twice() {
        let input = r#"
[[catalog.category]]
code = "legal"
label = "Legal"
aliases = ["Consultoría"]

[[catalog.category]]
code = "consulting"
label = "Consultoria"
"#;
        assert!(matches!(
            PipelineConfig::from_toml(input),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn strict_catalog_needs_categories() {
        let input = "[catalog]\nmode = \"strict\"\n";
        assert!(matches!(
            PipelineConfig::from_toml(input),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn lookup_falls_back_and_skips_blanks() {
        let mut row = RawRow::new();
        row.insert("EffectiveDateFrom".into(), "  ".into());
        row.insert("DateOfGrant".into(), " 2023-01-05 ".into());
        let candidates = names(&["EffectiveDateFrom", "DateOfGrant"]);
        assert_eq!(lookup(&row, &candidates), Some("2023-01-05"));

        row.insert("EffectiveDateFrom".into(), "None".into());
        assert_eq!(lookup(&row, &candidates), Some("2023-01-05"));

        row.insert("EffectiveDateFrom".into(), "2023-01-02".into());
        assert_eq!(lookup(&row, &candidates), Some("2023-01-02"));
    }

    #[test]
    fn shipped_example_parses() {
        let config =
            PipelineConfig::from_toml(include_str!("../../../procura.example.toml")).unwrap();
        assert_eq!(config.periods.len(), 7);
        let term = config.period("rossello").unwrap();
        assert_eq!(term.to().to_string(), "2019-08-01");
        assert_eq!(config.anomaly.mad_multiplier, 3.5);
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::from_file(&dir.path().join("procura.toml"));
        assert!(matches!(err, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procura.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.periods.len(), 1);
    }
}
