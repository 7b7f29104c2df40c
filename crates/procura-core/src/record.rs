//! Canonical contract record model.
//!
//! A [`ContractRecord`] is the normalized, schema-conforming form of one
//! registry listing. It is immutable once built: corrections produce a new
//! record through [`RecordParts`], which re-checks every invariant.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::money::Money;
use crate::name_key::{display_form, name_key};
use crate::ModelError;

/// One scraped listing: registry field name → unmodified string value.
///
/// Ordered so that iteration (and therefore hashing) is deterministic.
pub type RawRow = BTreeMap<String, String>;

/// Code used for every service category that could not be classified.
pub const UNCLASSIFIED_CODE: &str = "unclassified";

// ── Identity ──

/// Stable record identifier.
///
/// Either the registry's own contract id or a content digest of the raw row,
/// so re-scraping the same listing always yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Content-derived id: `h-` + first 16 hex digits of SHA-256 over the
    /// row's canonical bytes: keys in sorted order, each key and value
    /// prefixed by its byte length as a big-endian `u64`.
    pub fn digest(row: &RawRow) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in row {
            for part in [key, value] {
                hasher.update((part.len() as u64).to_be_bytes());
                hasher.update(part.as_bytes());
            }
        }
        let hash = hasher.finalize();
        Self(format!("h-{}", hex::encode(&hash[..8])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Flatten one JSON object into a raw row.
///
/// Strings are kept verbatim and nulls are left out. Numbers and booleans use
/// their JSON spelling, and nested arrays or objects are kept as JSON text.
pub fn raw_row_from_json(object: &serde_json::Map<String, serde_json::Value>) -> RawRow {
    object
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                serde_json::Value::Null => return None,
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect()
}

// ── Parties ──

/// A contracting entity or contractor: grouping code plus display name.
///
/// `code` is always `name_key(name)`, so two spellings of one party group
/// together even before canonical names are merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    pub code: String,
    pub name: String,
}

impl Party {
    pub fn from_name(name: &str) -> Self {
        let name = display_form(name);
        Self {
            code: name_key(&name),
            name,
        }
    }

    /// Same code, different display name (used when merging spellings).
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            code: self.code.clone(),
            name: name.to_string(),
        }
    }
}

// ── Service category ──

/// Classification of the contracted service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceCategory {
    Classified { code: String, label: String },
    /// Unmapped or empty registry value; `raw` keeps what the registry sent.
    Unclassified { raw: String },
}

impl ServiceCategory {
    pub fn classified(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self::Classified {
            code: code.into(),
            label: label.into(),
        }
    }

    pub fn unclassified(raw: impl Into<String>) -> Self {
        Self::Unclassified { raw: raw.into() }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Classified { code, .. } => code,
            Self::Unclassified { .. } => UNCLASSIFIED_CODE,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Classified { label, .. } => label,
            Self::Unclassified { .. } => UNCLASSIFIED_CODE,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        matches!(self, Self::Unclassified { .. })
    }
}

// ── Field names ──

/// Overridable fields of the canonical model.
///
/// `id` and `raw_fields` exist on the model but are read-only: the id is the
/// ledger key, and the raw fields are the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldName {
    Entity,
    Contractor,
    ServiceCategory,
    Amount,
    Currency,
    StartDate,
    EndDate,
    ContractNumber,
    GrantedOn,
    CancelledOn,
}

impl FieldName {
    pub const ALL: [FieldName; 10] = [
        Self::Entity,
        Self::Contractor,
        Self::ServiceCategory,
        Self::Amount,
        Self::Currency,
        Self::StartDate,
        Self::EndDate,
        Self::ContractNumber,
        Self::GrantedOn,
        Self::CancelledOn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Contractor => "contractor",
            Self::ServiceCategory => "service_category",
            Self::Amount => "amount",
            Self::Currency => "currency",
            Self::StartDate => "start_date",
            Self::EndDate => "end_date",
            Self::ContractNumber => "contract_number",
            Self::GrantedOn => "granted_on",
            Self::CancelledOn => "cancelled_on",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(field) = Self::ALL.iter().find(|f| f.as_str() == s) {
            return Ok(*field);
        }
        match s {
            "id" | "raw_fields" => Err(ModelError::ReadOnlyField(s.to_string())),
            _ => Err(ModelError::UnknownField(s.to_string())),
        }
    }
}

// ── Record ──

/// Every field of a [`ContractRecord`], open for construction and correction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordParts {
    pub id: RecordId,
    pub entity: Party,
    pub contractor: Party,
    pub service_category: ServiceCategory,
    pub amount: Money,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub contract_number: Option<String>,
    pub granted_on: Option<NaiveDate>,
    pub cancelled_on: Option<NaiveDate>,
    pub raw_fields: RawRow,
}

impl RecordParts {
    /// Check invariants and freeze into a record.
    pub fn build(self) -> Result<ContractRecord, ModelError> {
        if let Some(end) = self.end_date
            && end < self.start_date
        {
            return Err(ModelError::DateOrder {
                start: self.start_date,
                end,
            });
        }
        Ok(ContractRecord { parts: self })
    }
}

/// Canonical, immutable representation of one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRecord {
    parts: RecordParts,
}

impl ContractRecord {
    pub fn id(&self) -> &RecordId {
        &self.parts.id
    }

    pub fn entity(&self) -> &Party {
        &self.parts.entity
    }

    pub fn contractor(&self) -> &Party {
        &self.parts.contractor
    }

    pub fn service_category(&self) -> &ServiceCategory {
        &self.parts.service_category
    }

    pub fn amount(&self) -> &Money {
        &self.parts.amount
    }

    pub fn start_date(&self) -> NaiveDate {
        self.parts.start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.parts.end_date
    }

    pub fn contract_number(&self) -> Option<&str> {
        self.parts.contract_number.as_deref()
    }

    pub fn granted_on(&self) -> Option<NaiveDate> {
        self.parts.granted_on
    }

    pub fn cancelled_on(&self) -> Option<NaiveDate> {
        self.parts.cancelled_on
    }

    pub fn raw_fields(&self) -> &RawRow {
        &self.parts.raw_fields
    }

    /// Contract length in days, when the end date is known.
    pub fn duration_days(&self) -> Option<i64> {
        self.parts
            .end_date
            .map(|end| (end - self.parts.start_date).num_days())
    }

    /// Replace display names without touching codes or dates.
    ///
    /// Names carry no invariants, so this skips re-validation. The service
    /// label only changes for classified categories.
    pub fn with_display_names(
        mut self,
        entity: &str,
        contractor: &str,
        service_label: Option<&str>,
    ) -> Self {
        self.parts.entity = self.parts.entity.renamed(entity);
        self.parts.contractor = self.parts.contractor.renamed(contractor);
        if let Some(new_label) = service_label
            && let ServiceCategory::Classified { label, .. } = &mut self.parts.service_category
        {
            *label = new_label.to_string();
        }
        self
    }

    /// Borrow all fields.
    pub fn parts(&self) -> &RecordParts {
        &self.parts
    }

    /// Unfreeze for correction. Call [`RecordParts::build`] to re-validate.
    pub fn into_parts(self) -> RecordParts {
        self.parts
    }
}
