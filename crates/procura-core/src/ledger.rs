//! Fix ledger: human-authored corrections and exclusions, keyed by record id.
//!
//! The ledger is append-only. Entries are never edited; a newer entry for the
//! same record supersedes the older one. Only the *active* entry per record
//! affects computation, but the full history stays available for audit.
//!
//! # Ordering rule
//!
//! The active entry is the one with the latest `authored_at`. Ties go to the
//! entry inserted last. A `DROP` is superseded like any other entry, so a
//! newer `OVERRIDE` (even an empty one) brings a dropped record back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::RecordId;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed fix entry for '{record_id}': {reason}")]
    Malformed { record_id: String, reason: String },
}

// ── Entries ──

/// What a fix entry does to its record.
#[derive(Debug, Clone, PartialEq)]
pub enum FixAction {
    /// Replace the named fields; all other fields keep their normalized values.
    Override {
        overrides: BTreeMap<String, serde_json::Value>,
    },
    /// Exclude the record from all downstream aggregation.
    Drop,
}

/// The action tag as it appears in `fix.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixKind {
    Override,
    Drop,
}

/// One human-authored correction.
#[derive(Debug, Clone, PartialEq)]
pub struct FixEntry {
    pub record_id: RecordId,
    pub action: FixAction,
    pub rationale: String,
    pub authored_at: DateTime<Utc>,
}

/// Serialized form of an entry without its key, as stored in `fix.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixFields {
    pub action: FixKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub rationale: String,
    pub authored_at: DateTime<Utc>,
}

impl FixEntry {
    pub fn drop(
        record_id: impl Into<RecordId>,
        rationale: impl Into<String>,
        authored_at: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            action: FixAction::Drop,
            rationale: rationale.into(),
            authored_at,
        }
    }

    pub fn override_fields(
        record_id: impl Into<RecordId>,
        overrides: BTreeMap<String, serde_json::Value>,
        rationale: impl Into<String>,
        authored_at: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            action: FixAction::Override { overrides },
            rationale: rationale.into(),
            authored_at,
        }
    }

    pub fn kind(&self) -> FixKind {
        match self.action {
            FixAction::Override { .. } => FixKind::Override,
            FixAction::Drop => FixKind::Drop,
        }
    }

    pub fn is_drop(&self) -> bool {
        matches!(self.action, FixAction::Drop)
    }

    pub fn to_fields(&self) -> FixFields {
        let overrides = match &self.action {
            FixAction::Override { overrides } => overrides.clone(),
            FixAction::Drop => BTreeMap::new(),
        };
        FixFields {
            action: self.kind(),
            overrides,
            rationale: self.rationale.clone(),
            authored_at: self.authored_at,
        }
    }

    /// Rebuild an entry from its stored fields.
    ///
    /// A `DROP` carrying overrides is rejected: the author meant one of the
    /// two and guessing would silently discard a correction.
    pub fn from_fields(record_id: RecordId, fields: FixFields) -> Result<Self, LedgerError> {
        let action = match fields.action {
            FixKind::Drop if !fields.overrides.is_empty() => {
                return Err(LedgerError::Malformed {
                    record_id: record_id.to_string(),
                    reason: "DROP entry must not carry overrides".into(),
                });
            }
            FixKind::Drop => FixAction::Drop,
            FixKind::Override => FixAction::Override {
                overrides: fields.overrides,
            },
        };
        Ok(Self {
            record_id,
            action,
            rationale: fields.rationale,
            authored_at: fields.authored_at,
        })
    }
}

// ── Ledger ──

/// In-memory ledger: full history plus an index of active entries.
#[derive(Debug, Clone, Default)]
pub struct FixLedger {
    history: Vec<FixEntry>,
    active: BTreeMap<RecordId, usize>,
}

impl FixLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay entries in insertion order.
    pub fn from_entries(entries: impl IntoIterator<Item = FixEntry>) -> Self {
        let mut ledger = Self::new();
        for entry in entries {
            ledger.put(entry);
        }
        ledger
    }

    /// Append an entry. Returns `true` if it became the active entry for its
    /// record (it is kept in history either way).
    pub fn put(&mut self, entry: FixEntry) -> bool {
        let idx = self.history.len();
        let becomes_active = match self.active.get(&entry.record_id) {
            None => true,
            Some(&current) => entry.authored_at >= self.history[current].authored_at,
        };
        if becomes_active {
            self.active.insert(entry.record_id.clone(), idx);
        }
        self.history.push(entry);
        becomes_active
    }

    pub fn get_active(&self, record_id: &RecordId) -> Option<&FixEntry> {
        self.active.get(record_id).map(|&idx| &self.history[idx])
    }

    /// Current mapping `record_id → active entry`, ordered by id.
    pub fn all_active(&self) -> BTreeMap<&RecordId, &FixEntry> {
        self.active
            .iter()
            .map(|(id, &idx)| (id, &self.history[idx]))
            .collect()
    }

    /// Every entry ever written for one record, in insertion order.
    pub fn history(&self, record_id: &RecordId) -> Vec<&FixEntry> {
        self.history
            .iter()
            .filter(|e| &e.record_id == record_id)
            .collect()
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[FixEntry] {
        &self.history
    }

    /// Owned, immutable view of the active entries for one pipeline run.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            active: self
                .all_active()
                .into_iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// The active entries as read once at the start of a run.
///
/// A run never re-reads the ledger, so every stage sees the same state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    active: BTreeMap<RecordId, FixEntry>,
}

impl LedgerSnapshot {
    pub fn get(&self, record_id: &RecordId) -> Option<&FixEntry> {
        self.active.get(record_id)
    }

    pub fn contains(&self, record_id: &RecordId) -> bool {
        self.active.contains_key(record_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordId, &FixEntry)> {
        self.active.iter()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Persistence boundary for the ledger.
pub trait LedgerStore {
    /// Read the whole ledger (history replayed in insertion order).
    fn load(&self) -> Result<FixLedger, LedgerError>;

    /// Durably append one entry.
    fn append(&self, entry: &FixEntry) -> Result<(), LedgerError>;
}
