//! JSON persistence for the fix ledger.
//!
//! Two files live side by side:
//! - `fix.json`: record id → active entry fields, rewritten after every append.
//! - `fix.history.jsonl`: one line per entry ever written, append-only.
//!
//! The history log is authoritative when present. A ledger that only has a
//! hand-written `fix.json` is seeded from it, ordered by `authored_at` then id.
//! Entries added or changed by hand in `fix.json` after that are appended to
//! the history on the next load or append. Keys removed by hand cannot be
//! expressed in an append-only log and are reported as warnings.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use procura_core::{FixEntry, FixFields, FixLedger, LedgerError, LedgerStore, RecordId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct HistoryLine {
    record_id: RecordId,
    #[serde(flatten)]
    fields: FixFields,
}

/// File-backed [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    snapshot_path: PathBuf,
    history_path: PathBuf,
}

impl JsonLedgerStore {
    /// Store rooted at a `fix.json` path. The history log sits next to it.
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        let snapshot_path = snapshot_path.into();
        let stem = snapshot_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "fix".into());
        let history_path = snapshot_path.with_file_name(format!("{stem}.history.jsonl"));
        Self {
            snapshot_path,
            history_path,
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    fn read_history(&self) -> Result<Vec<FixEntry>, LedgerError> {
        let reader = BufReader::new(File::open(&self.history_path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: HistoryLine = serde_json::from_str(&line)?;
            entries.push(FixEntry::from_fields(parsed.record_id, parsed.fields)?);
        }
        Ok(entries)
    }

    fn read_snapshot(&self) -> Result<Vec<FixEntry>, LedgerError> {
        let text = fs::read_to_string(&self.snapshot_path)?;
        let map: BTreeMap<String, FixFields> = serde_json::from_str(&text)?;
        let mut entries = map
            .into_iter()
            .map(|(id, fields)| FixEntry::from_fields(RecordId::new(id), fields))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| {
            a.authored_at
                .cmp(&b.authored_at)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        Ok(entries)
    }

    fn write_history_lines(&self, entries: &[&FixEntry]) -> Result<(), LedgerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)?;
        for entry in entries {
            let line = HistoryLine {
                record_id: entry.record_id.clone(),
                fields: entry.to_fields(),
            };
            serde_json::to_writer(&mut file, &line)?;
            file.write_all(b"\n")?;
        }
        file.sync_data()?;
        Ok(())
    }

    /// History entries plus any hand edits found in `fix.json`, with the
    /// edits appended to the history log.
    fn read_history_with_edits(&self) -> Result<Vec<FixEntry>, LedgerError> {
        let mut entries = self.read_history()?;
        if !self.snapshot_path.exists() {
            return Ok(entries);
        }
        let derived = FixLedger::from_entries(entries.clone());
        let active = derived.all_active();
        let edits: Vec<FixEntry> = self
            .read_snapshot()?
            .into_iter()
            .filter(|entry| {
                active
                    .get(&entry.record_id)
                    .is_none_or(|current| current.to_fields() != entry.to_fields())
            })
            .collect();

        let on_disk: Vec<RecordId> = {
            let text = fs::read_to_string(&self.snapshot_path)?;
            let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(&text)?;
            map.into_keys().map(RecordId::new).collect()
        };
        for id in active.keys() {
            if !on_disk.contains(*id) {
                warn!(record_id = %id, "entry removed from fix.json by hand; history keeps it active");
            }
        }

        if !edits.is_empty() {
            self.write_history_lines(&edits.iter().collect::<Vec<_>>())?;
            info!(entries = edits.len(), "adopted hand edits from fix snapshot");
            entries.extend(edits);
        }
        Ok(entries)
    }

    /// Rewrite `fix.json` from the active entries, via a temp file and rename.
    fn write_snapshot(&self, ledger: &FixLedger) -> Result<(), LedgerError> {
        let active: BTreeMap<&str, FixFields> = ledger
            .all_active()
            .into_iter()
            .map(|(id, entry)| (id.as_str(), entry.to_fields()))
            .collect();
        let tmp = self.snapshot_path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, &active)?;
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        fs::rename(&tmp, &self.snapshot_path)?;
        debug!(path = %self.snapshot_path.display(), active = active.len(), "wrote fix snapshot");
        Ok(())
    }
}

impl LedgerStore for JsonLedgerStore {
    fn load(&self) -> Result<FixLedger, LedgerError> {
        let entries = if self.history_path.exists() {
            self.read_history_with_edits()?
        } else if self.snapshot_path.exists() {
            self.read_snapshot()?
        } else {
            Vec::new()
        };
        let ledger = FixLedger::from_entries(entries);
        info!(
            entries = ledger.len(),
            active = ledger.all_active().len(),
            "loaded fix ledger"
        );
        Ok(ledger)
    }

    fn append(&self, entry: &FixEntry) -> Result<(), LedgerError> {
        if self.history_path.exists() {
            self.read_history_with_edits()?;
        } else if self.snapshot_path.exists() {
            let seed = self.read_snapshot()?;
            self.write_history_lines(&seed.iter().collect::<Vec<_>>())?;
            info!(entries = seed.len(), "seeded fix history from snapshot");
        }
        self.write_history_lines(&[entry])?;
        let ledger = FixLedger::from_entries(self.read_history()?);
        self.write_snapshot(&ledger)?;
        info!(
            record_id = %entry.record_id,
            action = ?entry.kind(),
            "appended fix entry"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn amount_fix(id: &str, value: &str, secs: i64) -> FixEntry {
        let mut overrides = BTreeMap::new();
        overrides.insert("amount".to_string(), serde_json::json!(value));
        FixEntry::override_fields(id, overrides, "registry typo", at(secs))
    }

    #[test]
    fn history_path_sits_next_to_snapshot() {
        let store = JsonLedgerStore::new("/data/fix.json");
        assert_eq!(store.history_path(), Path::new("/data/fix.history.jsonl"));
    }

    #[test]
    fn missing_files_load_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonLedgerStore::new(tmp.path().join("fix.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn append_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonLedgerStore::new(tmp.path().join("fix.json"));
        store.append(&amount_fix("A", "100.00", 1)).unwrap();
        store.append(&FixEntry::drop("B", "duplicate", at(2))).unwrap();
        store.append(&amount_fix("A", "200.00", 3)).unwrap();

        let ledger = store.load().unwrap();
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.history(&"A".into()).len(), 2);
        assert_eq!(ledger.get_active(&"A".into()).unwrap().authored_at, at(3));
        assert!(ledger.get_active(&"B".into()).unwrap().is_drop());
    }

    #[test]
    fn snapshot_holds_only_active_entries() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonLedgerStore::new(tmp.path().join("fix.json"));
        store.append(&FixEntry::drop("A", "suspicious", at(1))).unwrap();
        store.append(&amount_fix("A", "5.00", 2)).unwrap();

        let text = fs::read_to_string(store.snapshot_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 1);
        assert_eq!(value["A"]["action"], "OVERRIDE");
        assert_eq!(value["A"]["overrides"]["amount"], "5.00");
        assert!(!tmp.path().join("fix.json.tmp").exists());
    }

    #[test]
    fn hand_written_snapshot_seeds_ledger() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fix.json");
        fs::write(
            &path,
            r#"{
                "B": {"action": "DROP", "rationale": "dup", "authored_at": "2024-03-02T00:00:00Z"},
                "A": {"action": "OVERRIDE", "overrides": {"amount": "1.00"},
                      "authored_at": "2024-03-01T00:00:00Z"}
            }"#,
        )
        .unwrap();
        let store = JsonLedgerStore::new(&path);
        let ledger = store.load().unwrap();
        let order: Vec<&str> = ledger.entries().iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);

        store.append(&amount_fix("C", "2.00", 0)).unwrap();
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.len(), 3);
        assert!(reloaded.get_active(&"B".into()).unwrap().is_drop());
    }

    fn hand_edit(store: &JsonLedgerStore, id: &str, fields: serde_json::Value) {
        let text = fs::read_to_string(store.snapshot_path()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        value[id] = fields;
        fs::write(store.snapshot_path(), value.to_string()).unwrap();
    }

    #[test]
    fn hand_edit_after_history_exists_is_adopted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonLedgerStore::new(tmp.path().join("fix.json"));
        store.append(&FixEntry::drop("A", "duplicate", at(1))).unwrap();
        hand_edit(
            &store,
            "B",
            serde_json::json!({"action": "DROP", "rationale": "by hand", "authored_at": "2024-03-02T00:00:00Z"}),
        );

        let ledger = store.load().unwrap();
        assert!(ledger.get_active(&"A".into()).unwrap().is_drop());
        assert!(ledger.get_active(&"B".into()).unwrap().is_drop());
        assert_eq!(ledger.len(), 2);

        // Adopted once: a second load appends nothing.
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn hand_edit_survives_next_append() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonLedgerStore::new(tmp.path().join("fix.json"));
        store.append(&FixEntry::drop("A", "duplicate", at(1))).unwrap();
        hand_edit(
            &store,
            "A",
            serde_json::json!({"action": "OVERRIDE", "overrides": {"amount": "9.00"},
                               "authored_at": "2024-03-02T00:00:00Z"}),
        );
        store.append(&amount_fix("C", "2.00", 2)).unwrap();

        let ledger = store.load().unwrap();
        assert_eq!(ledger.history(&"A".into()).len(), 2);
        assert!(!ledger.get_active(&"A".into()).unwrap().is_drop());
        let text = fs::read_to_string(store.snapshot_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["A"]["overrides"]["amount"], "9.00");
        assert!(value.get("C").is_some());
    }

    #[test]
    fn malformed_history_line_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonLedgerStore::new(tmp.path().join("fix.json"));
        fs::write(store.history_path(), "{not json}\n").unwrap();
        assert!(matches!(store.load(), Err(LedgerError::Json(_))));
    }
}
