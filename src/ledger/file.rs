// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Log-structured NDJSON ledger.
//!
//! The file is only ever appended to. Each line is one of:
//!
//! - `{"record":"entry", ...}`: a full entry as first written,
//! - `{"record":"status","id":..,"status":..,"memo":..}`: a status change,
//! - `{"record":"swap","id":..,"swapTxHash":..,"quotedOutput":..}`,
//! - `{"record":"forward","id":..,"forwardTxHash":..,"amount":..}`.
//!
//! Lines without a `record` tag are read as plain entries. Current state is
//! the replay of all lines in order. Replay skips status, swap and forward records
//! aimed at an entry that is already terminal, so concurrent writers from
//! several processes cannot revert a settled purchase.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{files, BackendHealth, BackendKind, StorageError};

use super::{LedgerError, LedgerStore, PurchaseLogEntry, PurchaseStatus};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "lowercase")]
enum LogRecord {
    Entry(PurchaseLogEntry),
    #[serde(rename_all = "camelCase")]
    Status {
        id: String,
        status: PurchaseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memo: Option<String>,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Swap {
        id: String,
        swap_tx_hash: String,
        quoted_output: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Forward {
        id: String,
        forward_tx_hash: String,
        amount: String,
        at: DateTime<Utc>,
    },
}

impl LogRecord {
    fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<LogRecord>(line)
            .or_else(|_| serde_json::from_str::<PurchaseLogEntry>(line).map(LogRecord::Entry))
    }
}

/// NDJSON ledger at a single path.
pub struct FileLedgerStore {
    path: PathBuf,
    // Serializes read-validate-append within this process.
    write_guard: Mutex<()>,
}

impl FileLedgerStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay the log into current entries, in first-write order.
    fn replay(&self) -> Result<Vec<PurchaseLogEntry>, LedgerError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e).into()),
        };

        let mut entries: Vec<PurchaseLogEntry> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = match LogRecord::parse(line) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping malformed ledger line"
                    );
                    continue;
                }
            };

            match record {
                LogRecord::Entry(entry) => {
                    if index.contains_key(&entry.id) {
                        tracing::warn!(entry_id = %entry.id, "Duplicate ledger entry ignored");
                        continue;
                    }
                    index.insert(entry.id.clone(), entries.len());
                    entries.push(entry);
                }
                LogRecord::Status { id, status, memo, .. } => {
                    let Some(&i) = index.get(&id) else {
                        tracing::warn!(entry_id = %id, "Status change for unknown entry");
                        continue;
                    };
                    if let Err(e) = entries[i].apply_status(status, memo.as_deref()) {
                        tracing::debug!(entry_id = %id, error = %e, "Ignoring status change");
                    }
                }
                LogRecord::Swap {
                    id,
                    swap_tx_hash,
                    quoted_output,
                    ..
                } => {
                    let Some(&i) = index.get(&id) else {
                        tracing::warn!(entry_id = %id, "Swap record for unknown entry");
                        continue;
                    };
                    if let Err(e) = entries[i].apply_swap(&swap_tx_hash, &quoted_output) {
                        tracing::debug!(entry_id = %id, error = %e, "Ignoring swap record");
                    }
                }
                LogRecord::Forward {
                    id,
                    forward_tx_hash,
                    amount,
                    ..
                } => {
                    let Some(&i) = index.get(&id) else {
                        tracing::warn!(entry_id = %id, "Forward record for unknown entry");
                        continue;
                    };
                    if let Err(e) = entries[i].apply_forward(&forward_tx_hash, &amount) {
                        tracing::debug!(entry_id = %id, error = %e, "Ignoring forward record");
                    }
                }
            }
        }

        Ok(entries)
    }

    fn append_record(&self, record: &LogRecord) -> Result<(), LedgerError> {
        let line = serde_json::to_string(record).map_err(StorageError::from)?;
        files::append_line(&self.path, &line).map_err(StorageError::from)?;
        Ok(())
    }

    fn current(&self, id: &str) -> Result<PurchaseLogEntry, LedgerError> {
        self.replay()?
            .into_iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }
}

impl LedgerStore for FileLedgerStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn append(&self, entry: &PurchaseLogEntry) -> Result<(), LedgerError> {
        let _guard = self.write_guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.append_record(&LogRecord::Entry(entry.clone()))
    }

    fn read_all(&self) -> Result<Vec<PurchaseLogEntry>, LedgerError> {
        let mut entries = self.replay()?;
        // Reverse first so ties on timestamp keep later writes in front.
        entries.reverse();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    fn get(&self, id: &str) -> Result<Option<PurchaseLogEntry>, LedgerError> {
        Ok(self.replay()?.into_iter().find(|entry| entry.id == id))
    }

    fn update_status(
        &self,
        id: &str,
        status: PurchaseStatus,
        memo: Option<&str>,
    ) -> Result<PurchaseLogEntry, LedgerError> {
        let _guard = self.write_guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entry = self.current(id)?;
        entry.apply_status(status, memo)?;
        self.append_record(&LogRecord::Status {
            id: id.to_string(),
            status,
            memo: memo.map(str::to_string),
            at: Utc::now(),
        })?;
        Ok(entry)
    }

    fn record_swap(
        &self,
        id: &str,
        swap_tx_hash: &str,
        quoted_output: &str,
    ) -> Result<PurchaseLogEntry, LedgerError> {
        let _guard = self.write_guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entry = self.current(id)?;
        entry.apply_swap(swap_tx_hash, quoted_output)?;
        self.append_record(&LogRecord::Swap {
            id: id.to_string(),
            swap_tx_hash: swap_tx_hash.to_string(),
            quoted_output: quoted_output.to_string(),
            at: Utc::now(),
        })?;
        Ok(entry)
    }

    fn record_forward(
        &self,
        id: &str,
        forward_tx_hash: &str,
        amount: &str,
    ) -> Result<PurchaseLogEntry, LedgerError> {
        let _guard = self.write_guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entry = self.current(id)?;
        entry.apply_forward(forward_tx_hash, amount)?;
        self.append_record(&LogRecord::Forward {
            id: id.to_string(),
            forward_tx_hash: forward_tx_hash.to_string(),
            amount: amount.to_string(),
            at: Utc::now(),
        })?;
        Ok(entry)
    }

    fn health(&self) -> BackendHealth {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        BackendHealth {
            database: None,
            filesystem: Some(files::probe_dir(&dir).is_ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> FileLedgerStore {
        FileLedgerStore::new(temp.path().join("purchase_log.ndjson"))
    }

    fn entry(id: &str) -> PurchaseLogEntry {
        PurchaseLogEntry::new(id, "0xpayer", 1.5, "1500000", PurchaseStatus::Queued)
    }

    #[test]
    fn missing_file_reads_empty() {
        let temp = TempDir::new().unwrap();
        assert!(store(&temp).read_all().unwrap().is_empty());
    }

    #[test]
    fn replay_applies_status_and_swap_records() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.append(&entry("a")).unwrap();
        store.record_swap("a", "0xswap", "49800").unwrap();
        store.record_forward("a", "0xforward", "49800").unwrap();
        store
            .update_status("a", PurchaseStatus::Processed, Some("forwarded"))
            .unwrap();

        let current = store.get("a").unwrap().unwrap();
        assert_eq!(current.status, PurchaseStatus::Processed);
        assert_eq!(current.memo.as_deref(), Some("forwarded"));
        assert_eq!(current.swap_tx_hash.as_deref(), Some("0xswap"));
        assert_eq!(current.forward_tx_hash.as_deref(), Some("0xforward"));

        // Four appended lines, nothing rewritten.
        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 4);
    }

    #[test]
    fn replay_ignores_changes_after_terminal_status() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.append(&entry("a")).unwrap();
        store.update_status("a", PurchaseStatus::Failed, Some("no route")).unwrap();

        // A foreign writer appends a conflicting change directly.
        let rogue = serde_json::to_string(&LogRecord::Status {
            id: "a".to_string(),
            status: PurchaseStatus::Processed,
            memo: Some("late".to_string()),
            at: Utc::now(),
        })
        .unwrap();
        files::append_line(store.path(), &rogue).unwrap();

        let current = store.get("a").unwrap().unwrap();
        assert_eq!(current.status, PurchaseStatus::Failed);
        assert_eq!(current.memo.as_deref(), Some("no route"));
    }

    #[test]
    fn plain_entry_lines_and_garbage_are_tolerated() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let plain = serde_json::to_string(&entry("legacy")).unwrap();
        files::append_line(store.path(), &plain).unwrap();
        files::append_line(store.path(), "not json at all").unwrap();
        store.append(&entry("b")).unwrap();

        let ids: Vec<_> = store.read_all().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"legacy".to_string()));
    }

    #[test]
    fn update_unknown_entry_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = store(&temp)
            .update_status("missing", PurchaseStatus::Processed, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
