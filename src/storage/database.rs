// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded settlement database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `executor_locks`: lock_key → signed lock record (JSON bytes)
//! - `purchases`: entry id → serialized PurchaseLogEntry
//! - `purchases_by_time`: (!timestamp_ms | id) → entry id
//!
//! redb admits one write transaction at a time, which is what makes the
//! lock insert-if-absent and the ledger's unique-id insert atomic.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::ledger::PurchaseLogEntry;

// =============================================================================
// Table Definitions
// =============================================================================

/// Lock rows: lock_key → signed record bytes.
const EXECUTOR_LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("executor_locks");

/// Primary ledger table: id → serialized PurchaseLogEntry (JSON bytes).
const PURCHASES: TableDefinition<&str, &[u8]> = TableDefinition::new("purchases");

/// Newest-first index over the ledger.
const PURCHASES_BY_TIME: TableDefinition<&[u8], &str> = TableDefinition::new("purchases_by_time");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("purchase not found: {0}")]
    NotFound(String),
}

impl DbError {
    /// Another handle, in this process or another, holds the file open.
    pub fn is_already_open(&self) -> bool {
        matches!(
            self,
            DbError::RedbDatabase(redb::DatabaseError::DatabaseAlreadyOpen)
        )
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Index key: inverted timestamp (big-endian) then id, so a forward scan
/// yields newest entries first.
fn time_index_key(timestamp_ms: i64, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 1 + id.len());
    key.extend_from_slice(&(!timestamp_ms as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(id.as_bytes());
    key
}

// =============================================================================
// SettlementDatabase
// =============================================================================

/// Embedded ACID store for lock rows and ledger entries.
///
/// redb holds an exclusive lock on the file, so one database serves one
/// process. Several instances need the filesystem backend on shared storage.
pub struct SettlementDatabase {
    db: Database,
}

impl SettlementDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(EXECUTOR_LOCKS)?;
            let _ = write_txn.open_table(PURCHASES)?;
            let _ = write_txn.open_table(PURCHASES_BY_TIME)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Cheap reachability check: open a read transaction and a table.
    pub fn ping(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(EXECUTOR_LOCKS)?;
        Ok(())
    }

    // =========================================================================
    // Executor locks
    // =========================================================================

    /// Store `record` under `lock_key` unless a row already exists.
    pub fn insert_lock_if_absent(&self, lock_key: &str, record: &[u8]) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(EXECUTOR_LOCKS)?;
            if table.get(lock_key)?.is_some() {
                false
            } else {
                table.insert(lock_key, record)?;
                true
            }
        };
        if inserted {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(inserted)
    }

    pub fn get_lock(&self, lock_key: &str) -> DbResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EXECUTOR_LOCKS)?;
        Ok(table.get(lock_key)?.map(|v| v.value().to_vec()))
    }

    /// Delete the row only if it still holds exactly `observed`.
    pub fn remove_lock_if(&self, lock_key: &str, observed: &[u8]) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(EXECUTOR_LOCKS)?;
            let matches = table
                .get(lock_key)?
                .is_some_and(|current| current.value() == observed);
            if matches {
                table.remove(lock_key)?;
            }
            matches
        };
        if removed {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(removed)
    }

    // =========================================================================
    // Purchase ledger
    // =========================================================================

    /// Insert a new entry. Returns `false` if the id is already present.
    pub fn insert_purchase(&self, entry: &PurchaseLogEntry) -> DbResult<bool> {
        let json = serde_json::to_vec(entry)?;
        let key = time_index_key(entry.timestamp.timestamp_millis(), &entry.id);

        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(PURCHASES)?;
            if table.get(entry.id.as_str())?.is_some() {
                false
            } else {
                table.insert(entry.id.as_str(), json.as_slice())?;
                let mut index = write_txn.open_table(PURCHASES_BY_TIME)?;
                index.insert(key.as_slice(), entry.id.as_str())?;
                true
            }
        };
        if inserted {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(inserted)
    }

    pub fn get_purchase(&self, id: &str) -> DbResult<Option<PurchaseLogEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PURCHASES)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All entries, newest first.
    pub fn list_purchases(&self) -> DbResult<Vec<PurchaseLogEntry>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(PURCHASES_BY_TIME)?;
        let table = read_txn.open_table(PURCHASES)?;

        let mut entries = Vec::new();
        for row in index.iter()? {
            let (_, id) = row?;
            if let Some(value) = table.get(id.value())? {
                entries.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(entries)
    }

    /// Read-modify-write one entry inside a single write transaction.
    ///
    /// Nothing is written when `apply` fails.
    pub fn update_purchase<E, F>(&self, id: &str, apply: F) -> Result<PurchaseLogEntry, E>
    where
        E: From<DbError>,
        F: FnOnce(&mut PurchaseLogEntry) -> Result<(), E>,
    {
        let write_txn = self.db.begin_write().map_err(DbError::from)?;
        let entry = {
            let mut table = write_txn.open_table(PURCHASES).map_err(DbError::from)?;

            let existing = {
                let value = table
                    .get(id)
                    .map_err(DbError::from)?
                    .ok_or_else(|| DbError::NotFound(id.to_string()))?;
                value.value().to_vec()
            };

            let mut entry: PurchaseLogEntry =
                serde_json::from_slice(&existing).map_err(DbError::from)?;
            apply(&mut entry)?;

            let json = serde_json::to_vec(&entry).map_err(DbError::from)?;
            table.insert(id, json.as_slice()).map_err(DbError::from)?;
            entry
        };
        write_txn.commit().map_err(DbError::from)?;
        Ok(entry)
    }
}

// =============================================================================
// Tests
// =============================================================================
