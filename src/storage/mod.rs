// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Backends
//!
//! The executor lock and the purchase ledger share one storage strategy,
//! chosen once at startup:
//!
//! - **Database**: an embedded redb file (`DATABASE_PATH`). Lock inserts are
//!   serialized by redb's single write transaction, ledger ids are unique.
//!   redb opens the file exclusively, so this backend serves one process;
//!   a second instance on the same path fails at startup.
//! - **Filesystem**: a lock file per lock key under the lock directory and a
//!   log-structured NDJSON purchase ledger.
//!
//! ## Storage Layout (filesystem backend)
//!
//! ```text
//! {lock_dir}/settlement-locks/
//!   {lock_key}.lock          # signed LockRecord (JSON)
//! {purchase_log}             # ledger records (NDJSON, append-only)
//! ```

pub mod database;
pub mod files;
pub mod paths;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

pub use database::{DbError, DbResult, SettlementDatabase};
pub use paths::StoragePaths;

use crate::ledger::{FileLedgerStore, LedgerStore};
use crate::lock::{FileLockStore, LockStore};

/// Where lock and ledger data live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Presence selects the database backend.
    pub database_path: Option<PathBuf>,
    pub lock_dir: PathBuf,
    pub purchase_log: PathBuf,
}

/// Error type shared by the lock and ledger stores.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] DbError),
}

impl StorageError {
    /// The database file is already held by another process.
    pub fn is_database_in_use(&self) -> bool {
        matches!(self, StorageError::Database(e) if e.is_already_open())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Backend identifier reported by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Database,
    Filesystem,
}

/// Reachability of the backends behind a store. `None` means not configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BackendHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<bool>,
}

/// The selected storage backend.
#[derive(Clone)]
pub enum StorageBackend {
    Database(Arc<SettlementDatabase>),
    Filesystem(StoragePaths),
}

impl StorageBackend {
    /// Open the database when one is configured, otherwise use the filesystem.
    pub fn select(config: &StorageConfig) -> StorageResult<Self> {
        match &config.database_path {
            Some(path) => {
                let db = SettlementDatabase::open(path)?;
                tracing::info!(path = %path.display(), "Using database storage backend");
                Ok(Self::Database(Arc::new(db)))
            }
            None => {
                let paths = StoragePaths::new(&config.lock_dir, &config.purchase_log);
                tracing::info!(
                    lock_dir = %paths.lock_dir().display(),
                    purchase_log = %paths.purchase_log().display(),
                    "Using filesystem storage backend"
                );
                Ok(Self::Filesystem(paths))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Database(_) => BackendKind::Database,
            Self::Filesystem(_) => BackendKind::Filesystem,
        }
    }

    pub fn lock_store(&self) -> Arc<dyn LockStore> {
        match self {
            Self::Database(db) => db.clone(),
            Self::Filesystem(paths) => Arc::new(FileLockStore::new(paths.clone())),
        }
    }

    pub fn ledger_store(&self) -> Arc<dyn LedgerStore> {
        match self {
            Self::Database(db) => db.clone(),
            Self::Filesystem(paths) => Arc::new(FileLedgerStore::new(paths.purchase_log())),
        }
    }
}
