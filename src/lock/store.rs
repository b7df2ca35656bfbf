// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Lock slot storage. A store holds opaque record bytes per lock key;
//! serialization and signature checks live in [`super::ExecutorLock`].

use crate::storage::{
    files, BackendHealth, BackendKind, SettlementDatabase, StoragePaths, StorageResult,
};

/// One slot per lock key with atomic insert-if-absent.
pub trait LockStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Store `record` unless the slot is occupied. `Ok(false)` on conflict.
    fn insert_if_absent(&self, lock_key: &str, record: &[u8]) -> StorageResult<bool>;

    fn read(&self, lock_key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Clear the slot only if it still holds exactly `observed`.
    fn remove_if_unchanged(&self, lock_key: &str, observed: &[u8]) -> StorageResult<bool>;

    fn health(&self) -> BackendHealth;
}

impl LockStore for SettlementDatabase {
    fn kind(&self) -> BackendKind {
        BackendKind::Database
    }

    fn insert_if_absent(&self, lock_key: &str, record: &[u8]) -> StorageResult<bool> {
        Ok(self.insert_lock_if_absent(lock_key, record)?)
    }

    fn read(&self, lock_key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.get_lock(lock_key)?)
    }

    fn remove_if_unchanged(&self, lock_key: &str, observed: &[u8]) -> StorageResult<bool> {
        Ok(self.remove_lock_if(lock_key, observed)?)
    }

    fn health(&self) -> BackendHealth {
        let reachable = match self.ping() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Lock database unreachable");
                false
            }
        };
        BackendHealth {
            database: Some(reachable),
            filesystem: None,
        }
    }
}

/// Lock files under `{lock_dir}/settlement-locks/`.
#[derive(Debug, Clone)]
pub struct FileLockStore {
    paths: StoragePaths,
}

impl FileLockStore {
    pub fn new(paths: StoragePaths) -> Self {
        Self { paths }
    }
}

impl LockStore for FileLockStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    fn insert_if_absent(&self, lock_key: &str, record: &[u8]) -> StorageResult<bool> {
        Ok(files::write_new(&self.paths.lock_file(lock_key), record)?)
    }

    fn read(&self, lock_key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(files::read_optional(&self.paths.lock_file(lock_key))?)
    }

    // Compare and unlink are two syscalls: another reclaimer would have to
    // remove the stale file and create its own between them. The database
    // backend has no such window.
    fn remove_if_unchanged(&self, lock_key: &str, observed: &[u8]) -> StorageResult<bool> {
        let path = self.paths.lock_file(lock_key);
        match files::read_optional(&path)? {
            Some(current) if current == observed => Ok(files::remove_if_exists(&path)?),
            _ => Ok(false),
        }
    }

    fn health(&self) -> BackendHealth {
        let reachable = match files::probe_dir(&self.paths.locks_dir()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    dir = %self.paths.locks_dir().display(),
                    error = %e,
                    "Lock directory unusable"
                );
                false
            }
        };
        BackendHealth {
            database: None,
            filesystem: Some(reachable),
        }
    }
}
