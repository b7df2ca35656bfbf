// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path layout for the filesystem storage backend.

use std::path::{Path, PathBuf};

/// Subdirectory of the lock directory that holds lock files.
pub const LOCKS_SUBDIR: &str = "settlement-locks";

/// Storage path utilities for the filesystem backend.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    lock_dir: PathBuf,
    purchase_log: PathBuf,
}

impl StoragePaths {
    pub fn new(lock_dir: impl AsRef<Path>, purchase_log: impl AsRef<Path>) -> Self {
        Self {
            lock_dir: lock_dir.as_ref().to_path_buf(),
            purchase_log: purchase_log.as_ref().to_path_buf(),
        }
    }

    /// Root directory configured for locks.
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Directory containing lock files.
    pub fn locks_dir(&self) -> PathBuf {
        self.lock_dir.join(LOCKS_SUBDIR)
    }

    /// Lock file for a lock key.
    pub fn lock_file(&self, lock_key: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", sanitize(lock_key)))
    }

    /// NDJSON purchase ledger.
    pub fn purchase_log(&self) -> PathBuf {
        self.purchase_log.clone()
    }
}

/// Keep lock keys from escaping the locks directory.
fn sanitize(lock_key: &str) -> String {
    lock_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_file_lives_under_locks_subdir() {
        let paths = StoragePaths::new("/tmp", "/data/log.ndjson");
        assert_eq!(
            paths.lock_file("settlement_executor"),
            PathBuf::from("/tmp/settlement-locks/settlement_executor.lock")
        );
        assert_eq!(paths.purchase_log(), PathBuf::from("/data/log.ndjson"));
    }

    #[test]
    fn lock_key_cannot_traverse() {
        let paths = StoragePaths::new("/tmp", "/data/log.ndjson");
        assert_eq!(
            paths.lock_file("../../etc/passwd"),
            PathBuf::from("/tmp/settlement-locks/______etc_passwd.lock")
        );
    }
}
