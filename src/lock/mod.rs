// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Executor Lock
//!
//! Cross-instance mutual exclusion for settlement execution. At most one
//! valid record exists per lock key:
//!
//! - a record is *valid* when its HMAC signature verifies under the shared
//!   secret and its age is within the timeout,
//! - an invalid record (forged, unreadable or stale) may be deleted by any
//!   instance, conditionally on it being the exact record that was judged,
//! - acquire retries the insert exactly once after such a reclaim.
//!
//! There is no wait queue. A failed acquire means "busy" and the caller
//! reports it as such.

mod signature;
mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use signature::LockSigner;
pub use store::{FileLockStore, LockStore};

use crate::storage::{BackendKind, StorageResult};

/// Lock key used when `EXECUTOR_LOCK_KEY` is unset.
pub const DEFAULT_LOCK_KEY: &str = "settlement_executor";

/// Lock tuning.
#[derive(Clone)]
pub struct LockConfig {
    pub lock_key: String,
    /// Age after which a record is stale and reclaimable.
    pub timeout: Duration,
    /// Shared HMAC secret.
    pub secret: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            timeout: Duration::from_secs(60),
            secret: String::new(),
        }
    }
}

impl std::fmt::Debug for LockConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockConfig")
            .field("lock_key", &self.lock_key)
            .field("timeout", &self.timeout)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Persisted lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub lock_key: String,
    pub holder: String,
    pub pid: u32,
    /// Unix milliseconds at acquisition.
    pub timestamp: i64,
    pub signature: String,
    pub request_id: String,
}

/// Proof of ownership returned by a successful acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub lock_key: String,
    pub holder: String,
    pub request_id: String,
    pub signature: String,
    pub acquired_at: DateTime<Utc>,
}

/// Lock health snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LockHealth {
    pub backend: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<bool>,
    /// Whether a valid lock is currently held.
    pub locked: bool,
}

impl LockHealth {
    pub fn is_healthy(&self) -> bool {
        self.database.unwrap_or(true) && self.filesystem.unwrap_or(true)
    }
}

/// What a stored record turned out to be.
enum Verdict {
    Valid(LockRecord),
    Stale(LockRecord),
    Forged,
}

/// Signed distributed lock over a [`LockStore`].
pub struct ExecutorLock {
    store: Arc<dyn LockStore>,
    signer: LockSigner,
    lock_key: String,
    timeout_ms: i64,
}

impl ExecutorLock {
    pub fn new(store: Arc<dyn LockStore>, config: &LockConfig) -> Self {
        Self {
            store,
            signer: LockSigner::new(&config.secret),
            lock_key: config.lock_key.clone(),
            timeout_ms: i64::try_from(config.timeout.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// Try to take the lock for `request_id`. Never waits.
    ///
    /// Storage failures fail closed: they are logged and reported as `None`.
    pub fn acquire(&self, holder: &str, request_id: &str) -> Option<LockLease> {
        let now = Utc::now();
        let pid = std::process::id();
        let timestamp = now.timestamp_millis();
        let record = LockRecord {
            lock_key: self.lock_key.clone(),
            holder: holder.to_string(),
            pid,
            timestamp,
            signature: self.signer.sign(holder, pid, timestamp, request_id),
            request_id: request_id.to_string(),
        };
        let bytes = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize lock record");
                return None;
            }
        };

        match self.store.insert_if_absent(&self.lock_key, &bytes) {
            Ok(true) => return Some(lease(record, now)),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(lock_key = %self.lock_key, error = %e, "Lock insert failed");
                return None;
            }
        }

        let reclaimed = match self.store.read(&self.lock_key) {
            // Released between our insert and read.
            Ok(None) => true,
            Ok(Some(observed)) => match self.judge(&observed) {
                Verdict::Valid(current) => {
                    tracing::debug!(
                        lock_key = %self.lock_key,
                        holder = %current.holder,
                        request_id = %current.request_id,
                        "Executor lock busy"
                    );
                    return None;
                }
                Verdict::Stale(_) | Verdict::Forged => self.reclaim(&observed),
            },
            Err(e) => {
                tracing::error!(lock_key = %self.lock_key, error = %e, "Lock read failed");
                return None;
            }
        };
        if !reclaimed {
            return None;
        }

        match self.store.insert_if_absent(&self.lock_key, &bytes) {
            Ok(true) => {
                tracing::info!(lock_key = %self.lock_key, request_id, "Executor lock acquired after reclaim");
                Some(lease(record, now))
            }
            Ok(false) => None,
            Err(e) => {
                tracing::error!(lock_key = %self.lock_key, error = %e, "Lock insert failed");
                None
            }
        }
    }

    /// Release the lock if `lease` still owns it.
    ///
    /// Returns `Ok(false)` when the slot is empty or holds someone else's
    /// record; that record is left untouched.
    pub fn release(&self, lease: &LockLease) -> StorageResult<bool> {
        let Some(observed) = self.store.read(&lease.lock_key)? else {
            tracing::warn!(
                lock_key = %lease.lock_key,
                request_id = %lease.request_id,
                "Lock already gone at release"
            );
            return Ok(false);
        };

        let owned = serde_json::from_slice::<LockRecord>(&observed).is_ok_and(|record| {
            record.request_id == lease.request_id && record.signature == lease.signature
        });
        if !owned {
            tracing::warn!(
                lock_key = %lease.lock_key,
                request_id = %lease.request_id,
                "Refusing to release a lock owned by another holder"
            );
            return Ok(false);
        }

        self.store.remove_if_unchanged(&lease.lock_key, &observed)
    }

    /// True only for a valid, non-stale record. Invalid records are reclaimed.
    pub fn is_locked(&self) -> StorageResult<bool> {
        let Some(observed) = self.store.read(&self.lock_key)? else {
            return Ok(false);
        };
        match self.judge(&observed) {
            Verdict::Valid(_) => Ok(true),
            Verdict::Stale(_) | Verdict::Forged => {
                self.reclaim(&observed);
                Ok(false)
            }
        }
    }

    pub fn health_check(&self) -> LockHealth {
        let backends = self.store.health();
        let locked = match self.is_locked() {
            Ok(locked) => locked,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read lock state");
                false
            }
        };
        LockHealth {
            backend: self.store.kind(),
            database: backends.database,
            filesystem: backends.filesystem,
            locked,
        }
    }

    fn judge(&self, raw: &[u8]) -> Verdict {
        let record: LockRecord = match serde_json::from_slice(raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(lock_key = %self.lock_key, error = %e, "Unreadable lock record");
                return Verdict::Forged;
            }
        };

        let age_ms = Utc::now().timestamp_millis().saturating_sub(record.timestamp);
        if age_ms > self.timeout_ms {
            tracing::warn!(
                lock_key = %self.lock_key,
                holder = %record.holder,
                age_ms,
                "Stale executor lock"
            );
            return Verdict::Stale(record);
        }

        let authentic = record.lock_key == self.lock_key
            && self.signer.verify(
                &record.holder,
                record.pid,
                record.timestamp,
                &record.request_id,
                &record.signature,
            );
        if !authentic {
            tracing::warn!(
                lock_key = %self.lock_key,
                holder = %record.holder,
                "Lock record failed signature verification"
            );
            return Verdict::Forged;
        }

        Verdict::Valid(record)
    }

    /// Delete exactly `observed`. Whether or not this call removed it, a
    /// retry is only worth attempting if the slot no longer holds it.
    fn reclaim(&self, observed: &[u8]) -> bool {
        match self.store.remove_if_unchanged(&self.lock_key, observed) {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(lock_key = %self.lock_key, "Lock changed before reclaim");
                true
            }
            Err(e) => {
                tracing::error!(lock_key = %self.lock_key, error = %e, "Lock reclaim failed");
                false
            }
        }
    }
}

fn lease(record: LockRecord, acquired_at: DateTime<Utc>) -> LockLease {
    LockLease {
        lock_key: record.lock_key,
        holder: record.holder,
        request_id: record.request_id,
        signature: record.signature,
        acquired_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SettlementDatabase, StoragePaths};
    use tempfile::TempDir;

    fn config(timeout: Duration) -> LockConfig {
        LockConfig {
            lock_key: "test_executor".to_string(),
            timeout,
            secret: "test-secret".to_string(),
        }
    }

    fn file_store(temp: &TempDir) -> Arc<dyn LockStore> {
        Arc::new(FileLockStore::new(StoragePaths::new(
            temp.path(),
            temp.path().join("log.ndjson"),
        )))
    }

    fn db_store(temp: &TempDir) -> Arc<dyn LockStore> {
        Arc::new(SettlementDatabase::open(&temp.path().join("locks.redb")).unwrap())
    }

    fn stores(temp: &TempDir) -> Vec<Arc<dyn LockStore>> {
        vec![file_store(temp), db_store(temp)]
    }

    fn signed_record(signer: &LockSigner, key: &str, timestamp: i64, request_id: &str) -> Vec<u8> {
        let record = LockRecord {
            lock_key: key.to_string(),
            holder: "other".to_string(),
            pid: 1,
            timestamp,
            signature: signer.sign("other", 1, timestamp, request_id),
            request_id: request_id.to_string(),
        };
        serde_json::to_vec(&record).unwrap()
    }

    #[test]
    fn concurrent_acquires_have_one_winner() {
        let temp = TempDir::new().unwrap();
        for store in stores(&temp) {
            let lock = ExecutorLock::new(store, &config(Duration::from_secs(60)));
            let winners = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..10)
                    .map(|i| {
                        let lock = &lock;
                        scope.spawn(move || lock.acquire("worker", &format!("req-{i}")))
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|h| h.join().unwrap())
                    .collect::<Vec<_>>()
            });
            assert_eq!(winners.len(), 1, "backend {:?}", lock.store.kind());
            assert!(lock.is_locked().unwrap());
            assert!(lock.release(&winners[0]).unwrap());
            assert!(!lock.is_locked().unwrap());
        }
    }

    #[test]
    fn second_acquire_is_busy_until_release() {
        let temp = TempDir::new().unwrap();
        for store in stores(&temp) {
            let lock = ExecutorLock::new(store, &config(Duration::from_secs(60)));
            let lease = lock.acquire("worker-a", "req-1").unwrap();
            assert!(lock.acquire("worker-b", "req-2").is_none());

            assert!(lock.release(&lease).unwrap());
            let second = lock.acquire("worker-b", "req-2").unwrap();
            assert_eq!(second.request_id, "req-2");
        }
    }

    #[test]
    fn stale_lock_is_reclaimable_even_with_bad_signature() {
        let temp = TempDir::new().unwrap();
        for store in stores(&temp) {
            let stale_at = Utc::now().timestamp_millis() - 120_000;
            let forged = LockSigner::new("someone-else");
            store
                .insert_if_absent("test_executor", &signed_record(&forged, "test_executor", stale_at, "old"))
                .unwrap();

            let lock = ExecutorLock::new(store, &config(Duration::from_secs(60)));
            let lease = lock.acquire("worker", "req-new").unwrap();
            assert_eq!(lease.request_id, "req-new");
        }
    }

    #[test]
    fn fresh_valid_lock_is_not_reclaimed() {
        let temp = TempDir::new().unwrap();
        for store in stores(&temp) {
            let signer = LockSigner::new("test-secret");
            let now = Utc::now().timestamp_millis();
            store
                .insert_if_absent("test_executor", &signed_record(&signer, "test_executor", now, "held"))
                .unwrap();

            let lock = ExecutorLock::new(store, &config(Duration::from_secs(60)));
            assert!(lock.acquire("worker", "req").is_none());
            assert!(lock.is_locked().unwrap());
        }
    }

    #[test]
    fn tampered_signature_is_never_honored() {
        let temp = TempDir::new().unwrap();
        for store in stores(&temp) {
            let now = Utc::now().timestamp_millis();
            let forged = LockSigner::new("wrong-secret");
            store
                .insert_if_absent("test_executor", &signed_record(&forged, "test_executor", now, "forged"))
                .unwrap();

            let lock = ExecutorLock::new(store.clone(), &config(Duration::from_secs(60)));
            assert!(!lock.is_locked().unwrap());
            // is_locked reclaimed the forged record.
            assert!(store.read("test_executor").unwrap().is_none());

            store
                .insert_if_absent("test_executor", &signed_record(&forged, "test_executor", now, "forged"))
                .unwrap();
            assert!(lock.acquire("worker", "req").is_some());
        }
    }

    #[test]
    fn unreadable_record_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        for store in stores(&temp) {
            store.insert_if_absent("test_executor", b"{not json").unwrap();
            let lock = ExecutorLock::new(store, &config(Duration::from_secs(60)));
            assert!(lock.acquire("worker", "req").is_some());
        }
    }

    #[test]
    fn release_refuses_foreign_lease() {
        let temp = TempDir::new().unwrap();
        for store in stores(&temp) {
            let lock = ExecutorLock::new(store, &config(Duration::from_secs(60)));
            let owner = lock.acquire("worker-a", "req-1").unwrap();

            let mut impostor = owner.clone();
            impostor.request_id = "req-2".to_string();
            assert!(!lock.release(&impostor).unwrap());
            assert!(lock.is_locked().unwrap());

            assert!(lock.release(&owner).unwrap());
            assert!(!lock.release(&owner).unwrap());
        }
    }

    #[test]
    fn expired_lease_cannot_release_successor() {
        let temp = TempDir::new().unwrap();
        for store in stores(&temp) {
            let lock = ExecutorLock::new(store, &config(Duration::from_millis(30)));
            let first = lock.acquire("worker-a", "req-1").unwrap();
            std::thread::sleep(Duration::from_millis(60));

            let second = lock.acquire("worker-b", "req-2").unwrap();
            assert!(!lock.release(&first).unwrap());
            assert!(lock.release(&second).unwrap());
        }
    }

    #[test]
    fn health_reports_backend_and_state() {
        let temp = TempDir::new().unwrap();

        let lock = ExecutorLock::new(file_store(&temp), &config(Duration::from_secs(60)));
        let health = lock.health_check();
        assert_eq!(health.backend, BackendKind::Filesystem);
        assert_eq!(health.filesystem, Some(true));
        assert_eq!(health.database, None);
        assert!(!health.locked);

        let lock = ExecutorLock::new(db_store(&temp), &config(Duration::from_secs(60)));
        let _lease = lock.acquire("worker", "req").unwrap();
        let health = lock.health_check();
        assert_eq!(health.backend, BackendKind::Database);
        assert_eq!(health.database, Some(true));
        assert!(health.locked);
        assert!(health.is_healthy());
    }
}
