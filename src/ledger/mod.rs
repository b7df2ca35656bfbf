// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Purchase Ledger
//!
//! Append-only journal of settlement attempts. Every attempt is appended as
//! `queued` before any funds move and then moved exactly once to `processed`
//! or `failed`. Terminal entries never change again.
//!
//! The database store propagates every error. The file store is written
//! best-effort: a failed write is logged and the settlement carries on.

mod file;
mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use file::FileLedgerStore;
pub use store::LedgerStore;

use crate::storage::{BackendHealth, BackendKind, DbError, StorageError};

/// Lifecycle of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Queued,
    Processed,
    Failed,
}

impl PurchaseStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PurchaseStatus::Queued)
    }
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseStatus::Queued => write!(f, "queued"),
            PurchaseStatus::Processed => write!(f, "processed"),
            PurchaseStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One settlement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseLogEntry {
    /// Unique id, caller-supplied or generated.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Payer address; proceeds are forwarded here.
    pub payer: String,
    pub usd_amount: f64,
    /// Stablecoin amount in atomic units (decimal string).
    pub usdc_atomic_amount: String,
    pub status: PurchaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_hash: Option<String>,
    /// Swap transaction hash, set as soon as the swap is broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_tx_hash: Option<String>,
    /// Quoted reward-token output of the swap (atomic units).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_output: Option<String>,
    /// Latest forwarding transfer, set as soon as it is broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_tx_hash: Option<String>,
    /// Reward-token amount of that transfer (atomic units).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_amount: Option<String>,
}

impl PurchaseLogEntry {
    pub fn new(
        id: impl Into<String>,
        payer: impl Into<String>,
        usd_amount: f64,
        usdc_atomic_amount: impl Into<String>,
        status: PurchaseStatus,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            payer: payer.into(),
            usd_amount,
            usdc_atomic_amount: usdc_atomic_amount.into(),
            status,
            memo: None,
            payment_hash: None,
            swap_tx_hash: None,
            quoted_output: None,
            forward_tx_hash: None,
            forwarded_amount: None,
        }
    }

    /// Monotonic status transition. `memo: None` keeps the current memo.
    pub fn apply_status(
        &mut self,
        status: PurchaseStatus,
        memo: Option<&str>,
    ) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::FinalStatus {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if !status.is_terminal() {
            return Err(LedgerError::InvalidTransition(self.id.clone()));
        }
        self.status = status;
        if let Some(memo) = memo {
            self.memo = Some(memo.to_string());
        }
        Ok(())
    }

    /// Record the broadcast swap. Only queued entries accept it.
    pub fn apply_swap(&mut self, swap_tx_hash: &str, quoted_output: &str) -> Result<(), LedgerError> {
        self.ensure_queued()?;
        self.swap_tx_hash = Some(swap_tx_hash.to_string());
        self.quoted_output = Some(quoted_output.to_string());
        Ok(())
    }

    /// Record a broadcast forwarding transfer, replacing any earlier attempt.
    pub fn apply_forward(&mut self, forward_tx_hash: &str, amount: &str) -> Result<(), LedgerError> {
        self.ensure_queued()?;
        self.forward_tx_hash = Some(forward_tx_hash.to_string());
        self.forwarded_amount = Some(amount.to_string());
        Ok(())
    }

    fn ensure_queued(&self) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::FinalStatus {
                id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Queued with a recorded swap: can resume without swapping again.
    pub fn is_resumable(&self) -> bool {
        self.status == PurchaseStatus::Queued
            && self.swap_tx_hash.is_some()
            && self.quoted_output.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("duplicate purchase id: {0}")]
    DuplicateId(String),

    #[error("purchase not found: {0}")]
    NotFound(String),

    #[error("purchase {id} is already {status}")]
    FinalStatus { id: String, status: PurchaseStatus },

    #[error("purchase {0} cannot return to queued")]
    InvalidTransition(String),
}

impl From<DbError> for LedgerError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => LedgerError::NotFound(what),
            other => LedgerError::Storage(StorageError::Database(other)),
        }
    }
}

/// Ledger service over the selected store.
#[derive(Clone)]
pub struct PurchaseLedger {
    store: Arc<dyn LedgerStore>,
}

impl PurchaseLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn kind(&self) -> BackendKind {
        self.store.kind()
    }

    pub fn health(&self) -> BackendHealth {
        self.store.health()
    }

    /// Persist `entry` as queued, whatever status it carried.
    pub fn append(&self, mut entry: PurchaseLogEntry) -> Result<PurchaseLogEntry, LedgerError> {
        entry.status = PurchaseStatus::Queued;
        let result = self.store.append(&entry);
        self.best_effort("append", &entry.id, result)?;
        tracing::info!(entry_id = %entry.id, payer = %entry.payer, "Purchase queued");
        Ok(entry)
    }

    /// All entries, newest first.
    pub fn read_all(&self) -> Result<Vec<PurchaseLogEntry>, LedgerError> {
        match self.store.read_all() {
            Err(LedgerError::Storage(e)) if !self.store.is_durable() => {
                tracing::warn!(error = %e, "Ledger unreadable, returning no entries");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<PurchaseLogEntry>, LedgerError> {
        match self.store.get(id) {
            Err(LedgerError::Storage(e)) if !self.store.is_durable() => {
                tracing::warn!(entry_id = %id, error = %e, "Ledger unreadable");
                Ok(None)
            }
            other => other,
        }
    }

    /// Move a queued entry to a terminal status.
    pub fn update_status(
        &self,
        id: &str,
        status: PurchaseStatus,
        memo: Option<&str>,
    ) -> Result<(), LedgerError> {
        let result = self.store.update_status(id, status, memo).map(|_| ());
        self.best_effort("update_status", id, result)?;
        tracing::info!(entry_id = %id, %status, "Purchase status updated");
        Ok(())
    }

    /// Record the broadcast swap of a queued entry.
    pub fn record_swap(
        &self,
        id: &str,
        swap_tx_hash: &str,
        quoted_output: &str,
    ) -> Result<(), LedgerError> {
        let result = self
            .store
            .record_swap(id, swap_tx_hash, quoted_output)
            .map(|_| ());
        self.best_effort("record_swap", id, result)
    }

    /// Record the forwarding transfer of a queued entry.
    pub fn record_forward(
        &self,
        id: &str,
        forward_tx_hash: &str,
        amount: &str,
    ) -> Result<(), LedgerError> {
        let result = self
            .store
            .record_forward(id, forward_tx_hash, amount)
            .map(|_| ());
        self.best_effort("record_forward", id, result)
    }

    /// Queued entries with a recorded swap, oldest first.
    pub fn pending_resumable(&self) -> Result<Vec<PurchaseLogEntry>, LedgerError> {
        let mut pending: Vec<_> = self
            .read_all()?
            .into_iter()
            .filter(PurchaseLogEntry::is_resumable)
            .collect();
        pending.reverse();
        Ok(pending)
    }

    fn best_effort(&self, op: &str, id: &str, result: Result<(), LedgerError>) -> Result<(), LedgerError> {
        match result {
            Err(LedgerError::Storage(e)) if !self.store.is_durable() => {
                tracing::warn!(entry_id = %id, op, error = %e, "Ledger write failed, continuing");
                Ok(())
            }
            other => other,
        }
    }
}
