// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger storage trait and the database implementation.

use crate::storage::{BackendHealth, BackendKind, SettlementDatabase};

use super::{LedgerError, PurchaseLogEntry, PurchaseStatus};

/// Durable home of purchase log entries.
pub trait LedgerStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether write failures must reach the caller. Stores that return
    /// `false` are written best-effort.
    fn is_durable(&self) -> bool;

    fn append(&self, entry: &PurchaseLogEntry) -> Result<(), LedgerError>;

    /// Current state of every entry, newest first.
    fn read_all(&self) -> Result<Vec<PurchaseLogEntry>, LedgerError>;

    fn get(&self, id: &str) -> Result<Option<PurchaseLogEntry>, LedgerError>;

    fn update_status(
        &self,
        id: &str,
        status: PurchaseStatus,
        memo: Option<&str>,
    ) -> Result<PurchaseLogEntry, LedgerError>;

    fn record_swap(
        &self,
        id: &str,
        swap_tx_hash: &str,
        quoted_output: &str,
    ) -> Result<PurchaseLogEntry, LedgerError>;

    fn record_forward(
        &self,
        id: &str,
        forward_tx_hash: &str,
        amount: &str,
    ) -> Result<PurchaseLogEntry, LedgerError>;

    fn health(&self) -> BackendHealth;
}

impl LedgerStore for SettlementDatabase {
    fn kind(&self) -> BackendKind {
        BackendKind::Database
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn append(&self, entry: &PurchaseLogEntry) -> Result<(), LedgerError> {
        if self.insert_purchase(entry)? {
            Ok(())
        } else {
            Err(LedgerError::DuplicateId(entry.id.clone()))
        }
    }

    fn read_all(&self) -> Result<Vec<PurchaseLogEntry>, LedgerError> {
        Ok(self.list_purchases()?)
    }

    fn get(&self, id: &str) -> Result<Option<PurchaseLogEntry>, LedgerError> {
        Ok(self.get_purchase(id)?)
    }

    fn update_status(
        &self,
        id: &str,
        status: PurchaseStatus,
        memo: Option<&str>,
    ) -> Result<PurchaseLogEntry, LedgerError> {
        self.update_purchase(id, |entry| entry.apply_status(status, memo))
    }

    fn record_swap(
        &self,
        id: &str,
        swap_tx_hash: &str,
        quoted_output: &str,
    ) -> Result<PurchaseLogEntry, LedgerError> {
        self.update_purchase(id, |entry| entry.apply_swap(swap_tx_hash, quoted_output))
    }

    fn record_forward(
        &self,
        id: &str,
        forward_tx_hash: &str,
        amount: &str,
    ) -> Result<PurchaseLogEntry, LedgerError> {
        self.update_purchase(id, |entry| entry.apply_forward(forward_tx_hash, amount))
    }

    fn health(&self) -> BackendHealth {
        BackendHealth {
            database: Some(self.ping().is_ok()),
            filesystem: None,
        }
    }
}
