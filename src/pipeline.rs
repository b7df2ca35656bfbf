// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Pipeline
//!
//! ```text
//! rate limit → acquire lock → append(queued) → swap leg → reconcile + forward
//!            → update(processed | failed) → release
//! ```
//!
//! The lock is released on every path once acquired. The swap and forward
//! hashes are written to the entry the moment each transaction is broadcast.
//! An entry left `queued` with a swap hash is picked up by
//! [`SettlementPipeline::resume`]: it confirms the recorded swap, then either
//! confirms the recorded forward or forwards for the first time. A forward is
//! only sent again when the recorded one reverted.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};

use crate::blockchain::parse_amount;
use crate::ledger::{LedgerError, PurchaseLedger, PurchaseLogEntry, PurchaseStatus};
use crate::lock::{ExecutorLock, LockLease};
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::swap::{
    ForwardTransfer, SwapError, SwapExecutor, SwapFailure, SwapJournal, SwapLeg, SwapReceipt,
};

/// Caller-supplied ids longer than this are rejected.
pub const MAX_ID_LEN: usize = 128;

/// One payment to settle.
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    /// Idempotency key. Generated when absent.
    pub id: Option<String>,
    pub payer: Address,
    /// Stablecoin amount as a decimal string, e.g. `"0.05"`.
    pub amount: String,
    pub client_ip: Option<String>,
    /// Hash of the incoming payment, kept for audit.
    pub payment_hash: Option<String>,
}

#[derive(Debug)]
pub enum SettlementOutcome {
    RateLimited,
    /// Another execution holds the lock.
    Busy,
    /// The id was already settled or attempted.
    Duplicate(PurchaseLogEntry),
    Settled {
        entry_id: String,
        receipt: SwapReceipt,
    },
    /// The swap went out but delivery is not confirmed. The entry stays
    /// queued for resume.
    Pending {
        entry_id: String,
        swap_tx_hash: TxHash,
        error: SwapError,
    },
    Failed {
        entry_id: String,
        error: SwapError,
    },
}

/// Outcome plus the admission decision that preceded it.
#[derive(Debug)]
pub struct SettlementReport {
    pub rate_limit: RateLimitDecision,
    pub outcome: SettlementOutcome,
}

/// Counts from one resume sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResumeSummary {
    pub settled: usize,
    pub failed: usize,
    pub still_pending: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Writes broadcast hashes onto one ledger entry.
struct EntryJournal<'a> {
    ledger: &'a PurchaseLedger,
    entry_id: &'a str,
}

impl SwapJournal for EntryJournal<'_> {
    fn swap_submitted(&self, tx_hash: TxHash, quoted_output: U256) {
        let result =
            self.ledger
                .record_swap(self.entry_id, &tx_hash.to_string(), &quoted_output.to_string());
        if let Err(e) = result {
            tracing::error!(entry_id = %self.entry_id, %tx_hash, error = %e, "Failed to record swap");
        }
    }

    fn forward_submitted(&self, tx_hash: TxHash, amount: U256) {
        let result = self
            .ledger
            .record_forward(self.entry_id, &tx_hash.to_string(), &amount.to_string());
        if let Err(e) = result {
            tracing::error!(entry_id = %self.entry_id, %tx_hash, error = %e, "Failed to record forward");
        }
    }
}

/// What a queued entry says about its on-chain progress.
struct RecordedProgress {
    payer: Address,
    leg: SwapLeg,
    forward: Option<ForwardTransfer>,
}

pub struct SettlementPipeline {
    limiter: Arc<RateLimiter>,
    lock: Arc<ExecutorLock>,
    ledger: PurchaseLedger,
    executor: Arc<SwapExecutor>,
    stablecoin_decimals: u8,
    holder: String,
}

impl SettlementPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        lock: Arc<ExecutorLock>,
        ledger: PurchaseLedger,
        executor: Arc<SwapExecutor>,
        stablecoin_decimals: u8,
    ) -> Self {
        Self {
            limiter,
            lock,
            ledger,
            executor,
            stablecoin_decimals,
            holder: format!("settlement-facilitator-{}", std::process::id()),
        }
    }

    pub fn ledger(&self) -> &PurchaseLedger {
        &self.ledger
    }

    pub fn lock(&self) -> &ExecutorLock {
        &self.lock
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run one settlement. Errors are only returned before any funds move.
    ///
    /// Dropping the returned future part way leaves the lock held until it
    /// goes stale. Callers that may be cancelled should run it on its own task.
    pub async fn settle(
        &self,
        request: SettlementRequest,
    ) -> Result<SettlementReport, PipelineError> {
        let amount_in = parse_amount(&request.amount, self.stablecoin_decimals)
            .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?;
        if amount_in.is_zero() {
            return Err(PipelineError::InvalidRequest("amount must be positive".to_string()));
        }
        let usd_amount: f64 = request
            .amount
            .trim()
            .parse()
            .map_err(|_| PipelineError::InvalidRequest(format!("amount {:?}", request.amount)))?;
        if let Some(id) = &request.id {
            if id.trim().is_empty() || id.len() > MAX_ID_LEN {
                return Err(PipelineError::InvalidRequest(format!(
                    "id must be 1 to {MAX_ID_LEN} characters"
                )));
            }
        }

        let payer = request.payer.to_string();
        let rate_limit = self
            .limiter
            .check_combined(&payer, request.client_ip.as_deref());
        if !rate_limit.allowed {
            tracing::info!(payer = %payer, limited_by = ?rate_limit.limited_by, "Settlement rate limited");
            return Ok(SettlementReport {
                rate_limit,
                outcome: SettlementOutcome::RateLimited,
            });
        }

        if let Some(existing) = self.existing(request.id.as_deref())? {
            return Ok(SettlementReport {
                rate_limit,
                outcome: SettlementOutcome::Duplicate(existing),
            });
        }

        let entry_id = request
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let Some(lease) = self.lock.acquire(&self.holder, &entry_id) else {
            tracing::info!(entry_id = %entry_id, "Executor busy");
            return Ok(SettlementReport {
                rate_limit,
                outcome: SettlementOutcome::Busy,
            });
        };

        let result = self
            .settle_locked(entry_id, &request, usd_amount, amount_in)
            .await;
        self.release(&lease);

        Ok(SettlementReport {
            rate_limit,
            outcome: result?,
        })
    }

    async fn settle_locked(
        &self,
        entry_id: String,
        request: &SettlementRequest,
        usd_amount: f64,
        amount_in: U256,
    ) -> Result<SettlementOutcome, PipelineError> {
        // A concurrent request with the same id may have won the lock first.
        if let Some(existing) = self.existing(request.id.as_deref())? {
            return Ok(SettlementOutcome::Duplicate(existing));
        }

        let mut entry = PurchaseLogEntry::new(
            entry_id.clone(),
            request.payer.to_string(),
            usd_amount,
            amount_in.to_string(),
            PurchaseStatus::Queued,
        );
        entry.payment_hash = request.payment_hash.clone();
        self.ledger.append(entry)?;

        let journal = EntryJournal {
            ledger: &self.ledger,
            entry_id: &entry_id,
        };
        let leg = match self.executor.swap_leg(amount_in, &journal).await {
            Ok(leg) => leg,
            Err(error) => {
                if let Some(swap_tx_hash) = error.unconfirmed_tx() {
                    return Ok(self.pending(entry_id, swap_tx_hash, error));
                }
                tracing::warn!(entry_id = %entry_id, step = %error.step, error = %error, "Swap leg failed");
                self.mark(&entry_id, PurchaseStatus::Failed, &error.memo());
                return Ok(SettlementOutcome::Failed { entry_id, error });
            }
        };

        Ok(self.finish(entry_id, request.payer, &leg).await)
    }

    /// Resume one queued entry with a recorded swap.
    ///
    /// `Ok(None)` when the lock is busy or the entry is no longer resumable.
    pub async fn resume(&self, id: &str) -> Result<Option<SettlementOutcome>, PipelineError> {
        let Some(lease) = self.lock.acquire(&self.holder, id) else {
            return Ok(None);
        };
        let result = self.resume_locked(id).await;
        self.release(&lease);
        result
    }

    async fn resume_locked(&self, id: &str) -> Result<Option<SettlementOutcome>, PipelineError> {
        let Some(entry) = self.ledger.get(id)? else {
            return Ok(None);
        };
        if !entry.is_resumable() {
            return Ok(None);
        }

        let progress = match recorded_progress(&entry) {
            Ok(progress) => progress,
            Err(reason) => {
                tracing::error!(entry_id = %id, reason = %reason, "Cannot resume entry");
                return Ok(None);
            }
        };
        let leg = progress.leg;

        if let Err(error) = self.executor.confirm_swap(&leg).await {
            if error.is_reverted() {
                tracing::warn!(entry_id = %id, tx_hash = %leg.swap_tx_hash, "Recorded swap reverted");
                self.mark(id, PurchaseStatus::Failed, &error.memo());
                return Ok(Some(SettlementOutcome::Failed {
                    entry_id: id.to_string(),
                    error,
                }));
            }
            return Ok(Some(self.pending(id.to_string(), leg.swap_tx_hash, error)));
        }

        if let Some(forward) = progress.forward {
            match self
                .executor
                .confirm_forward(progress.payer, &leg, forward)
                .await
            {
                Ok(receipt) => return Ok(Some(self.settled(id.to_string(), receipt))),
                Err(error) if error.is_reverted() => {
                    tracing::warn!(entry_id = %id, tx_hash = %forward.tx_hash, "Recorded forward reverted, forwarding again");
                }
                Err(error) => return Ok(Some(self.pending(id.to_string(), leg.swap_tx_hash, error))),
            }
        }

        tracing::info!(entry_id = %id, tx_hash = %leg.swap_tx_hash, "Resuming settlement at reconcile");
        Ok(Some(self.finish(id.to_string(), progress.payer, &leg).await))
    }

    /// Resume every resumable entry, oldest first. Stops when the lock is busy.
    pub async fn resume_pending(&self) -> Result<ResumeSummary, PipelineError> {
        let mut summary = ResumeSummary::default();
        for entry in self.ledger.pending_resumable()? {
            match self.resume(&entry.id).await? {
                Some(SettlementOutcome::Settled { .. }) => summary.settled += 1,
                Some(SettlementOutcome::Failed { .. }) => summary.failed += 1,
                Some(_) => summary.still_pending += 1,
                None if self.lock.is_locked().unwrap_or(true) => break,
                None => {}
            }
        }
        Ok(summary)
    }

    /// Reconcile and forward, then record the terminal status.
    async fn finish(&self, entry_id: String, payer: Address, leg: &SwapLeg) -> SettlementOutcome {
        let journal = EntryJournal {
            ledger: &self.ledger,
            entry_id: &entry_id,
        };
        let result = self.executor.settle(payer, leg, &journal).await;
        match result {
            Ok(receipt) => self.settled(entry_id, receipt),
            Err(error) if matches!(error.kind, SwapFailure::NothingToForward) => {
                tracing::warn!(entry_id = %entry_id, error = %error, "Nothing to forward");
                self.mark(&entry_id, PurchaseStatus::Failed, &error.memo());
                SettlementOutcome::Failed { entry_id, error }
            }
            Err(error) => self.pending(entry_id, leg.swap_tx_hash, error),
        }
    }

    fn settled(&self, entry_id: String, receipt: SwapReceipt) -> SettlementOutcome {
        let memo = format!(
            "delivered {} (swap {}, forward {})",
            receipt.delivered, receipt.swap_tx_hash, receipt.forward_tx_hash
        );
        self.mark(&entry_id, PurchaseStatus::Processed, &memo);
        SettlementOutcome::Settled { entry_id, receipt }
    }

    fn pending(&self, entry_id: String, swap_tx_hash: TxHash, error: SwapError) -> SettlementOutcome {
        tracing::error!(
            entry_id = %entry_id,
            step = %error.step,
            tx_hash = %swap_tx_hash,
            error = %error,
            "Settlement unconfirmed after swap broadcast, entry left queued"
        );
        SettlementOutcome::Pending {
            entry_id,
            swap_tx_hash,
            error,
        }
    }

    fn existing(&self, id: Option<&str>) -> Result<Option<PurchaseLogEntry>, PipelineError> {
        match id {
            Some(id) => Ok(self.ledger.get(id)?),
            None => Ok(None),
        }
    }

    // Funds may already have moved, so ledger errors here are logged only.
    fn mark(&self, entry_id: &str, status: PurchaseStatus, memo: &str) {
        if let Err(e) = self.ledger.update_status(entry_id, status, Some(memo)) {
            tracing::error!(entry_id = %entry_id, %status, error = %e, "Failed to record status");
        }
    }

    fn release(&self, lease: &LockLease) {
        match self.lock.release(lease) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(request_id = %lease.request_id, "Lock was no longer ours at release"),
            Err(e) => tracing::error!(request_id = %lease.request_id, error = %e, "Lock release failed"),
        }
    }
}

fn recorded_progress(entry: &PurchaseLogEntry) -> Result<RecordedProgress, String> {
    let payer = Address::from_str(&entry.payer).map_err(|e| format!("payer: {e}"))?;
    let swap_tx_hash = entry
        .swap_tx_hash
        .as_deref()
        .ok_or("missing swap hash")?
        .parse::<TxHash>()
        .map_err(|e| format!("swap hash: {e}"))?;
    let quoted_output = parse_units(entry.quoted_output.as_deref(), "quoted output")?;

    // A recorded forward that cannot be read must not turn into a second one.
    let forward = match entry.forward_tx_hash.as_deref() {
        Some(raw) => Some(ForwardTransfer {
            tx_hash: raw.parse::<TxHash>().map_err(|e| format!("forward hash: {e}"))?,
            amount: parse_units(entry.forwarded_amount.as_deref(), "forwarded amount")?,
        }),
        None => None,
    };

    Ok(RecordedProgress {
        payer,
        leg: SwapLeg {
            swap_tx_hash,
            quoted_output,
        },
        forward,
    })
}

fn parse_units(raw: Option<&str>, what: &str) -> Result<U256, String> {
    let raw = raw.ok_or_else(|| format!("missing {what}"))?;
    U256::from_str_radix(raw, 10).map_err(|_| format!("{what}: {raw:?}"))
}
