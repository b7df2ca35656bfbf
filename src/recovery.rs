// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Recovery Sweeper
//!
//! Background task that finishes settlements whose swap went out but whose
//! delivery was never confirmed. Every `interval` it calls
//! [`SettlementPipeline::resume_pending`], which takes the executor lock per
//! entry, so a sweep never overlaps a live settlement.
//!
//! Disabled unless `RECOVERY_SWEEP_INTERVAL_SECS` is set.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pipeline::SettlementPipeline;

pub struct RecoverySweeper {
    pipeline: Arc<SettlementPipeline>,
    interval: Duration,
}

impl RecoverySweeper {
    pub fn new(pipeline: Arc<SettlementPipeline>, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Recovery sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Recovery sweeper shutting down");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Recovery sweeper shutting down");
                    return;
                }
            }
        }
    }

    async fn sweep(&self) {
        match self.pipeline.resume_pending().await {
            Ok(summary) if summary.settled + summary.failed + summary.still_pending == 0 => {}
            Ok(summary) => info!(
                settled = summary.settled,
                failed = summary.failed,
                still_pending = summary.still_pending,
                "Recovery sweep finished"
            ),
            Err(e) => warn!(error = %e, "Recovery sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{PurchaseLedger, PurchaseLogEntry, PurchaseStatus};
    use crate::lock::{ExecutorLock, LockConfig};
    use crate::rate_limit::RateLimiter;
    use crate::storage::SettlementDatabase;
    use crate::swap::testing::{MockAggregator, MockChain};
    use crate::swap::SwapExecutor;
    use alloy::primitives::{TxHash, U256};
    use tempfile::TempDir;

    #[tokio::test]
    async fn sweep_forwards_pending_entry_and_stops_on_cancel() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(SettlementDatabase::open(&temp.path().join("recovery.redb")).unwrap());
        let ledger = PurchaseLedger::new(db.clone());
        let chain = Arc::new(MockChain::funded(U256::ZERO));
        chain.set_reward_balance(chain.facilitator(), U256::from(700u64));

        ledger
            .append(PurchaseLogEntry::new(
                "pending-1",
                MockChain::payer().to_string(),
                0.01,
                "10000",
                PurchaseStatus::Queued,
            ))
            .unwrap();
        let swap = TxHash::with_last_byte(3);
        chain.seed_swap(swap);
        ledger
            .record_swap("pending-1", &swap.to_string(), "700")
            .unwrap();

        let pipeline = Arc::new(SettlementPipeline::new(
            Arc::new(RateLimiter::default()),
            Arc::new(ExecutorLock::new(
                db,
                &LockConfig {
                    secret: "recovery-test".to_string(),
                    ..LockConfig::default()
                },
            )),
            ledger.clone(),
            Arc::new(SwapExecutor::new(
                chain.clone(),
                Arc::new(MockAggregator::no_route()),
                MockChain::swap_config(),
            )),
            6,
        ));

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            RecoverySweeper::new(pipeline, Duration::from_secs(3600)).run(shutdown.clone()),
        );

        for _ in 0..100 {
            if ledger.get("pending-1").unwrap().unwrap().status == PurchaseStatus::Processed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(
            ledger.get("pending-1").unwrap().unwrap().status,
            PurchaseStatus::Processed
        );
        assert_eq!(chain.reward_balance(MockChain::payer()), U256::from(700u64));
        assert_eq!(chain.count("swap"), 0);
    }
}
