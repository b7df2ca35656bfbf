// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Swap Executor
//!
//! Converts the facilitator's stablecoin into the reward token and forwards
//! the proceeds to the payer:
//!
//! ```text
//! CheckAllowance → QuoteRoute → BuildTransaction → ExecuteSwap   (swap leg)
//! Reconcile → Forward                                             (settle)
//! ```
//!
//! Nothing is retried here. Every failure is a [`SwapError`] tagged with the
//! step it happened in, and the caller decides what to record. The swap leg
//! and the settle half are exposed separately, and every value-moving
//! transaction is handed to a [`SwapJournal`] the moment it is broadcast.
//! A failure after that point is [`SwapFailure::Unconfirmed`]: the
//! transaction may still land, so the caller must check its receipt again
//! instead of sending a new one.

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};
use serde::Serialize;
use utoipa::ToSchema;

use crate::aggregator::{AggregatorError, BuildParams, LiquidityAggregator};
use crate::blockchain::{ChainError, SettlementChain, TxReceipt};

/// Hard cap on configurable slippage (5%).
pub const MAX_SLIPPAGE_BPS: u16 = 500;

/// Tokens, router and swap bounds.
#[derive(Debug, Clone)]
pub struct SwapConfig {
    pub stablecoin: Address,
    pub reward_token: Address,
    /// Router that receives the stablecoin approval. Built swaps must target it.
    pub router: Address,
    pub slippage_bps: u16,
    pub deadline: Duration,
}

impl SwapConfig {
    pub const DEFAULT_SLIPPAGE_BPS: u16 = 50;
    pub const BASE_USDC: &'static str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
    pub const DEFAULT_ROUTER: &'static str = "0x6131B5fae19EA4f9D964eAc0408E4408b66337b5";
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(1200);
}

/// Executor state machine steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SwapStep {
    CheckAllowance,
    QuoteRoute,
    BuildTransaction,
    ExecuteSwap,
    Reconcile,
    Forward,
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapStep::CheckAllowance => "check_allowance",
            SwapStep::QuoteRoute => "quote_route",
            SwapStep::BuildTransaction => "build_transaction",
            SwapStep::ExecuteSwap => "execute_swap",
            SwapStep::Reconcile => "reconcile",
            SwapStep::Forward => "forward",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SwapFailure {
    #[error("no route")]
    NoRoute(String),

    #[error(transparent)]
    Aggregator(AggregatorError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("transaction {0} reverted")]
    Reverted(TxHash),

    /// Broadcast, but the receipt could not be obtained.
    #[error("transaction {tx_hash} unconfirmed: {source}")]
    Unconfirmed { tx_hash: TxHash, source: ChainError },

    #[error("aggregator built a call to {got}, expected router {expected}")]
    UnexpectedRouter { expected: Address, got: Address },

    #[error("reconciled amount is zero")]
    NothingToForward,
}

impl From<AggregatorError> for SwapFailure {
    fn from(e: AggregatorError) -> Self {
        match e {
            AggregatorError::NoRoute(reason) => SwapFailure::NoRoute(reason),
            other => SwapFailure::Aggregator(other),
        }
    }
}

/// A failure and the step it happened in.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {kind}")]
pub struct SwapError {
    pub step: SwapStep,
    pub kind: SwapFailure,
}

impl SwapError {
    fn at(step: SwapStep) -> impl FnOnce(SwapFailure) -> SwapError {
        move |kind| SwapError { step, kind }
    }

    pub fn is_no_route(&self) -> bool {
        matches!(self.kind, SwapFailure::NoRoute(_))
    }

    pub fn is_reverted(&self) -> bool {
        matches!(self.kind, SwapFailure::Reverted(_))
    }

    /// Hash of a broadcast transaction whose outcome is unknown.
    pub fn unconfirmed_tx(&self) -> Option<TxHash> {
        match &self.kind {
            SwapFailure::Unconfirmed { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }

    /// Short text for the ledger memo.
    pub fn memo(&self) -> String {
        if self.is_no_route() {
            "no route".to_string()
        } else {
            format!("{}: {}", self.step, self.kind)
        }
    }
}

/// Told about each value-moving transaction as soon as it is broadcast.
pub trait SwapJournal: Send + Sync {
    fn swap_submitted(&self, tx_hash: TxHash, quoted_output: U256);

    fn forward_submitted(&self, tx_hash: TxHash, amount: U256);
}

/// A swap transaction and its quoted output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapLeg {
    pub swap_tx_hash: TxHash,
    pub quoted_output: U256,
}

/// A broadcast forwarding transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardTransfer {
    pub tx_hash: TxHash,
    pub amount: U256,
}

/// Result of a complete settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapReceipt {
    pub swap_tx_hash: TxHash,
    pub forward_tx_hash: TxHash,
    /// Reward-token amount delivered to the payer.
    pub delivered: U256,
}

pub struct SwapExecutor {
    chain: Arc<dyn SettlementChain>,
    aggregator: Arc<dyn LiquidityAggregator>,
    config: SwapConfig,
}

impl SwapExecutor {
    pub fn new(
        chain: Arc<dyn SettlementChain>,
        aggregator: Arc<dyn LiquidityAggregator>,
        config: SwapConfig,
    ) -> Self {
        Self {
            chain,
            aggregator,
            config,
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    /// Full run: swap `amount_in` stablecoin and forward the output to `payer`.
    pub async fn execute(
        &self,
        payer: Address,
        amount_in: U256,
        journal: &dyn SwapJournal,
    ) -> Result<SwapReceipt, SwapError> {
        let leg = self.swap_leg(amount_in, journal).await?;
        self.settle(payer, &leg, journal).await
    }

    /// Steps 1 to 4. On success the reward tokens sit with the facilitator.
    pub async fn swap_leg(
        &self,
        amount_in: U256,
        journal: &dyn SwapJournal,
    ) -> Result<SwapLeg, SwapError> {
        self.ensure_allowance(amount_in)
            .await
            .map_err(SwapError::at(SwapStep::CheckAllowance))?;

        let route = self
            .aggregator
            .quote_route(
                self.config.stablecoin,
                self.config.reward_token,
                amount_in,
                self.config.slippage_bps,
            )
            .await
            .map_err(|e| SwapError::at(SwapStep::QuoteRoute)(e.into()))?;
        tracing::info!(
            step = %SwapStep::QuoteRoute,
            amount_in = %amount_in,
            amount_out = %route.amount_out,
            "Route quoted"
        );

        let facilitator = self.chain.facilitator_address();
        let encoded = self
            .aggregator
            .build_transaction(
                &route,
                BuildParams {
                    sender: facilitator,
                    recipient: facilitator,
                    slippage_bps: self.config.slippage_bps,
                    deadline: self.config.deadline,
                },
            )
            .await
            .map_err(|e| SwapError::at(SwapStep::BuildTransaction)(e.into()))?;
        if encoded.router != self.config.router {
            return Err(SwapError {
                step: SwapStep::BuildTransaction,
                kind: SwapFailure::UnexpectedRouter {
                    expected: self.config.router,
                    got: encoded.router,
                },
            });
        }

        let tx_hash = self
            .chain
            .send_call(encoded.router, encoded.calldata, encoded.value)
            .await
            .map_err(|e| SwapError::at(SwapStep::ExecuteSwap)(e.into()))?;
        journal.swap_submitted(tx_hash, route.amount_out);

        let leg = SwapLeg {
            swap_tx_hash: tx_hash,
            quoted_output: route.amount_out,
        };
        self.confirm_swap(&leg).await?;
        Ok(leg)
    }

    /// Wait for the swap receipt. A revert means the stablecoin never left.
    pub async fn confirm_swap(&self, leg: &SwapLeg) -> Result<(), SwapError> {
        let receipt = self.confirm(SwapStep::ExecuteSwap, leg.swap_tx_hash).await?;
        tracing::info!(
            step = %SwapStep::ExecuteSwap,
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            "Swap confirmed"
        );
        Ok(())
    }

    /// Steps 5 and 6: forward `min(balance, quoted)` to `payer`.
    pub async fn settle(
        &self,
        payer: Address,
        leg: &SwapLeg,
        journal: &dyn SwapJournal,
    ) -> Result<SwapReceipt, SwapError> {
        let balance = self
            .chain
            .balance_of(self.config.reward_token, self.chain.facilitator_address())
            .await
            .map_err(|e| SwapError::at(SwapStep::Reconcile)(e.into()))?;

        if balance < leg.quoted_output {
            tracing::warn!(
                step = %SwapStep::Reconcile,
                balance = %balance,
                quoted = %leg.quoted_output,
                "Reward balance below quote, forwarding the lesser amount"
            );
        }
        let amount = balance.min(leg.quoted_output);
        if amount.is_zero() {
            return Err(SwapError {
                step: SwapStep::Reconcile,
                kind: SwapFailure::NothingToForward,
            });
        }

        let tx_hash = self
            .chain
            .send_transfer(self.config.reward_token, payer, amount)
            .await
            .map_err(|e| SwapError::at(SwapStep::Forward)(e.into()))?;
        journal.forward_submitted(tx_hash, amount);

        self.confirm_forward(payer, leg, ForwardTransfer { tx_hash, amount })
            .await
    }

    /// Wait for a broadcast forward. A revert means nothing was delivered.
    pub async fn confirm_forward(
        &self,
        payer: Address,
        leg: &SwapLeg,
        forward: ForwardTransfer,
    ) -> Result<SwapReceipt, SwapError> {
        self.confirm(SwapStep::Forward, forward.tx_hash).await?;
        tracing::info!(
            step = %SwapStep::Forward,
            tx_hash = %forward.tx_hash,
            payer = %payer,
            amount = %forward.amount,
            "Proceeds forwarded"
        );

        Ok(SwapReceipt {
            swap_tx_hash: leg.swap_tx_hash,
            forward_tx_hash: forward.tx_hash,
            delivered: forward.amount,
        })
    }

    async fn confirm(&self, step: SwapStep, tx_hash: TxHash) -> Result<TxReceipt, SwapError> {
        let receipt = self
            .chain
            .wait_for_receipt(tx_hash)
            .await
            .map_err(|source| SwapError {
                step,
                kind: SwapFailure::Unconfirmed { tx_hash, source },
            })?;
        if !receipt.success {
            return Err(SwapError {
                step,
                kind: SwapFailure::Reverted(tx_hash),
            });
        }
        Ok(receipt)
    }

    async fn ensure_allowance(&self, amount_in: U256) -> Result<(), SwapFailure> {
        let allowance = self
            .chain
            .allowance(self.config.stablecoin, self.config.router)
            .await?;
        if allowance >= amount_in {
            return Ok(());
        }

        tracing::info!(
            step = %SwapStep::CheckAllowance,
            allowance = %allowance,
            required = %amount_in,
            "Approving router"
        );
        let receipt = self
            .chain
            .approve(self.config.stablecoin, self.config.router, U256::MAX)
            .await?;
        if !receipt.success {
            return Err(SwapFailure::Reverted(receipt.tx_hash));
        }
        Ok(())
    }
}
