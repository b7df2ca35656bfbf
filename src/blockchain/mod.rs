// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain integration for the facilitator account.
//!
//! This module provides:
//! - ERC-20 balance and allowance reads
//! - Approvals, transfers and arbitrary router calls, each awaited to a receipt
//! - Facilitator key loading (hex or PEM)

pub mod client;
pub mod erc20;
pub mod signing;
pub mod types;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;

pub use client::EvmChainClient;
pub use types::*;

/// Chain access for the facilitator account.
///
/// Writes that move value to third parties are split into a broadcast that
/// returns the transaction hash and a separate receipt wait, so the hash can
/// be journaled before the outcome is known.
#[async_trait]
pub trait SettlementChain: Send + Sync {
    /// Account that holds stablecoin, signs swaps and forwards proceeds.
    fn facilitator_address(&self) -> Address;

    /// Allowance the facilitator granted `spender` on `token`.
    async fn allowance(&self, token: Address, spender: Address) -> Result<U256, ChainError>;

    /// Approve and wait for the receipt.
    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxReceipt, ChainError>;

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// Broadcast an ERC-20 transfer. Returns once the node accepted it.
    async fn send_transfer(
        &self,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<TxHash, ChainError>;

    /// Broadcast raw calldata (the aggregator's encoded swap).
    async fn send_call(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
    ) -> Result<TxHash, ChainError>;

    /// Receipt of a broadcast transaction, waiting for inclusion if needed.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, ChainError>;
}
