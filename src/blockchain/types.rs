// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and constants.

use alloy::primitives::{TxHash, U256};

/// EVM network configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Network name for display
    pub name: String,
    /// Chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Block explorer URL
    pub explorer_url: String,
}

impl Default for ChainConfig {
    /// Base mainnet.
    fn default() -> Self {
        Self {
            name: "Base".to_string(),
            chain_id: 8453,
            rpc_url: "https://mainnet.base.org".to_string(),
            explorer_url: "https://basescan.org".to_string(),
        }
    }
}

impl ChainConfig {
    pub fn tx_url(&self, tx_hash: &TxHash) -> String {
        format!("{}/tx/{tx_hash}", self.explorer_url.trim_end_matches('/'))
    }
}

/// Transaction receipt after confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    /// Block number where transaction was included
    pub block_number: u64,
    /// Gas actually used
    pub gas_used: u64,
    /// Whether the transaction was successful
    pub success: bool,
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Contract error: {0}")]
    ContractError(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Chain id mismatch: configured {configured}, node reports {reported}")]
    ChainMismatch { configured: u64, reported: u64 },
}

/// Parse a human-readable amount into the token's smallest unit.
///
/// `"1.5"` with 6 decimals is `1_500_000`. More fractional digits than
/// `decimals` is an error, not a rounding.
pub fn parse_amount(amount: &str, decimals: u8) -> Result<U256, ChainError> {
    let amount = amount.trim();
    let (whole, fraction) = match amount.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (amount, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(ChainError::InvalidAmount("empty amount".to_string()));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(ChainError::InvalidAmount(format!("not a decimal number: {amount}")));
    }
    if fraction.len() > decimals as usize {
        return Err(ChainError::InvalidAmount(format!(
            "too many decimal places (max {decimals})"
        )));
    }

    let padded = format!("{whole}{fraction:0<width$}", width = decimals as usize);
    U256::from_str_radix(&padded, 10)
        .map_err(|e| ChainError::InvalidAmount(e.to_string()))
}
