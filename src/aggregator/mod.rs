// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Liquidity aggregator integration.
//!
//! The swap executor only needs two calls: quote a route for an exact input
//! and turn that route into router calldata. [`KyberSwapClient`] implements
//! them against a KyberSwap-style HTTP API.

mod kyberswap;

use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;

pub use kyberswap::KyberSwapClient;

/// Aggregator endpoint settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub host: String,
    /// Chain slug in the URL path, e.g. `base`.
    pub chain: String,
    /// Sent as `X-Client-Id` and as the `source` parameter.
    pub client_id: String,
    pub timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            host: "https://aggregator-api.kyberswap.com".to_string(),
            chain: "base".to_string(),
            client_id: "settlement-facilitator".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// A quoted route. `summary` is opaque and handed back verbatim to build.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapRoute {
    pub summary: serde_json::Value,
    pub amount_in: U256,
    /// Quoted output in the output token's atomic units.
    pub amount_out: U256,
}

/// Router call produced from a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSwap {
    pub router: Address,
    pub calldata: Bytes,
    /// Native value to attach (zero for ERC-20 input).
    pub value: U256,
}

/// Parameters for encoding a swap.
#[derive(Debug, Clone, Copy)]
pub struct BuildParams {
    pub sender: Address,
    pub recipient: Address,
    pub slippage_bps: u16,
    /// Validity window from now.
    pub deadline: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("no viable route: {0}")]
    NoRoute(String),

    #[error("aggregator request failed: {0}")]
    Request(String),

    #[error("aggregator returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("aggregator error code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("aggregator response was invalid: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait LiquidityAggregator: Send + Sync {
    /// Best route for exactly `amount_in` of `token_in`.
    async fn quote_route(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        slippage_bps: u16,
    ) -> Result<SwapRoute, AggregatorError>;

    async fn build_transaction(
        &self,
        route: &SwapRoute,
        params: BuildParams,
    ) -> Result<EncodedSwap, AggregatorError>;
}
