// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory chain and aggregator doubles for executor, pipeline and API tests.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;

use crate::aggregator::{AggregatorError, BuildParams, EncodedSwap, LiquidityAggregator, SwapRoute};
use crate::blockchain::{ChainError, SettlementChain, TxReceipt};

use super::{SwapConfig, SwapJournal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxKind {
    Approve,
    Swap,
    Transfer,
}

#[derive(Default)]
struct ChainState {
    /// (token, owner) → balance
    balances: HashMap<(Address, Address), U256>,
    /// spender → stablecoin allowance granted by the facilitator
    allowances: HashMap<Address, U256>,
    /// Every broadcast transaction and the receipt it will resolve to.
    receipts: HashMap<TxHash, (TxKind, TxReceipt)>,
    swap_output: U256,
    swap_reverts: bool,
    swap_receipt_delay: Duration,
    transfers_fail: bool,
    forward_receipts_lost: bool,
    calls: Vec<String>,
    nonce: u8,
}

/// Ledger of balances that reacts to approve, swap and transfer.
pub(crate) struct MockChain {
    facilitator: Address,
    stablecoin: Address,
    reward_token: Address,
    router: Address,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn swap_config() -> SwapConfig {
        SwapConfig {
            stablecoin: Address::from_str(SwapConfig::BASE_USDC).unwrap(),
            reward_token: Address::repeat_byte(0x70),
            router: Address::from_str(SwapConfig::DEFAULT_ROUTER).unwrap(),
            slippage_bps: SwapConfig::DEFAULT_SLIPPAGE_BPS,
            deadline: Duration::from_secs(1200),
        }
    }

    pub fn payer() -> Address {
        Address::repeat_byte(0x11)
    }

    /// Facilitator holding `stable` units of the stablecoin.
    pub fn funded(stable: U256) -> Self {
        let config = Self::swap_config();
        let chain = Self {
            facilitator: Address::repeat_byte(0xfa),
            stablecoin: config.stablecoin,
            reward_token: config.reward_token,
            router: config.router,
            state: Mutex::new(ChainState::default()),
        };
        chain.state().balances.insert((chain.stablecoin, chain.facilitator), stable);
        chain
    }

    pub fn facilitator(&self) -> Address {
        self.facilitator
    }

    /// Reward tokens credited to the facilitator by the next swaps.
    pub fn on_swap(&self, output: U256) {
        self.state().swap_output = output;
    }

    pub fn revert_swaps(&self) {
        self.state().swap_reverts = true;
    }

    /// Swap receipts arrive only after `delay`.
    pub fn delay_swap_receipts(&self, delay: Duration) {
        self.state().swap_receipt_delay = delay;
    }

    /// Make forwarding transfers fail at the RPC layer before broadcast.
    pub fn fail_transfers(&self, fail: bool) {
        self.state().transfers_fail = fail;
    }

    /// Transfers still go through but waiting for their receipt fails.
    pub fn lose_forward_receipts(&self, lost: bool) {
        self.state().forward_receipts_lost = lost;
    }

    /// Register a mined swap that happened outside this double.
    pub fn seed_swap(&self, tx_hash: TxHash) {
        let receipt = TxReceipt {
            tx_hash,
            block_number: 99,
            gas_used: 150_000,
            success: true,
        };
        self.state().receipts.insert(tx_hash, (TxKind::Swap, receipt));
    }

    pub fn approve_router(&self, amount: U256) {
        self.state().allowances.insert(self.router, amount);
    }

    pub fn set_reward_balance(&self, owner: Address, amount: U256) {
        self.state().balances.insert((self.reward_token, owner), amount);
    }

    pub fn reward_balance(&self, owner: Address) -> U256 {
        self.balance(self.reward_token, owner)
    }

    pub fn stable_balance(&self, owner: Address) -> U256 {
        self.balance(self.stablecoin, owner)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }

    fn balance(&self, token: Address, owner: Address) -> U256 {
        self.state()
            .balances
            .get(&(token, owner))
            .copied()
            .unwrap_or_default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    /// Record a broadcast and the receipt it resolves to.
    fn mine(state: &mut ChainState, kind: TxKind, success: bool) -> TxHash {
        state.nonce += 1;
        let tx_hash = TxHash::with_last_byte(state.nonce);
        let receipt = TxReceipt {
            tx_hash,
            block_number: 100 + u64::from(state.nonce),
            gas_used: 21_000,
            success,
        };
        state.receipts.insert(tx_hash, (kind, receipt));
        tx_hash
    }
}

#[async_trait]
impl SettlementChain for MockChain {
    fn facilitator_address(&self) -> Address {
        self.facilitator
    }

    async fn allowance(&self, _token: Address, spender: Address) -> Result<U256, ChainError> {
        Ok(self
            .state()
            .allowances
            .get(&spender)
            .copied()
            .unwrap_or_default())
    }

    async fn approve(
        &self,
        _token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxReceipt, ChainError> {
        let mut state = self.state();
        state.calls.push("approve".to_string());
        state.allowances.insert(spender, amount);
        let tx_hash = Self::mine(&mut state, TxKind::Approve, true);
        Ok(state.receipts[&tx_hash].1.clone())
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        Ok(self.balance(token, owner))
    }

    async fn send_transfer(
        &self,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<TxHash, ChainError> {
        let mut state = self.state();
        state.calls.push("transfer".to_string());
        if state.transfers_fail {
            return Err(ChainError::RpcError("connection reset".to_string()));
        }
        let from = state.balances.entry((token, self.facilitator)).or_default();
        if *from < amount {
            return Err(ChainError::TransactionFailed("insufficient balance".to_string()));
        }
        *from -= amount;
        *state.balances.entry((token, to)).or_default() += amount;
        Ok(Self::mine(&mut state, TxKind::Transfer, true))
    }

    async fn send_call(
        &self,
        _to: Address,
        _calldata: Bytes,
        _value: U256,
    ) -> Result<TxHash, ChainError> {
        let mut state = self.state();
        state.calls.push("swap".to_string());
        if state.swap_reverts {
            return Ok(Self::mine(&mut state, TxKind::Swap, false));
        }

        // The mock swap spends the whole stablecoin balance.
        state.balances.insert((self.stablecoin, self.facilitator), U256::ZERO);
        let output = state.swap_output;
        *state
            .balances
            .entry((self.reward_token, self.facilitator))
            .or_default() += output;
        Ok(Self::mine(&mut state, TxKind::Swap, true))
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, ChainError> {
        let (delay, result) = {
            let state = self.state();
            match state.receipts.get(&tx_hash) {
                Some((TxKind::Transfer, _)) if state.forward_receipts_lost => (
                    Duration::ZERO,
                    Err(ChainError::RpcError(format!("receipt for {tx_hash} timed out"))),
                ),
                Some((TxKind::Swap, receipt)) => (state.swap_receipt_delay, Ok(receipt.clone())),
                Some((_, receipt)) => (Duration::ZERO, Ok(receipt.clone())),
                None => (
                    Duration::ZERO,
                    Err(ChainError::RpcError(format!("unknown transaction {tx_hash}"))),
                ),
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// Journal that remembers every hash it is handed.
#[derive(Default)]
pub(crate) struct RecordingJournal {
    pub swaps: Mutex<Vec<(TxHash, U256)>>,
    pub forwards: Mutex<Vec<(TxHash, U256)>>,
}

impl SwapJournal for RecordingJournal {
    fn swap_submitted(&self, tx_hash: TxHash, quoted_output: U256) {
        self.swaps.lock().unwrap().push((tx_hash, quoted_output));
    }

    fn forward_submitted(&self, tx_hash: TxHash, amount: U256) {
        self.forwards.lock().unwrap().push((tx_hash, amount));
    }
}

/// Aggregator that quotes a fixed output, or never finds a route.
pub(crate) struct MockAggregator {
    amount_out: Option<U256>,
    router: Address,
    quotes: AtomicUsize,
    builds: AtomicUsize,
}

impl MockAggregator {
    pub fn quoting(amount_out: U256) -> Self {
        Self {
            amount_out: Some(amount_out),
            router: MockChain::swap_config().router,
            quotes: AtomicUsize::new(0),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn no_route() -> Self {
        Self {
            amount_out: None,
            ..Self::quoting(U256::ZERO)
        }
    }

    pub fn with_router(mut self, router: Address) -> Self {
        self.router = router;
        self
    }

    pub fn quotes(&self) -> usize {
        self.quotes.load(Ordering::SeqCst)
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiquidityAggregator for MockAggregator {
    async fn quote_route(
        &self,
        _token_in: Address,
        _token_out: Address,
        amount_in: U256,
        _slippage_bps: u16,
    ) -> Result<SwapRoute, AggregatorError> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        match self.amount_out {
            Some(amount_out) => Ok(SwapRoute {
                summary: serde_json::json!({
                    "amountIn": amount_in.to_string(),
                    "amountOut": amount_out.to_string(),
                }),
                amount_in,
                amount_out,
            }),
            None => Err(AggregatorError::NoRoute("route not found".to_string())),
        }
    }

    async fn build_transaction(
        &self,
        _route: &SwapRoute,
        _params: BuildParams,
    ) -> Result<EncodedSwap, AggregatorError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(EncodedSwap {
            router: self.router,
            calldata: Bytes::from_static(&[0xe2, 0x1f, 0xd0, 0xe9]),
            value: U256::ZERO,
        })
    }
}
