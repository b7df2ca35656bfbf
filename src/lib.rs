// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settlement Facilitator - Stablecoin to Reward-Token Settlement Service
//!
//! Accepts a stablecoin payment intent, swaps it into the reward token through
//! a liquidity aggregator and forwards the proceeds to the payer. At most one
//! settlement executes at a time across all instances sharing a lock store.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `rate_limit` - Per-wallet and per-IP admission control
//! - `lock` - Signed distributed executor lock
//! - `ledger` - Append-only purchase ledger
//! - `storage` - redb or filesystem backend selection
//! - `swap` - Aggregator swap and forward state machine
//! - `pipeline` - Sequencing, idempotency and resume
//! - `recovery` - Background resume of interrupted settlements
//! - `blockchain` / `aggregator` - EVM and aggregator clients

pub mod aggregator;
pub mod api;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod pipeline;
pub mod rate_limit;
pub mod recovery;
pub mod state;
pub mod storage;
pub mod swap;
