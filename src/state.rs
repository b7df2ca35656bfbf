// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::blockchain::ChainConfig;
use crate::pipeline::SettlementPipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SettlementPipeline>,
    /// Used to build explorer links in responses.
    pub chain: Arc<ChainConfig>,
}

impl AppState {
    pub fn new(pipeline: Arc<SettlementPipeline>, chain: ChainConfig) -> Self {
        Self {
            pipeline,
            chain: Arc::new(chain),
        }
    }
}
