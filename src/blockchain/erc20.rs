// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ERC-20 token contract interactions.

use alloy::{
    primitives::{Address, U256},
    providers::Provider,
    sol,
};

use super::types::ChainError;

// The subset of the ERC-20 interface the settlement flow touches.
sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// Read-only ERC-20 contract wrapper.
pub struct Erc20Contract<P> {
    contract: IERC20::IERC20Instance<P>,
}

impl<P: Provider + Clone> Erc20Contract<P> {
    pub fn new(provider: &P, address: Address) -> Self {
        Self {
            contract: IERC20::new(address, provider.clone()),
        }
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256, ChainError> {
        self.contract
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| ChainError::ContractError(format!("balanceOf: {e}")))
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, ChainError> {
        self.contract
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| ChainError::ContractError(format!("allowance: {e}")))
    }
}
