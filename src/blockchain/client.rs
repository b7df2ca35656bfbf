// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing EVM client for the facilitator account.

use std::time::Duration;

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::{Address, Bytes, TxHash, U256},
    providers::{
        fillers::{
            BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
            WalletFiller,
        },
        Identity, PendingTransactionBuilder, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::SolCall,
};
use async_trait::async_trait;

use super::erc20::{Erc20Contract, IERC20};
use super::types::*;
use super::SettlementChain;

/// Longest wait for a transaction to be included before giving up.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(180);

/// HTTP provider with the recommended fillers and a local wallet.
type WalletProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider<Ethereum>,
>;

/// EVM client that signs as the facilitator.
pub struct EvmChainClient {
    chain: ChainConfig,
    provider: WalletProvider,
    address: Address,
}

impl EvmChainClient {
    /// Build the client. No network access happens here.
    pub fn new(chain: ChainConfig, signer: PrivateKeySigner) -> Result<Self, ChainError> {
        let url: url::Url = chain
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainError::InvalidRpcUrl(e.to_string()))?;

        let address = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url);

        Ok(Self {
            chain,
            provider,
            address,
        })
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    /// Compare the node's chain id with the configured one.
    pub async fn verify_chain_id(&self) -> Result<(), ChainError> {
        let reported = self
            .provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        if reported != self.chain.chain_id {
            return Err(ChainError::ChainMismatch {
                configured: self.chain.chain_id,
                reported,
            });
        }
        Ok(())
    }

    /// Hand a transaction to the node and return its hash.
    async fn broadcast(&self, tx: TransactionRequest) -> Result<TxHash, ChainError> {
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| ChainError::TransactionFailed(format!("Failed to send: {e}")))?;

        let tx_hash = *pending.tx_hash();
        tracing::debug!(
            tx_hash = %tx_hash,
            explorer = %self.chain.tx_url(&tx_hash),
            "Transaction submitted"
        );
        Ok(tx_hash)
    }
}

#[async_trait]
impl SettlementChain for EvmChainClient {
    fn facilitator_address(&self) -> Address {
        self.address
    }

    async fn allowance(&self, token: Address, spender: Address) -> Result<U256, ChainError> {
        Erc20Contract::new(&self.provider, token)
            .allowance(self.address, spender)
            .await
    }

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxReceipt, ChainError> {
        let call = IERC20::approveCall { spender, amount };
        let tx = TransactionRequest::default()
            .to(token)
            .input(call.abi_encode().into());
        let tx_hash = self.broadcast(tx).await?;
        self.wait_for_receipt(tx_hash).await
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        Erc20Contract::new(&self.provider, token)
            .balance_of(owner)
            .await
    }

    async fn send_transfer(
        &self,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<TxHash, ChainError> {
        let call = IERC20::transferCall { to, amount };
        let tx = TransactionRequest::default()
            .to(token)
            .input(call.abi_encode().into());
        self.broadcast(tx).await
    }

    async fn send_call(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
    ) -> Result<TxHash, ChainError> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(calldata.into())
            .value(value);
        self.broadcast(tx).await
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, ChainError> {
        let mined = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ChainError::RpcError(format!("Receipt lookup for {tx_hash}: {e}")))?;

        let receipt = match mined {
            Some(receipt) => receipt,
            None => PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
                .with_timeout(Some(RECEIPT_TIMEOUT))
                .get_receipt()
                .await
                .map_err(|e| {
                    ChainError::RpcError(format!("Failed to get receipt for {tx_hash}: {e}"))
                })?,
        };

        Ok(TxReceipt {
            tx_hash,
            block_number: receipt.block_number.unwrap_or(0),
            gas_used: receipt.gas_used,
            success: receipt.status(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::signing::signer_from_hex;

    const TEST_HEX: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn new_rejects_bad_rpc_url() {
        let chain = ChainConfig {
            rpc_url: "not a url".to_string(),
            ..ChainConfig::default()
        };
        let err = EvmChainClient::new(chain, signer_from_hex(TEST_HEX).unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, ChainError::InvalidRpcUrl(_)));
    }

    #[test]
    fn facilitator_address_comes_from_signer() {
        let signer = signer_from_hex(TEST_HEX).unwrap();
        let expected = signer.address();
        let client = EvmChainClient::new(ChainConfig::default(), signer).unwrap();
        assert_eq!(client.facilitator_address(), expected);
        assert_eq!(client.chain().chain_id, 8453);
    }
}
