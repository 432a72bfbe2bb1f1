// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-RPC client for the chain that hosts the security contracts.

use std::str::FromStr;

use alloy::{
    network::Ethereum,
    primitives::Address,
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
};
use async_trait::async_trait;

use super::contracts::{GovernanceContract, SecurityConfigContract};
use crate::oracle::SecurityConfig;

/// HTTP provider type (with the default fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Anything that can report the current block height.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainClientError>;
}

pub struct ChainClient {
    rpc_url: String,
    provider: HttpProvider,
}

impl ChainClient {
    pub fn new(rpc_url: &str) -> Result<Self, ChainClientError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainClientError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(url);

        Ok(Self {
            rpc_url: rpc_url.to_owned(),
            provider,
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the current block number.
    pub async fn get_block_number(&self) -> Result<u64, ChainClientError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainClientError::RpcError(e.to_string()))
    }

    /// Read the security parameters published at `address`.
    pub async fn security_config(&self, address: Address) -> Result<SecurityConfig, ChainClientError> {
        SecurityConfigContract::new(&self.provider, address).read().await
    }

    /// Read the key migration threshold from the governance contract.
    pub async fn key_migration_threshold(&self, address: Address) -> Result<u64, ChainClientError> {
        GovernanceContract::new(&self.provider, address)
            .key_migration_threshold()
            .await
    }
}

#[async_trait]
impl BlockSource for ChainClient {
    async fn block_number(&self) -> Result<u64, ChainClientError> {
        self.get_block_number().await
    }
}

/// Parse a `0x`-prefixed contract address.
pub fn parse_address(value: &str) -> Result<Address, ChainClientError> {
    Address::from_str(value.trim()).map_err(|e| ChainClientError::InvalidAddress(e.to_string()))
}

/// Errors that can occur during chain reads.
#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Contract error: {0}")]
    ContractError(String),
}

impl ChainClientError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChainClientError::InvalidRpcUrl(_) => "invalid_rpc_url",
            ChainClientError::InvalidAddress(_) => "invalid_address",
            ChainClientError::RpcError(_) => "rpc_error",
            ChainClientError::ContractError(_) => "contract_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_rpc_url() {
        assert!(matches!(
            ChainClient::new("not a url"),
            Err(ChainClientError::InvalidRpcUrl(_))
        ));
        let client = ChainClient::new("http://127.0.0.1:8545").unwrap();
        assert_eq!(client.rpc_url(), "http://127.0.0.1:8545");
    }

    #[test]
    fn parses_contract_addresses() {
        let addr = parse_address(" 0x00000000000000000000000000000000000000aa ").unwrap();
        assert_eq!(addr.0[19], 0xaa);
        assert!(matches!(
            parse_address("0x1234"),
            Err(ChainClientError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_node_is_an_rpc_error() {
        let client = ChainClient::new("http://127.0.0.1:9").unwrap();
        assert!(matches!(
            client.block_number().await,
            Err(ChainClientError::RpcError(_))
        ));
    }
}
