// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Where the oracle reads security parameters from.

use std::sync::{Arc, PoisonError, RwLock};

use alloy::primitives::Address;
use async_trait::async_trait;

use super::{OracleError, SecurityConfig};
use crate::blockchain::{parse_address, ChainClient};
use crate::config::{
    GOVERNANCE_CONTRACT_ENV, SECURITY_CONFIG_CONTRACT_ENV, XCHAIN_GOVERNANCE_CONTRACT_ENV,
    XCHAIN_SECURITY_CONFIG_CONTRACT_ENV,
};
use crate::manifest::TrustedManifest;

#[async_trait]
pub trait SecurityConfigSource: Send + Sync {
    /// Everything but `key_migration_threshold`.
    async fn security_config(&self) -> Result<SecurityConfig, OracleError>;

    async fn key_migration_threshold(&self) -> Result<u64, OracleError>;
}

/// Reads the SecurityConfig and Governance contracts over JSON-RPC.
pub struct ContractConfigSource {
    client: Arc<ChainClient>,
    security_config_contract: Address,
    governance_contract: Address,
}

impl ContractConfigSource {
    pub fn new(client: Arc<ChainClient>, security_config_contract: Address, governance_contract: Address) -> Self {
        Self {
            client,
            security_config_contract,
            governance_contract,
        }
    }

    /// Take both contract addresses from the verified manifest environment.
    pub fn from_manifest(manifest: &TrustedManifest, client: Arc<ChainClient>) -> Result<Self, OracleError> {
        let security_config_contract = address_from(
            manifest,
            &[XCHAIN_SECURITY_CONFIG_CONTRACT_ENV, SECURITY_CONFIG_CONTRACT_ENV],
        )?;
        let governance_contract =
            address_from(manifest, &[XCHAIN_GOVERNANCE_CONTRACT_ENV, GOVERNANCE_CONTRACT_ENV])?;
        Ok(Self::new(client, security_config_contract, governance_contract))
    }

    pub fn security_config_contract(&self) -> Address {
        self.security_config_contract
    }

    pub fn governance_contract(&self) -> Address {
        self.governance_contract
    }
}

fn address_from(manifest: &TrustedManifest, keys: &[&'static str]) -> Result<Address, OracleError> {
    let value = manifest
        .env_first(keys)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| OracleError::ContractAddressUnset(format!("{} is not set", keys[0])))?;
    parse_address(value).map_err(|e| OracleError::ContractAddressUnset(format!("{}: {e}", keys[0])))
}

#[async_trait]
impl SecurityConfigSource for ContractConfigSource {
    async fn security_config(&self) -> Result<SecurityConfig, OracleError> {
        self.client
            .security_config(self.security_config_contract)
            .await
            .map_err(|e| OracleError::ContractCallFailed(e.to_string()))
    }

    async fn key_migration_threshold(&self) -> Result<u64, OracleError> {
        self.client
            .key_migration_threshold(self.governance_contract)
            .await
            .map_err(|e| OracleError::ContractCallFailed(e.to_string()))
    }
}

/// A settable in-memory source, for offline nodes and tests.
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    state: RwLock<Option<SecurityConfig>>,
}

impl StaticConfigSource {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            state: RwLock::new(Some(config)),
        }
    }

    pub fn set(&self, config: SecurityConfig) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
    }

    /// Make subsequent reads fail until the next `set`.
    pub fn fail(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn current(&self) -> Result<SecurityConfig, OracleError> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| OracleError::ContractCallFailed("static source unavailable".into()))
    }
}

#[async_trait]
impl SecurityConfigSource for StaticConfigSource {
    async fn security_config(&self) -> Result<SecurityConfig, OracleError> {
        self.current()
    }

    async fn key_migration_threshold(&self) -> Result<u64, OracleError> {
        self.current().map(|c| c.key_migration_threshold)
    }
}
