// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Security-parameter and governance contract bindings.

use alloy::{
    primitives::{Address, FixedBytes},
    providers::Provider,
    sol,
};

use super::client::ChainClientError;
use crate::oracle::SecurityConfig;
use crate::primitives::Measurement;

sol! {
    #[sol(rpc)]
    interface ISecurityConfig {
        function getAllowedMrEnclaves() external view returns (bytes32[] memory);
        function getAllowedMrSigners() external view returns (bytes32[] memory);
        function isvProdId() external view returns (uint16);
        function isvSvn() external view returns (uint16);
        function certNotBefore() external view returns (uint64);
        function certNotAfter() external view returns (uint64);
        function admissionStrict() external view returns (bool);
    }

    #[sol(rpc)]
    interface IGovernance {
        function keyMigrationThreshold() external view returns (uint64);
    }
}

/// Read-only view of the security-parameters contract.
pub struct SecurityConfigContract<P> {
    contract: ISecurityConfig::ISecurityConfigInstance<P>,
}

impl<P: Provider + Clone> SecurityConfigContract<P> {
    pub fn new(provider: &P, address: Address) -> Self {
        Self {
            contract: ISecurityConfig::new(address, provider.clone()),
        }
    }

    /// Read every field except `key_migration_threshold`, which lives in
    /// the governance contract.
    pub async fn read(&self) -> Result<SecurityConfig, ChainClientError> {
        let enclaves = self
            .contract
            .getAllowedMrEnclaves()
            .call()
            .await
            .map_err(contract_error)?;
        let signers = self
            .contract
            .getAllowedMrSigners()
            .call()
            .await
            .map_err(contract_error)?;
        let isv_prod_id = self.contract.isvProdId().call().await.map_err(contract_error)?;
        let isv_svn = self.contract.isvSvn().call().await.map_err(contract_error)?;
        let cert_not_before = self.contract.certNotBefore().call().await.map_err(contract_error)?;
        let cert_not_after = self.contract.certNotAfter().call().await.map_err(contract_error)?;
        let admission_strict = self
            .contract
            .admissionStrict()
            .call()
            .await
            .map_err(contract_error)?;

        Ok(SecurityConfig {
            allowed_mr_enclaves: measurements(&enclaves),
            allowed_mr_signers: measurements(&signers),
            isv_prod_id,
            isv_svn,
            cert_not_before: clamp_timestamp(cert_not_before),
            cert_not_after: clamp_timestamp(cert_not_after),
            key_migration_threshold: 0,
            admission_strict,
        })
    }
}

pub struct GovernanceContract<P> {
    contract: IGovernance::IGovernanceInstance<P>,
}

impl<P: Provider + Clone> GovernanceContract<P> {
    pub fn new(provider: &P, address: Address) -> Self {
        Self {
            contract: IGovernance::new(address, provider.clone()),
        }
    }

    pub async fn key_migration_threshold(&self) -> Result<u64, ChainClientError> {
        self.contract
            .keyMigrationThreshold()
            .call()
            .await
            .map_err(contract_error)
    }
}

fn measurements(words: &[FixedBytes<32>]) -> Vec<Measurement> {
    words.iter().map(|w| Measurement::new(w.0)).collect()
}

fn clamp_timestamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn contract_error(e: alloy::contract::Error) -> ChainClientError {
    ChainClientError::ContractError(e.to_string())
}
