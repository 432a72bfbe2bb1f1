// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Security Config Oracle
//!
//! In-memory mirror of the on-chain security parameters.
//!
//! The oracle owns the measurement whitelist. Verifiers hold it as an
//! `Arc<dyn MeasurementPolicy>` and ask on every call, so a refresh is
//! visible to the next verification without re-wiring anything.
//!
//! ## RA-TLS environment
//!
//! `init_from_contract` first clears every `RA_TLS_*` variable, so nothing
//! set before the first contract read can reach the library OS verifier.
//! After a successful read, single-entry whitelists are exported as
//! `RA_TLS_MRENCLAVE` / `RA_TLS_MRSIGNER`; multi-entry lists stay unset and
//! are enforced through the whitelist callbacks instead. A failed read
//! re-exports the last good snapshot, if there is one.
//!
//! ## Admission mode
//!
//! The whitelist is strict when either the contract or the node says so.
//!
//! ## Refresh
//!
//! `refresh_periodic` re-reads the contracts on a fixed interval until the
//! shutdown token fires. Failures are logged and the last good snapshot
//! keeps serving.

pub mod source;
pub mod whitelist;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use source::{ContractConfigSource, SecurityConfigSource, StaticConfigSource};
pub use whitelist::MeasurementWhitelist;

use crate::attestation::MeasurementPolicy;
use crate::config::{
    RA_TLS_CERT_TIMESTAMP_NOT_AFTER_ENV, RA_TLS_CERT_TIMESTAMP_NOT_BEFORE_ENV, RA_TLS_ENV_VARS,
    RA_TLS_ISV_PROD_ID_ENV, RA_TLS_ISV_SVN_ENV, RA_TLS_MRENCLAVE_ENV, RA_TLS_MRSIGNER_ENV,
};
use crate::primitives::{MrEnclave, MrSigner};

/// On-chain security parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    pub allowed_mr_enclaves: Vec<MrEnclave>,
    pub allowed_mr_signers: Vec<MrSigner>,
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    /// Unix seconds; 0 means unset.
    pub cert_not_before: i64,
    pub cert_not_after: i64,
    pub key_migration_threshold: u64,
    pub admission_strict: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_mr_enclaves: Vec::new(),
            allowed_mr_signers: Vec::new(),
            isv_prod_id: 0,
            isv_svn: 0,
            cert_not_before: 0,
            cert_not_after: 0,
            key_migration_threshold: 0,
            admission_strict: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("contract address unset: {0}")]
    ContractAddressUnset(String),

    #[error("contract call failed: {0}")]
    ContractCallFailed(String),
}

impl OracleError {
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::ContractAddressUnset(_) => "contract_address_unset",
            OracleError::ContractCallFailed(_) => "contract_call_failed",
        }
    }
}

pub struct SecurityConfigOracle {
    source: Arc<dyn SecurityConfigSource>,
    whitelist: Arc<MeasurementWhitelist>,
    config: RwLock<SecurityConfig>,
    loaded: AtomicBool,
    node_admission_strict: bool,
    export_ra_tls_env: bool,
}

impl SecurityConfigOracle {
    /// An oracle that has not read the contracts yet: strict admission,
    /// empty lists, so nothing is admitted until the first refresh.
    pub fn new(source: Arc<dyn SecurityConfigSource>) -> Self {
        let config = SecurityConfig::default();
        Self {
            source,
            whitelist: Arc::new(MeasurementWhitelist::new(config.admission_strict)),
            config: RwLock::new(config),
            loaded: AtomicBool::new(false),
            node_admission_strict: false,
            export_ra_tls_env: true,
        }
    }

    /// Keep the whitelist strict even when the contract is not.
    pub fn with_node_admission_strict(mut self, strict: bool) -> Self {
        self.node_admission_strict = strict;
        self
    }

    /// Leave the process `RA_TLS_*` variables alone.
    pub fn without_ra_tls_env(mut self) -> Self {
        self.export_ra_tls_env = false;
        self
    }

    /// Clear `RA_TLS_*`, read both contracts, then publish the new snapshot.
    pub async fn init_from_contract(&self) -> Result<SecurityConfig, OracleError> {
        if self.export_ra_tls_env {
            for name in RA_TLS_ENV_VARS {
                std::env::remove_var(name);
            }
        }

        let config = match self.read_contracts().await {
            Ok(config) => config,
            Err(e) => {
                if self.export_ra_tls_env && self.loaded.load(Ordering::Acquire) {
                    export_ra_tls_env(&self.cached_config());
                }
                return Err(e);
            }
        };

        let admission_strict = config.admission_strict || self.node_admission_strict;
        self.whitelist.replace(
            config.allowed_mr_enclaves.clone(),
            config.allowed_mr_signers.clone(),
            admission_strict,
        );
        if self.export_ra_tls_env {
            export_ra_tls_env(&config);
        }
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.loaded.store(true, Ordering::Release);

        info!(
            component = "oracle",
            mr_enclaves = config.allowed_mr_enclaves.len(),
            mr_signers = config.allowed_mr_signers.len(),
            isv_prod_id = config.isv_prod_id,
            isv_svn = config.isv_svn,
            admission_strict,
            key_migration_threshold = config.key_migration_threshold,
            "Security config loaded from contract"
        );
        Ok(config)
    }

    async fn read_contracts(&self) -> Result<SecurityConfig, OracleError> {
        let mut config = self.source.security_config().await?;
        config.key_migration_threshold = self.source.key_migration_threshold().await?;
        Ok(config)
    }

    /// Spawn the refresh loop.
    pub fn refresh_periodic(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let oracle = Arc::clone(self);
        tokio::spawn(async move { oracle.run_refresh(interval, shutdown).await })
    }

    async fn run_refresh(&self, interval: Duration, shutdown: CancellationToken) {
        info!(
            component = "oracle",
            interval_secs = interval.as_secs(),
            "Security config refresh starting"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown.cancelled() => {
                    info!(component = "oracle", "Security config refresh shutting down");
                    return;
                }
            }
            if let Err(e) = self.init_from_contract().await {
                warn!(component = "oracle", kind = e.kind(), error = %e, "Security config refresh failed; keeping previous snapshot");
            }
        }
    }

    pub fn is_allowed_mr_enclave(&self, m: &MrEnclave) -> bool {
        self.whitelist.is_allowed_mr_enclave(m)
    }

    pub fn is_allowed_mr_signer(&self, m: &MrSigner) -> bool {
        self.whitelist.is_allowed_mr_signer(m)
    }

    /// A copy of the current snapshot.
    pub fn cached_config(&self) -> SecurityConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn whitelist(&self) -> Arc<MeasurementWhitelist> {
        Arc::clone(&self.whitelist)
    }
}

impl MeasurementPolicy for SecurityConfigOracle {
    fn is_allowed_mr_enclave(&self, m: &MrEnclave) -> bool {
        self.whitelist.is_allowed_mr_enclave(m)
    }

    fn is_allowed_mr_signer(&self, m: &MrSigner) -> bool {
        self.whitelist.is_allowed_mr_signer(m)
    }
}

fn export_ra_tls_env(config: &SecurityConfig) {
    if let [only] = config.allowed_mr_enclaves.as_slice() {
        std::env::set_var(RA_TLS_MRENCLAVE_ENV, only.to_hex());
    }
    if let [only] = config.allowed_mr_signers.as_slice() {
        std::env::set_var(RA_TLS_MRSIGNER_ENV, only.to_hex());
    }
    std::env::set_var(RA_TLS_ISV_PROD_ID_ENV, config.isv_prod_id.to_string());
    std::env::set_var(RA_TLS_ISV_SVN_ENV, config.isv_svn.to_string());
    if config.cert_not_before > 0 {
        std::env::set_var(RA_TLS_CERT_TIMESTAMP_NOT_BEFORE_ENV, config.cert_not_before.to_string());
    }
    if config.cert_not_after > 0 {
        std::env::set_var(RA_TLS_CERT_TIMESTAMP_NOT_AFTER_ENV, config.cert_not_after.to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::primitives::Measurement;

    /// Serializes the tests that touch the process environment.
    static ENV: Mutex<()> = Mutex::new(());

    fn clear_ra_tls_env() {
        for name in RA_TLS_ENV_VARS {
            std::env::remove_var(name);
        }
    }

    const A: Measurement = Measurement::new([0xaa; 32]);
    const B: Measurement = Measurement::new([0xbb; 32]);

    fn config(enclaves: Vec<Measurement>) -> SecurityConfig {
        SecurityConfig {
            allowed_mr_enclaves: enclaves,
            isv_prod_id: 3,
            isv_svn: 2,
            key_migration_threshold: 12,
            ..SecurityConfig::default()
        }
    }

    fn oracle(source: &Arc<StaticConfigSource>) -> SecurityConfigOracle {
        SecurityConfigOracle::new(Arc::clone(source) as Arc<dyn SecurityConfigSource>).without_ra_tls_env()
    }

    #[tokio::test]
    async fn nothing_is_admitted_before_first_read() {
        let source = Arc::new(StaticConfigSource::new(config(vec![A])));
        let oracle = oracle(&source);
        assert!(!oracle.is_allowed_mr_enclave(&A));

        let loaded = oracle.init_from_contract().await.unwrap();
        assert_eq!(loaded.key_migration_threshold, 12);
        assert!(oracle.is_allowed_mr_enclave(&A));
        assert!(!oracle.is_allowed_mr_enclave(&B));
    }

    #[tokio::test]
    async fn cached_config_is_a_copy() {
        let source = Arc::new(StaticConfigSource::new(config(vec![A])));
        let oracle = oracle(&source);
        oracle.init_from_contract().await.unwrap();

        let mut copy = oracle.cached_config();
        copy.allowed_mr_enclaves.push(B);
        assert_eq!(oracle.cached_config().allowed_mr_enclaves, vec![A]);
        assert!(!oracle.is_allowed_mr_enclave(&B));
    }

    #[tokio::test]
    async fn failed_read_keeps_previous_snapshot() {
        let source = Arc::new(StaticConfigSource::new(config(vec![A])));
        let oracle = oracle(&source);
        oracle.init_from_contract().await.unwrap();

        source.fail();
        let err = oracle.init_from_contract().await.unwrap_err();
        assert_eq!(err.kind(), "contract_call_failed");
        assert_eq!(oracle.cached_config(), config(vec![A]).with_threshold(12));
        assert!(oracle.is_allowed_mr_enclave(&A));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_refresh_picks_up_changes_and_stops() {
        let source = Arc::new(StaticConfigSource::new(config(vec![A])));
        let oracle = Arc::new(oracle(&source));
        oracle.init_from_contract().await.unwrap();

        let shutdown = CancellationToken::new();
        let task = oracle.refresh_periodic(Duration::from_secs(300), shutdown.clone());

        source.set(config(vec![A, B]));
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(oracle.is_allowed_mr_enclave(&B));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn exports_single_entry_whitelists_to_ra_tls_env() {
        let _env = ENV.lock().unwrap_or_else(PoisonError::into_inner);
        std::env::set_var(RA_TLS_MRSIGNER_ENV, "injected");
        let source = Arc::new(StaticConfigSource::new(SecurityConfig {
            allowed_mr_signers: vec![A, B],
            ..config(vec![A])
        }));
        let oracle = SecurityConfigOracle::new(source);
        oracle.init_from_contract().await.unwrap();

        assert_eq!(std::env::var(RA_TLS_MRENCLAVE_ENV).unwrap(), A.to_hex());
        assert!(std::env::var(RA_TLS_MRSIGNER_ENV).is_err());
        assert_eq!(std::env::var(RA_TLS_ISV_PROD_ID_ENV).unwrap(), "3");
        assert!(std::env::var(RA_TLS_CERT_TIMESTAMP_NOT_AFTER_ENV).is_err());

        clear_ra_tls_env();
    }

    #[tokio::test]
    async fn failed_refresh_keeps_ra_tls_env() {
        let _env = ENV.lock().unwrap_or_else(PoisonError::into_inner);
        let source = Arc::new(StaticConfigSource::new(config(vec![A])));
        let oracle = SecurityConfigOracle::new(Arc::clone(&source) as Arc<dyn SecurityConfigSource>);
        oracle.init_from_contract().await.unwrap();

        source.fail();
        oracle.init_from_contract().await.unwrap_err();
        assert_eq!(std::env::var(RA_TLS_ISV_PROD_ID_ENV).unwrap(), "3");
        assert_eq!(std::env::var(RA_TLS_ISV_SVN_ENV).unwrap(), "2");
        assert_eq!(std::env::var(RA_TLS_MRENCLAVE_ENV).unwrap(), A.to_hex());
        assert_eq!(oracle.cached_config().isv_prod_id, 3);

        clear_ra_tls_env();
    }

    #[tokio::test]
    async fn failed_first_read_leaves_ra_tls_env_cleared() {
        let _env = ENV.lock().unwrap_or_else(PoisonError::into_inner);
        std::env::set_var(RA_TLS_ISV_PROD_ID_ENV, "99");
        let source = Arc::new(StaticConfigSource::new(config(vec![A])));
        source.fail();
        let oracle = SecurityConfigOracle::new(Arc::clone(&source) as Arc<dyn SecurityConfigSource>);

        oracle.init_from_contract().await.unwrap_err();
        assert!(std::env::var(RA_TLS_ISV_PROD_ID_ENV).is_err());
        assert!(!oracle.is_allowed_mr_enclave(&A));

        clear_ra_tls_env();
    }

    #[tokio::test]
    async fn node_can_tighten_contract_admission() {
        let loose = SecurityConfig {
            admission_strict: false,
            ..config(Vec::new())
        };
        let source = Arc::new(StaticConfigSource::new(loose));

        let contract_only = oracle(&source);
        contract_only.init_from_contract().await.unwrap();
        assert!(contract_only.is_allowed_mr_enclave(&A));

        let tightened = oracle(&source).with_node_admission_strict(true);
        let loaded = tightened.init_from_contract().await.unwrap();
        assert!(!loaded.admission_strict);
        assert!(!tightened.is_allowed_mr_enclave(&A));
        assert!(tightened.whitelist().admission_strict());
    }

    impl SecurityConfig {
        fn with_threshold(mut self, threshold: u64) -> Self {
            self.key_migration_threshold = threshold;
            self
        }
    }
}
