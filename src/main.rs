// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `xchain-enclave`: trusted core of an X-Chain node.
//!
//! Startup order matters: the manifest is verified against the running
//! enclave before any of its values are read, and the oracle has read the
//! contracts before any peer can be admitted.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use xchain_sgx_core::attestation::dcap::{CollateralCache, PcsCollateralFetcher};
use xchain_sgx_core::attestation::{
    Attest, Attestor, AttestorLocal, DcapVerifier, LibOsAttestor, MeasurementPolicy, RaTlsNativeVerifier, Verifier,
    VerifierOptions,
};
use xchain_sgx_core::blockchain::ChainClient;
use xchain_sgx_core::clock::{system_clock, Clock};
use xchain_sgx_core::config::{
    self, ConfigError, ConfigLayer, CoreConfig, DEFAULT_MANIFEST_PATH, GRAMINE_ENCRYPTED_PATHS_ENV,
    LOG_FORMAT_ENV, XCHAIN_COLLATERAL_CACHE_ENV, XCHAIN_MANIFEST_ENV, XCHAIN_PCS_API_KEY_ENV,
    XCHAIN_PCS_URL_ENV, XCHAIN_RPC_URL_ENV,
};
use xchain_sgx_core::device::{AttestationDevice, GramineDevice, MockDevice, MockIdentity, DEFAULT_DEVICE_ROOT};
use xchain_sgx_core::error::{CoreError, CoreResult};
use xchain_sgx_core::flavor::BuildFlavor;
use xchain_sgx_core::manifest::verify_manifest_and_load;
use xchain_sgx_core::oracle::{ContractConfigSource, SecurityConfigOracle};
use xchain_sgx_core::primitives::sha256;
use xchain_sgx_core::quote::Quote;
use xchain_sgx_core::storage::EncryptedStore;
use xchain_sgx_core::sync::{AutoMigrationManager, SyncManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VerifierKind {
    /// Full DCAP verification against Intel PCS collateral.
    Dcap,
    /// The library OS already checked the chain during the TLS handshake.
    RatlsNative,
    /// Parse and whitelist only. `testenv` builds.
    Mock,
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signed manifest of the running enclave (`<manifest>.sig` next to it)
    #[arg(long, env = XCHAIN_MANIFEST_ENV, default_value = DEFAULT_MANIFEST_PATH)]
    manifest: PathBuf,

    /// Library-OS attestation device directory
    #[arg(long, default_value = DEFAULT_DEVICE_ROOT)]
    device_root: PathBuf,

    /// Synthesize quotes instead of opening the attestation device. `testenv` builds.
    #[arg(long)]
    mock_device: bool,

    #[arg(long, value_enum, default_value_t = VerifierKind::Dcap)]
    verifier: VerifierKind,

    /// Use the library OS's RA-TLS certificate instead of minting one
    #[arg(long, requires = "ratls_key")]
    ratls_cert: Option<PathBuf>,

    #[arg(long, requires = "ratls_cert")]
    ratls_key: Option<PathBuf>,

    #[arg(long, env = XCHAIN_RPC_URL_ENV)]
    rpc_url: Option<String>,

    #[arg(long, env = XCHAIN_PCS_URL_ENV)]
    pcs_url: Option<String>,

    #[arg(long, env = XCHAIN_PCS_API_KEY_ENV, hide_env_values = true)]
    pcs_api_key: Option<String>,

    #[arg(long, env = XCHAIN_COLLATERAL_CACHE_ENV)]
    collateral_cache: Option<PathBuf>,

    #[arg(long)]
    encrypted_path: Option<PathBuf>,

    /// Block height after which key migration starts
    #[arg(long)]
    upgrade_complete_block: Option<u64>,

    #[arg(long)]
    refresh_secs: Option<u64>,

    #[arg(long)]
    heartbeat_secs: Option<u64>,

    #[arg(long)]
    migration_secs: Option<u64>,

    /// Require MRENCLAVE whitelisting even when the contract list is empty
    #[arg(long)]
    admission_strict: bool,

    /// Take the first TCB level instead of comparing component SVNs
    #[arg(long)]
    permissive_tcb_match: bool,
}

impl Args {
    fn config_layer(&self) -> ConfigLayer {
        let secs = |v: Option<u64>| v.map(Duration::from_secs);
        ConfigLayer {
            encrypted_path: self.encrypted_path.clone(),
            collateral_cache_dir: self.collateral_cache.clone(),
            rpc_url: self.rpc_url.clone(),
            pcs_base_url: self.pcs_url.clone(),
            pcs_api_key: self.pcs_api_key.clone(),
            refresh_interval: secs(self.refresh_secs),
            heartbeat_interval: secs(self.heartbeat_secs),
            migration_interval: secs(self.migration_secs),
            upgrade_complete_block: self.upgrade_complete_block,
            admission_strict: self.admission_strict.then_some(true),
            ..ConfigLayer::default()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            e.log();
            ExitCode::FAILURE
        }
    }
}

fn open_device(root: &Path, mock: bool) -> CoreResult<Box<dyn AttestationDevice>> {
    if !mock {
        return Ok(Box::new(GramineDevice::open(root)?));
    }
    if !cfg!(feature = "testenv") {
        return Err(testenv_only("mock_device"));
    }
    warn!(component = "attestation", "Using synthesized quotes; no SGX device");
    Ok(Box::new(MockDevice::new(MockIdentity::default())?))
}

fn testenv_only(field: &'static str) -> CoreError {
    ConfigError::Invalid {
        field,
        reason: "only available in testenv builds".into(),
    }
    .into()
}

async fn run(args: Args) -> CoreResult<()> {
    let flavor = BuildFlavor::CURRENT;
    let clock = system_clock();
    info!(flavor = flavor.as_str(), "Starting X-Chain enclave core");

    let device = open_device(&args.device_root, args.mock_device)?;
    let manifest = verify_manifest_and_load(&args.manifest, device.as_ref())?;
    let manifest_layer = ConfigLayer::from_manifest(&manifest);
    let cli_layer = args.config_layer();

    // The RPC endpoint is needed before the on-chain layer can be read.
    let bootstrap = config::merge(&manifest_layer, &ConfigLayer::default(), &cli_layer)?;
    let chain = Arc::new(ChainClient::new(&bootstrap.rpc_url)?);
    let source = ContractConfigSource::from_manifest(&manifest, Arc::clone(&chain))?;
    let node_admission_strict = [&manifest_layer, &cli_layer]
        .iter()
        .any(|layer| layer.admission_strict == Some(true));
    let oracle = Arc::new(
        SecurityConfigOracle::new(Arc::new(source)).with_node_admission_strict(node_admission_strict),
    );
    let snapshot = oracle.init_from_contract().await?;

    let config = config::merge(&manifest_layer, &ConfigLayer::from_on_chain(&snapshot), &cli_layer)?;
    if node_admission_strict && !snapshot.admission_strict {
        info!(component = "config", "Node admission policy is stricter than the contract; keeping it strict");
    }
    info!(
        component = "config",
        node_type = %config.node_type,
        rpc_url = %config.rpc_url,
        encrypted_path = %config.encrypted_path.display(),
        upgrade_complete_block = config.upgrade_complete_block,
        "Configuration merged"
    );

    let attestor = build_attestor(&args, device, Arc::clone(&clock))?;
    let certificate = attestor.generate_certificate()?;
    let local_mr_enclave = Quote::parse(certificate.quote())?.mr_enclave();
    info!(
        component = "attestation",
        attestor = attestor.variant(),
        mr_enclave = %local_mr_enclave,
        "Node certificate ready"
    );

    let policy: Arc<dyn MeasurementPolicy> = oracle.clone();
    let options = VerifierOptions {
        allow_outdated_tcb: config.allow_outdated_tcb,
        permissive_tcb_match: args.permissive_tcb_match,
        flavor,
    };
    let verifier = build_verifier(args.verifier, &config, Arc::clone(&policy), Arc::clone(&clock), options)?;

    let store = EncryptedStore::open(&config.encrypted_path, manifest.env(GRAMINE_ENCRYPTED_PATHS_ENV))?;
    store.purge_expired(clock.unix_now().max(0) as u64)?;

    let sync = Arc::new(SyncManager::new(
        sha256(attestor.identity().public_key_raw()),
        local_mr_enclave,
        Arc::clone(attestor.identity()),
        Arc::new(verifier),
        policy,
        Arc::new(store),
        Arc::clone(&clock),
    ));
    let migration = Arc::new(AutoMigrationManager::new(
        Arc::clone(&sync),
        chain,
        Arc::clone(&clock),
        config.upgrade_complete_block,
    ));

    let shutdown = CancellationToken::new();
    let tasks = [
        oracle.refresh_periodic(config.refresh_interval, shutdown.clone()),
        sync.start_heartbeat(config.heartbeat_interval, shutdown.clone()),
        migration.start(config.migration_interval, shutdown.clone()),
    ];
    info!(peer_id = %hex::encode(sync.local_peer_id()), "Enclave core running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown requested");
    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    info!("Enclave core stopped");
    Ok(())
}

fn build_attestor(args: &Args, device: Box<dyn AttestationDevice>, clock: Arc<dyn Clock>) -> CoreResult<Attestor> {
    if let (Some(cert), Some(key)) = (&args.ratls_cert, &args.ratls_key) {
        return Ok(Attestor::LibOsBacked(LibOsAttestor::load(device, cert, key)?));
    }
    let local = AttestorLocal::new(device, clock)?;
    Ok(if args.mock_device {
        Attestor::Mock(local)
    } else {
        Attestor::Local(local)
    })
}

fn build_verifier(
    kind: VerifierKind,
    config: &CoreConfig,
    policy: Arc<dyn MeasurementPolicy>,
    clock: Arc<dyn Clock>,
    options: VerifierOptions,
) -> CoreResult<Verifier> {
    let verifier = match kind {
        VerifierKind::Dcap => {
            let fetcher =
                PcsCollateralFetcher::new(config.pcs_base_url.clone(), config.pcs_api_key.clone(), config.http_timeout)?
                    .with_cache(CollateralCache::new(config.collateral_cache_dir.clone()))
                    .with_clock(Arc::clone(&clock));
            Verifier::Dcap(DcapVerifier::new(policy, Arc::new(fetcher), clock).with_options(options))
        }
        VerifierKind::RatlsNative => Verifier::RaTlsNative(RaTlsNativeVerifier::new(policy, clock).with_options(options)),
        #[cfg(feature = "testenv")]
        VerifierKind::Mock => Verifier::Mock(xchain_sgx_core::attestation::MockVerifier::new(policy, options)),
        #[cfg(not(feature = "testenv"))]
        VerifierKind::Mock => return Err(testenv_only("verifier")),
    };
    info!(component = "attestation", verifier = verifier.variant(), "Verifier ready");
    Ok(verifier)
}
