// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the layered merge that produces
//! the effective [`CoreConfig`].
//!
//! Values are only trusted when they come from the verified manifest
//! (`loader.env`) or from the on-chain security contracts. Command-line and
//! plain process environment values form the lowest-priority layer.
//!
//! ## Environment Variables
//!
//! | Variable | Source | Description | Default |
//! |----------|--------|-------------|---------|
//! | `XCHAIN_MANIFEST` | CLI | Signed manifest of the running enclave | `/gramine/xchain.manifest.sgx` |
//! | `XCHAIN_ENCRYPTED_PATH` | manifest | Encrypted secret directory | `/data/secrets` |
//! | `XCHAIN_SECRET_PATH` | manifest | Alias of the above, older manifests | |
//! | `XCHAIN_SECURITY_CONFIG_CONTRACT` | manifest | SecurityConfig contract address | Required |
//! | `SECURITY_CONFIG_CONTRACT` | manifest | Fallback name | |
//! | `XCHAIN_GOVERNANCE_CONTRACT` | manifest | Governance contract address | Required |
//! | `GOVERNANCE_CONTRACT` | manifest | Fallback name | |
//! | `NODE_TYPE` | manifest | Node role label | `validator` |
//! | `GRAMINE_ENCRYPTED_PATHS` | manifest | Comma-separated encrypted mounts | |
//! | `XCHAIN_RPC_URL` | manifest / CLI | JSON-RPC endpoint | `http://127.0.0.1:8545` |
//! | `XCHAIN_PCS_URL` | manifest / CLI | Intel PCS base URL | Intel PCS v4 |
//! | `XCHAIN_PCS_API_KEY` | CLI | `Ocp-Apim-Subscription-Key` value | none |
//! | `XCHAIN_COLLATERAL_CACHE` | manifest / CLI | Collateral cache directory | `/data/collateral` |
//! | `RA_TLS_MRENCLAVE`, `RA_TLS_MRSIGNER`, `RA_TLS_ISV_PROD_ID`, `RA_TLS_ISV_SVN`, `RA_TLS_CERT_TIMESTAMP_NOT_BEFORE`, `RA_TLS_CERT_TIMESTAMP_NOT_AFTER` | oracle | RA-TLS policy for the library OS | cleared at start |
//! | `LOG_FORMAT` | process | `json` or `pretty` | `pretty` |
//! | `RUST_LOG` | process | Log filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::manifest::TrustedManifest;
use crate::oracle::SecurityConfig;
use crate::primitives::Measurement;

pub const XCHAIN_MANIFEST_ENV: &str = "XCHAIN_MANIFEST";
pub const XCHAIN_ENCRYPTED_PATH_ENV: &str = "XCHAIN_ENCRYPTED_PATH";
pub const XCHAIN_SECRET_PATH_ENV: &str = "XCHAIN_SECRET_PATH";
pub const XCHAIN_SECURITY_CONFIG_CONTRACT_ENV: &str = "XCHAIN_SECURITY_CONFIG_CONTRACT";
pub const SECURITY_CONFIG_CONTRACT_ENV: &str = "SECURITY_CONFIG_CONTRACT";
pub const XCHAIN_GOVERNANCE_CONTRACT_ENV: &str = "XCHAIN_GOVERNANCE_CONTRACT";
pub const GOVERNANCE_CONTRACT_ENV: &str = "GOVERNANCE_CONTRACT";
pub const NODE_TYPE_ENV: &str = "NODE_TYPE";

/// Comma-separated list of directories Gramine mounts as encrypted files.
pub const GRAMINE_ENCRYPTED_PATHS_ENV: &str = "GRAMINE_ENCRYPTED_PATHS";

/// Per-directory marker written by the manifest build for encrypted mounts.
pub const ENCRYPTED_FS_MARKER: &str = ".gramine_encrypted_fs";

pub const XCHAIN_RPC_URL_ENV: &str = "XCHAIN_RPC_URL";
pub const XCHAIN_PCS_URL_ENV: &str = "XCHAIN_PCS_URL";
pub const XCHAIN_PCS_API_KEY_ENV: &str = "XCHAIN_PCS_API_KEY";
pub const XCHAIN_COLLATERAL_CACHE_ENV: &str = "XCHAIN_COLLATERAL_CACHE";

pub const RA_TLS_MRENCLAVE_ENV: &str = "RA_TLS_MRENCLAVE";
pub const RA_TLS_MRSIGNER_ENV: &str = "RA_TLS_MRSIGNER";
pub const RA_TLS_ISV_PROD_ID_ENV: &str = "RA_TLS_ISV_PROD_ID";
pub const RA_TLS_ISV_SVN_ENV: &str = "RA_TLS_ISV_SVN";
pub const RA_TLS_CERT_TIMESTAMP_NOT_BEFORE_ENV: &str = "RA_TLS_CERT_TIMESTAMP_NOT_BEFORE";
pub const RA_TLS_CERT_TIMESTAMP_NOT_AFTER_ENV: &str = "RA_TLS_CERT_TIMESTAMP_NOT_AFTER";

/// The RA-TLS policy variables cleared before every contract read.
pub const RA_TLS_ENV_VARS: [&str; 6] = [
    RA_TLS_MRENCLAVE_ENV,
    RA_TLS_MRSIGNER_ENV,
    RA_TLS_ISV_PROD_ID_ENV,
    RA_TLS_ISV_SVN_ENV,
    RA_TLS_CERT_TIMESTAMP_NOT_BEFORE_ENV,
    RA_TLS_CERT_TIMESTAMP_NOT_AFTER_ENV,
];

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_PCS_BASE_URL: &str = "https://api.trustedservices.intel.com/sgx/certification/v4";
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_MANIFEST_PATH: &str = "/gramine/xchain.manifest.sgx";
pub const DEFAULT_ENCRYPTED_PATH: &str = "/data/secrets";
pub const DEFAULT_COLLATERAL_CACHE: &str = "/data/collateral";
pub const DEFAULT_NODE_TYPE: &str = "validator";

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MIGRATION_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{source_name} may not weaken {field} set by a higher-priority source")]
    DowngradeRefused {
        field: &'static str,
        source_name: &'static str,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigError::DowngradeRefused { .. } => "downgrade_refused",
            ConfigError::Invalid { .. } => "invalid_config",
        }
    }
}

/// One configuration source. Every field is optional; `None` defers to
/// the next layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayer {
    pub encrypted_path: Option<PathBuf>,
    pub collateral_cache_dir: Option<PathBuf>,
    pub rpc_url: Option<String>,
    pub pcs_base_url: Option<String>,
    pub pcs_api_key: Option<String>,
    pub node_type: Option<String>,
    pub refresh_interval: Option<Duration>,
    pub heartbeat_interval: Option<Duration>,
    pub migration_interval: Option<Duration>,
    pub http_timeout: Option<Duration>,
    pub upgrade_complete_block: Option<u64>,
    pub admission_strict: Option<bool>,
    pub allow_outdated_tcb: Option<bool>,
    pub allowed_mr_enclaves: Option<Vec<Measurement>>,
    pub allowed_mr_signers: Option<Vec<Measurement>>,
}

impl ConfigLayer {
    /// Layer built from the verified manifest environment.
    pub fn from_manifest(manifest: &TrustedManifest) -> Self {
        Self {
            encrypted_path: manifest
                .env_first(&[XCHAIN_ENCRYPTED_PATH_ENV, XCHAIN_SECRET_PATH_ENV])
                .map(PathBuf::from),
            collateral_cache_dir: manifest.env(XCHAIN_COLLATERAL_CACHE_ENV).map(PathBuf::from),
            rpc_url: manifest.env(XCHAIN_RPC_URL_ENV).map(str::to_owned),
            pcs_base_url: manifest.env(XCHAIN_PCS_URL_ENV).map(str::to_owned),
            node_type: manifest.env(NODE_TYPE_ENV).map(str::to_owned),
            ..Self::default()
        }
    }

    /// Layer built from the security-config contract snapshot.
    pub fn from_on_chain(config: &SecurityConfig) -> Self {
        let non_empty = |list: &Vec<Measurement>| (!list.is_empty()).then(|| list.clone());
        Self {
            admission_strict: Some(config.admission_strict),
            allowed_mr_enclaves: non_empty(&config.allowed_mr_enclaves),
            allowed_mr_signers: non_empty(&config.allowed_mr_signers),
            ..Self::default()
        }
    }
}

/// Effective configuration after the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub encrypted_path: PathBuf,
    pub collateral_cache_dir: PathBuf,
    pub rpc_url: String,
    pub pcs_base_url: String,
    pub pcs_api_key: Option<String>,
    pub node_type: String,
    pub refresh_interval: Duration,
    pub heartbeat_interval: Duration,
    pub migration_interval: Duration,
    pub http_timeout: Duration,
    pub upgrade_complete_block: u64,
    pub admission_strict: bool,
    pub allow_outdated_tcb: bool,
    pub allowed_mr_enclaves: Vec<Measurement>,
    pub allowed_mr_signers: Vec<Measurement>,
}

const SOURCES: [&str; 3] = ["manifest", "on-chain", "command line"];

/// Merge layers with priority manifest > on-chain > CLI into a fresh record.
///
/// Security-critical fields are never weakened by a lower-priority layer:
/// `admission_strict` can only be turned on, `allow_outdated_tcb` can only
/// be turned off, and the command line cannot supply measurement lists
/// when a trusted layer already has them.
pub fn merge(
    manifest: &ConfigLayer,
    on_chain: &ConfigLayer,
    cli: &ConfigLayer,
) -> Result<CoreConfig, ConfigError> {
    let layers = [manifest, on_chain, cli];

    fn first<T: Clone>(layers: &[&ConfigLayer; 3], get: impl Fn(&ConfigLayer) -> Option<T>) -> Option<T> {
        layers.iter().find_map(|l| get(*l))
    }

    let admission_strict = tighten_only(&layers, "admission_strict", |l| l.admission_strict, true)?;
    let allow_outdated_tcb =
        tighten_only(&layers, "allow_outdated_tcb", |l| l.allow_outdated_tcb, false)?;
    let allowed_mr_enclaves =
        trusted_list(&layers, "allowed_mr_enclaves", |l| l.allowed_mr_enclaves.clone())?;
    let allowed_mr_signers =
        trusted_list(&layers, "allowed_mr_signers", |l| l.allowed_mr_signers.clone())?;

    let rpc_url = first(&layers, |l| l.rpc_url.clone()).unwrap_or_else(|| DEFAULT_RPC_URL.into());
    validate_url("rpc_url", &rpc_url)?;
    let pcs_base_url = first(&layers, |l| l.pcs_base_url.clone())
        .unwrap_or_else(|| DEFAULT_PCS_BASE_URL.into());
    validate_url("pcs_base_url", &pcs_base_url)?;

    let config = CoreConfig {
        encrypted_path: first(&layers, |l| l.encrypted_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENCRYPTED_PATH)),
        collateral_cache_dir: first(&layers, |l| l.collateral_cache_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_COLLATERAL_CACHE)),
        rpc_url,
        pcs_base_url: pcs_base_url.trim_end_matches('/').to_owned(),
        pcs_api_key: first(&layers, |l| l.pcs_api_key.clone()).filter(|k| !k.is_empty()),
        node_type: first(&layers, |l| l.node_type.clone())
            .unwrap_or_else(|| DEFAULT_NODE_TYPE.into()),
        refresh_interval: first(&layers, |l| l.refresh_interval)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL),
        heartbeat_interval: first(&layers, |l| l.heartbeat_interval)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
        migration_interval: first(&layers, |l| l.migration_interval)
            .unwrap_or(DEFAULT_MIGRATION_INTERVAL),
        http_timeout: first(&layers, |l| l.http_timeout).unwrap_or(DEFAULT_HTTP_TIMEOUT),
        upgrade_complete_block: first(&layers, |l| l.upgrade_complete_block).unwrap_or(0),
        admission_strict,
        allow_outdated_tcb,
        allowed_mr_enclaves,
        allowed_mr_signers,
    };

    for (field, value) in [
        ("refresh_interval", config.refresh_interval),
        ("heartbeat_interval", config.heartbeat_interval),
        ("migration_interval", config.migration_interval),
        ("http_timeout", config.http_timeout),
    ] {
        if value.is_zero() {
            return Err(ConfigError::Invalid {
                field,
                reason: "must be non-zero".into(),
            });
        }
    }

    Ok(config)
}

/// Boolean that lower layers may only move towards `secure`.
fn tighten_only(
    layers: &[&ConfigLayer; 3],
    field: &'static str,
    get: impl Fn(&ConfigLayer) -> Option<bool>,
    secure: bool,
) -> Result<bool, ConfigError> {
    let mut value = None;
    for (layer, source_name) in layers.iter().zip(SOURCES) {
        match (value, get(*layer)) {
            (Some(current), Some(next)) if current == secure && next != secure => {
                return Err(ConfigError::DowngradeRefused { field, source_name });
            }
            (_, Some(next)) if next == secure => value = Some(secure),
            (None, Some(next)) => value = Some(next),
            _ => {}
        }
    }
    Ok(value.unwrap_or(secure))
}

/// Measurement list taken from the highest trusted layer that has one.
fn trusted_list(
    layers: &[&ConfigLayer; 3],
    field: &'static str,
    get: impl Fn(&ConfigLayer) -> Option<Vec<Measurement>>,
) -> Result<Vec<Measurement>, ConfigError> {
    let [manifest, on_chain, cli] = *layers;
    let trusted = get(manifest).or_else(|| get(on_chain));
    match (trusted, get(cli)) {
        (Some(_), Some(_)) => Err(ConfigError::DowngradeRefused {
            field,
            source_name: SOURCES[2],
        }),
        (Some(list), None) | (None, Some(list)) => Ok(list),
        (None, None) => Ok(Vec::new()),
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value).map(|_| ()).map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn defaults_apply_when_every_layer_is_empty() {
        let empty = ConfigLayer::default();
        let config = merge(&empty, &empty, &empty).unwrap();
        assert_eq!(config.pcs_base_url, DEFAULT_PCS_BASE_URL);
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.encrypted_path, PathBuf::from(DEFAULT_ENCRYPTED_PATH));
        assert_eq!(config.refresh_interval, Duration::from_secs(300));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.migration_interval, Duration::from_secs(60));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert!(config.admission_strict);
        assert!(!config.allow_outdated_tcb);
    }

    #[test]
    fn manifest_wins_over_chain_and_cli() {
        let manifest = ConfigLayer {
            rpc_url: Some("http://manifest:8545".into()),
            ..Default::default()
        };
        let chain = ConfigLayer {
            rpc_url: Some("http://chain:8545".into()),
            node_type: Some("archive".into()),
            ..Default::default()
        };
        let cli = ConfigLayer {
            rpc_url: Some("http://cli:8545".into()),
            node_type: Some("light".into()),
            pcs_api_key: Some("key".into()),
            ..Default::default()
        };
        let config = merge(&manifest, &chain, &cli).unwrap();
        assert_eq!(config.rpc_url, "http://manifest:8545");
        assert_eq!(config.node_type, "archive");
        assert_eq!(config.pcs_api_key.as_deref(), Some("key"));
    }

    #[test]
    fn cli_cannot_relax_admission_or_enable_outdated_tcb() {
        let strict = ConfigLayer {
            admission_strict: Some(true),
            allow_outdated_tcb: Some(false),
            ..Default::default()
        };
        let loose_admission = ConfigLayer {
            admission_strict: Some(false),
            ..Default::default()
        };
        let outdated = ConfigLayer {
            allow_outdated_tcb: Some(true),
            ..Default::default()
        };
        let empty = ConfigLayer::default();

        assert_eq!(
            merge(&strict, &empty, &loose_admission),
            Err(ConfigError::DowngradeRefused {
                field: "admission_strict",
                source_name: "command line"
            })
        );
        assert!(matches!(
            merge(&empty, &strict, &outdated),
            Err(ConfigError::DowngradeRefused { field: "allow_outdated_tcb", .. })
        ));
    }

    #[test]
    fn lower_layers_may_tighten() {
        let loose = ConfigLayer {
            admission_strict: Some(false),
            allow_outdated_tcb: Some(true),
            ..Default::default()
        };
        let tight = ConfigLayer {
            admission_strict: Some(true),
            allow_outdated_tcb: Some(false),
            ..Default::default()
        };
        let config = merge(&loose, &ConfigLayer::default(), &tight).unwrap();
        assert!(config.admission_strict);
        assert!(!config.allow_outdated_tcb);
    }

    #[test]
    fn cli_cannot_replace_trusted_measurements() {
        let chain = ConfigLayer {
            allowed_mr_enclaves: Some(vec![Measurement::new([1; 32])]),
            ..Default::default()
        };
        let cli = ConfigLayer {
            allowed_mr_enclaves: Some(vec![Measurement::new([2; 32])]),
            ..Default::default()
        };
        assert!(matches!(
            merge(&ConfigLayer::default(), &chain, &cli),
            Err(ConfigError::DowngradeRefused { field: "allowed_mr_enclaves", .. })
        ));
        let config = merge(&ConfigLayer::default(), &chain, &ConfigLayer::default()).unwrap();
        assert_eq!(config.allowed_mr_enclaves, vec![Measurement::new([1; 32])]);
    }

    #[test]
    fn manifest_layer_reads_verified_env_with_fallback_names() {
        let env = BTreeMap::from([
            (XCHAIN_SECRET_PATH_ENV.to_owned(), "/enc/secrets".to_owned()),
            (XCHAIN_RPC_URL_ENV.to_owned(), "http://node:8545".to_owned()),
        ]);
        let manifest = TrustedManifest::for_tests(Measurement::default(), env);
        let layer = ConfigLayer::from_manifest(&manifest);
        assert_eq!(layer.encrypted_path, Some(PathBuf::from("/enc/secrets")));
        assert_eq!(layer.rpc_url.as_deref(), Some("http://node:8545"));
    }

    #[test]
    fn on_chain_layer_leaves_empty_lists_unset() {
        let snapshot = SecurityConfig {
            allowed_mr_enclaves: vec![Measurement::new([7; 32])],
            admission_strict: false,
            ..SecurityConfig::default()
        };
        let layer = ConfigLayer::from_on_chain(&snapshot);
        assert_eq!(layer.admission_strict, Some(false));
        assert_eq!(layer.allowed_mr_enclaves, Some(vec![Measurement::new([7; 32])]));
        assert_eq!(layer.allowed_mr_signers, None);
    }

    #[test]
    fn rejects_bad_urls_and_zero_intervals() {
        let bad_url = ConfigLayer {
            rpc_url: Some("not a url".into()),
            ..Default::default()
        };
        let empty = ConfigLayer::default();
        assert!(matches!(
            merge(&bad_url, &empty, &empty),
            Err(ConfigError::Invalid { field: "rpc_url", .. })
        ));
        let zero = ConfigLayer {
            heartbeat_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(matches!(
            merge(&empty, &empty, &zero),
            Err(ConfigError::Invalid { field: "heartbeat_interval", .. })
        ));
    }
}
