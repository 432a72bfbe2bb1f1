// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Manifest Trust
//!
//! Loads the enclave manifest (`SIGSTRUCT ‖ TOML`) only after proving it
//! belongs to the running enclave.
//!
//! ## Verification Order
//!
//! | Step | Check | Error |
//! |------|-------|-------|
//! | 1 | file is at least 1808 bytes | `ManifestTooSmall` |
//! | 2 | `H = SHA-256(file)` | |
//! | 3 | `<file>.sig` verifies `H` under the SIGSTRUCT modulus | `ManifestSignatureInvalid` |
//! | 4 | SIGSTRUCT self-signature | `SigstructSignatureInvalid` |
//! | 5 | SIGSTRUCT MRENCLAVE == runtime MRENCLAVE | `ManifestRuntimeMismatch` |
//! | 6 | TOML parses | `TomlParseError` |
//! | 7 | every hashed trusted file matches | `TrustedFileMissing` / `TrustedFileHashMismatch` |
//!
//! The hash in step 2 is taken before any SIGSTRUCT field is trusted, so a
//! `.sig` can only vouch for the exact bytes that were read.

pub mod document;
pub mod sigstruct;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::device::AttestationDevice;
use crate::flavor::BuildFlavor;
use crate::primitives::{
    rsa3072_exp3_pkcs1v15_verify, sha256, Measurement, MrEnclave, MrSigner, PrimitiveError,
};

pub use document::{ManifestDocument, TrustedFile};
pub use sigstruct::{Sigstruct, SigstructError, SIGSTRUCT_LEN};

/// Manifest verification errors.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is {actual} bytes, smaller than a SIGSTRUCT")]
    ManifestTooSmall { actual: usize },

    #[error("manifest signature file does not match the manifest: {0}")]
    ManifestSignatureInvalid(PrimitiveError),

    #[error("SIGSTRUCT signature invalid: {0}")]
    SigstructSignatureInvalid(SigstructError),

    #[error("manifest MRENCLAVE {manifest} does not match running enclave {runtime}")]
    ManifestRuntimeMismatch {
        manifest: MrEnclave,
        runtime: MrEnclave,
    },

    #[error("trusted file {uri} is missing")]
    TrustedFileMissing { uri: String },

    #[error("trusted file {uri} hash mismatch")]
    TrustedFileHashMismatch { uri: String },

    #[error("manifest TOML invalid: {0}")]
    TomlParseError(String),

    #[error("cannot read {path}: {reason}")]
    ManifestUnreadable { path: PathBuf, reason: String },

    #[error("runtime MRENCLAVE unavailable: {0}")]
    RuntimeMeasurementUnavailable(String),
}

impl ManifestError {
    pub fn kind(&self) -> &'static str {
        match self {
            ManifestError::ManifestTooSmall { .. } => "manifest_too_small",
            ManifestError::ManifestSignatureInvalid(_) => "manifest_signature_invalid",
            ManifestError::SigstructSignatureInvalid(_) => "sigstruct_signature_invalid",
            ManifestError::ManifestRuntimeMismatch { .. } => "manifest_runtime_mismatch",
            ManifestError::TrustedFileMissing { .. } => "trusted_file_missing",
            ManifestError::TrustedFileHashMismatch { .. } => "trusted_file_hash_mismatch",
            ManifestError::TomlParseError(_) => "toml_parse_error",
            ManifestError::ManifestUnreadable { .. } => "manifest_unreadable",
            ManifestError::RuntimeMeasurementUnavailable(_) => "runtime_measurement_unavailable",
        }
    }
}

/// Values proven to come from the manifest the running enclave was built with.
///
/// This is the only way the rest of the core reads manifest content.
#[derive(Debug, Clone)]
pub struct TrustedManifest {
    pub mr_enclave: MrEnclave,
    pub mr_signer: MrSigner,
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub enclave_size: u64,
    pub thread_num: u32,
    env: BTreeMap<String, String>,
}

impl TrustedManifest {
    /// Verified `loader.env` value.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// First key in `keys` with a verified, non-empty value.
    pub fn env_first(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.env(k))
            .find(|v| !v.trim().is_empty())
    }

    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Manifest with the given identity and environment, for wiring tests
    /// that do not exercise the signature checks.
    #[cfg(any(test, feature = "testenv"))]
    pub fn for_tests(mr_enclave: MrEnclave, env: BTreeMap<String, String>) -> Self {
        Self {
            mr_enclave,
            mr_signer: MrSigner::default(),
            isv_prod_id: 0,
            isv_svn: 0,
            enclave_size: 0,
            thread_num: 0,
            env,
        }
    }
}

/// Runs the manifest checks against a runtime attestation device.
pub struct ManifestVerifier<'a> {
    device: &'a dyn AttestationDevice,
    flavor: BuildFlavor,
    files_root: Option<PathBuf>,
}

impl<'a> ManifestVerifier<'a> {
    pub fn new(device: &'a dyn AttestationDevice) -> Self {
        Self {
            device,
            flavor: BuildFlavor::CURRENT,
            files_root: None,
        }
    }

    #[cfg(any(test, feature = "testenv"))]
    pub fn with_flavor(mut self, flavor: BuildFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Directory that relative trusted-file URIs are resolved against.
    /// Defaults to the process working directory.
    pub fn with_files_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.files_root = Some(root.into());
        self
    }

    pub fn verify_and_load(&self, path: &Path) -> Result<TrustedManifest, ManifestError> {
        // 1. Read everything once; later steps only look at this buffer.
        let buffer = read(path)?;
        let sigstruct = Sigstruct::new(&buffer).ok_or(ManifestError::ManifestTooSmall {
            actual: buffer.len(),
        })?;

        // 2-3. Detached signature over the exact bytes read.
        let digest = sha256(&buffer);
        let sig = read(&sig_path(path))?;
        rsa3072_exp3_pkcs1v15_verify(sigstruct.modulus_le(), &sig, &digest)
            .map_err(ManifestError::ManifestSignatureInvalid)?;

        // 4.
        sigstruct
            .verify_self_signature()
            .map_err(ManifestError::SigstructSignatureInvalid)?;

        // 5.
        let manifest_mr = sigstruct.mr_enclave();
        let runtime_mr = self
            .device
            .runtime_mr_enclave()
            .map_err(|e| ManifestError::RuntimeMeasurementUnavailable(e.to_string()))?;
        if manifest_mr != runtime_mr {
            if !self.flavor.tolerates_runtime_mismatch() {
                return Err(ManifestError::ManifestRuntimeMismatch {
                    manifest: manifest_mr,
                    runtime: runtime_mr,
                });
            }
            warn!(
                component = "manifest",
                manifest_mr_enclave = %manifest_mr,
                runtime_mr_enclave = %runtime_mr,
                flavor = %self.flavor,
                "Manifest MRENCLAVE differs from running enclave; continuing"
            );
        }

        // 6.
        let document = ManifestDocument::parse(&buffer[SIGSTRUCT_LEN..])
            .map_err(ManifestError::TomlParseError)?;

        // 7.
        for file in &document.trusted_files {
            if let Err(err) = self.check_trusted_file(file) {
                if !self.flavor.tolerates_trusted_file_mismatch() {
                    return Err(err);
                }
                warn!(
                    component = "manifest",
                    kind = err.kind(),
                    uri = %file.uri,
                    flavor = %self.flavor,
                    "Trusted file check failed; continuing"
                );
            }
        }

        let manifest = TrustedManifest {
            mr_enclave: manifest_mr,
            mr_signer: sigstruct.mr_signer(),
            isv_prod_id: sigstruct.isv_prod_id(),
            isv_svn: sigstruct.isv_svn(),
            enclave_size: document.enclave_size,
            thread_num: document.thread_num,
            env: document.env,
        };

        info!(
            component = "manifest",
            mr_enclave = %manifest.mr_enclave,
            mr_signer = %manifest.mr_signer,
            isv_prod_id = manifest.isv_prod_id,
            isv_svn = manifest.isv_svn,
            trusted_files = document.trusted_files.len(),
            "Manifest verified"
        );
        Ok(manifest)
    }

    fn check_trusted_file(&self, file: &TrustedFile) -> Result<(), ManifestError> {
        let Some(expected) = file.sha256 else {
            return Ok(());
        };
        let path = match &self.files_root {
            Some(root) => root.join(file.path()),
            None => file.path(),
        };
        let contents = fs::read(&path).map_err(|_| ManifestError::TrustedFileMissing {
            uri: file.uri.clone(),
        })?;
        if Measurement::new(sha256(&contents)) != Measurement::new(expected) {
            return Err(ManifestError::TrustedFileHashMismatch {
                uri: file.uri.clone(),
            });
        }
        Ok(())
    }
}

/// Verify `path` with the compiled build flavor.
pub fn verify_manifest_and_load(
    path: &Path,
    device: &dyn AttestationDevice,
) -> Result<TrustedManifest, ManifestError> {
    ManifestVerifier::new(device).verify_and_load(path)
}

fn sig_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".sig");
    PathBuf::from(os)
}

fn read(path: &Path) -> Result<Vec<u8>, ManifestError> {
    fs::read(path).map_err(|e| ManifestError::ManifestUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
