// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TOML section of the manifest file.
//!
//! ```toml
//! loader.env.XCHAIN_SECURITY_CONFIG_CONTRACT = "0x..."
//! loader.env.LD_LIBRARY_PATH = { value = "/lib" }
//! loader.env.RUST_LOG = { passthrough = true }   # untrusted, dropped
//!
//! sgx.enclave_size = "1G"
//! sgx.thread_num = 16
//! sgx.trusted_files = [
//!   "file:/usr/lib/x86_64-linux-gnu/",
//!   { uri = "file:xchain-enclave", sha256 = "2f1c..." },
//! ]
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawDocument {
    sgx: RawSgx,
    loader: RawLoader,
}

#[derive(Debug, Deserialize)]
struct RawSgx {
    enclave_size: String,
    thread_num: u32,
    trusted_files: Vec<RawTrustedFile>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTrustedFile {
    Uri(String),
    Entry { uri: String, sha256: Option<String> },
}

#[derive(Debug, Deserialize)]
struct RawLoader {
    env: BTreeMap<String, RawEnvValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvValue {
    Plain(String),
    Value { value: String },
    Passthrough { passthrough: bool },
}

/// A file the library OS will only load if its hash matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedFile {
    pub uri: String,
    pub sha256: Option<[u8; 32]>,
}

impl TrustedFile {
    /// Filesystem path named by the URI (`file:` prefix stripped).
    pub fn path(&self) -> PathBuf {
        PathBuf::from(self.uri.strip_prefix("file:").unwrap_or(&self.uri))
    }
}

/// Decoded manifest TOML; only the fields the core consumes.
#[derive(Debug, Clone)]
pub struct ManifestDocument {
    pub enclave_size: u64,
    pub thread_num: u32,
    pub trusted_files: Vec<TrustedFile>,
    /// `loader.env` entries with a fixed value. Passthrough entries are omitted.
    pub env: BTreeMap<String, String>,
}

impl ManifestDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| format!("manifest is not UTF-8: {e}"))?;
        let raw: RawDocument = toml::from_str(text).map_err(|e| e.to_string())?;

        let enclave_size = parse_size(&raw.sgx.enclave_size)?;
        let trusted_files = raw
            .sgx
            .trusted_files
            .into_iter()
            .map(|entry| match entry {
                RawTrustedFile::Uri(uri) => Ok(TrustedFile { uri, sha256: None }),
                RawTrustedFile::Entry { uri, sha256 } => {
                    let sha256 = sha256.map(|h| parse_sha256(&uri, &h)).transpose()?;
                    Ok(TrustedFile { uri, sha256 })
                }
            })
            .collect::<Result<Vec<_>, String>>()?;

        let env = raw
            .loader
            .env
            .into_iter()
            .filter_map(|(key, value)| match value {
                RawEnvValue::Plain(v) | RawEnvValue::Value { value: v } => Some((key, v)),
                RawEnvValue::Passthrough { .. } => None,
            })
            .collect();

        Ok(Self {
            enclave_size,
            thread_num: raw.sgx.thread_num,
            trusted_files,
            env,
        })
    }
}

/// `"512M"` → bytes. A bare number is taken as bytes.
fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (digits, shift) = match value.chars().last() {
        Some('K' | 'k') => (&value[..value.len() - 1], 10),
        Some('M' | 'm') => (&value[..value.len() - 1], 20),
        Some('G' | 'g') => (&value[..value.len() - 1], 30),
        _ => (value, 0),
    };
    let base: u64 = digits
        .parse()
        .map_err(|_| format!("invalid sgx.enclave_size {value:?}"))?;
    base.checked_mul(1u64 << shift)
        .ok_or_else(|| format!("sgx.enclave_size {value:?} overflows"))
}

fn parse_sha256(uri: &str, value: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(value).map_err(|e| format!("trusted file {uri}: {e}"))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| format!("trusted file {uri}: sha256 must be 32 bytes"))
}
