// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Intel PCS collateral fetching with an on-disk cache.
//!
//! ## Cache
//!
//! | File | Content |
//! |------|---------|
//! | `tcb_info_<fmspc>` | TCB Info JSON |
//! | `qe_identity` | QE Identity JSON |
//! | `<key>.issuer_chain` | PEM issuer chain from the response header |
//!
//! A hit is served without re-validation until its `nextUpdate` passes or
//! [`CollateralCache::invalidate`] / [`CollateralCache::clear`] removes it.
//! Cache failures are logged and fall through to the network. PCK
//! certificates are never fetched: DCAP quotes carry their chain in
//! certification data.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use tokio::fs;
use tracing::{debug, info, warn};

use super::collateral::{CollateralProvider, SignedCollateral};
use crate::attestation::AttestationError;
use crate::clock::{system_clock, Clock};

const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const TCB_INFO_ISSUER_HEADER: &str = "TCB-Info-Issuer-Chain";
const QE_IDENTITY_ISSUER_HEADER: &str = "SGX-Enclave-Identity-Issuer-Chain";
const ISSUER_CHAIN_SUFFIX: &str = ".issuer_chain";
const QE_IDENTITY_KEY: &str = "qe_identity";

pub fn tcb_info_key(fmspc: &[u8; 6]) -> String {
    format!("tcb_info_{}", hex::encode(fmspc))
}

/// Directory of cached collateral documents.
#[derive(Debug, Clone)]
pub struct CollateralCache {
    dir: PathBuf,
}

impl CollateralCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn get(&self, key: &str) -> Option<SignedCollateral> {
        let body = read_optional(&self.dir.join(key)).await?;
        let issuer_chain = read_optional(&self.issuer_path(key)).await?;
        Some(SignedCollateral { body, issuer_chain })
    }

    pub async fn put(&self, key: &str, collateral: &SignedCollateral) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(self.issuer_path(key), &collateral.issuer_chain).await?;
        fs::write(self.dir.join(key), &collateral.body).await
    }

    pub async fn invalidate(&self, key: &str) -> std::io::Result<()> {
        for path in [self.dir.join(key), self.issuer_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Remove every cached document.
    pub async fn clear(&self) -> std::io::Result<()> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    fn issuer_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{ISSUER_CHAIN_SUFFIX}"))
    }
}

async fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!(component = "attestation", path = %path.display(), error = %e, "Collateral cache read failed");
            None
        }
    }
}

/// Fetches TCB Info and QE Identity from Intel PCS v4.
#[derive(Clone)]
pub struct PcsCollateralFetcher {
    base_url: String,
    api_key: Option<String>,
    cache: Option<CollateralCache>,
    clock: Arc<dyn Clock>,
    client: reqwest::Client,
}

impl PcsCollateralFetcher {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AttestationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AttestationError::CollateralFetchFailed(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            cache: None,
            clock: system_clock(),
            client,
        })
    }

    pub fn with_cache(mut self, cache: CollateralCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> Option<&CollateralCache> {
        self.cache.as_ref()
    }

    async fn cached_or_fetch(
        &self,
        key: &str,
        url: String,
        issuer_header: &str,
    ) -> Result<SignedCollateral, AttestationError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(key).await {
                let now = self.clock.unix_now();
                if hit.next_update().is_some_and(|at| at > now) {
                    debug!(component = "attestation", key, "Collateral cache hit");
                    return Ok(hit);
                }
                info!(component = "attestation", key, "Cached collateral is stale; re-fetching");
                if let Err(e) = cache.invalidate(key).await {
                    warn!(component = "attestation", key, error = %e, "Collateral cache invalidate failed");
                }
            }
        }

        let collateral = self.fetch(&url, issuer_header).await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(key, &collateral).await {
                warn!(component = "attestation", key, error = %e, "Collateral cache write failed");
            }
        }
        Ok(collateral)
    }

    async fn fetch(&self, url: &str, issuer_header: &str) -> Result<SignedCollateral, AttestationError> {
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AttestationError::CollateralFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AttestationError::CollateralFetchFailed(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        let issuer_chain = response
            .headers()
            .get(issuer_header)
            .and_then(|v| v.to_str().ok())
            .map(|v| percent_decode_str(v).decode_utf8_lossy().into_owned())
            .ok_or_else(|| {
                AttestationError::CollateralFetchFailed(format!("{issuer_header} header missing"))
            })?;
        let body = response
            .text()
            .await
            .map_err(|e| AttestationError::CollateralFetchFailed(e.to_string()))?;

        info!(component = "attestation", url, "Fetched collateral from PCS");
        Ok(SignedCollateral { body, issuer_chain })
    }
}

#[async_trait]
impl CollateralProvider for PcsCollateralFetcher {
    async fn tcb_info(&self, fmspc: &[u8; 6]) -> Result<SignedCollateral, AttestationError> {
        let url = format!("{}/tcb?fmspc={}", self.base_url, hex::encode(fmspc));
        self.cached_or_fetch(&tcb_info_key(fmspc), url, TCB_INFO_ISSUER_HEADER)
            .await
    }

    async fn qe_identity(&self) -> Result<SignedCollateral, AttestationError> {
        let url = format!("{}/qe/identity", self.base_url);
        self.cached_or_fetch(QE_IDENTITY_KEY, url, QE_IDENTITY_ISSUER_HEADER)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::fixtures::DcapFixture;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn sample() -> SignedCollateral {
        SignedCollateral {
            body: r#"{"tcbInfo":{},"signature":"00"}"#.into(),
            issuer_chain: "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n".into(),
        }
    }

    /// Unroutable base URL: any network access fails.
    fn offline(cache: CollateralCache, at: i64) -> PcsCollateralFetcher {
        let clock = ManualClock::new(Utc.timestamp_opt(at, 0).unwrap());
        PcsCollateralFetcher::new("http://127.0.0.1:9", None, Duration::from_millis(200))
            .unwrap()
            .with_cache(cache)
            .with_clock(Arc::new(clock))
    }

    #[tokio::test]
    async fn cache_roundtrip_and_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CollateralCache::new(dir.path().join("collateral"));
        let key = tcb_info_key(&[0x00, 0x90, 0x6e, 0xa1, 0x00, 0x00]);
        assert_eq!(key, "tcb_info_00906ea10000");
        assert!(cache.get(&key).await.is_none());

        cache.put(&key, &sample()).await.unwrap();
        assert!(dir.path().join("collateral/tcb_info_00906ea10000.issuer_chain").exists());
        assert_eq!(cache.get(&key).await, Some(sample()));

        cache.invalidate(&key).await.unwrap();
        assert!(cache.get(&key).await.is_none());
        cache.invalidate(&key).await.unwrap();
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CollateralCache::new(dir.path());
        cache.put(QE_IDENTITY_KEY, &sample()).await.unwrap();
        cache.put("tcb_info_aa", &sample()).await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.get(QE_IDENTITY_KEY).await.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn clear_on_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CollateralCache::new(dir.path().join("absent")).clear().await.is_ok());
    }

    #[tokio::test]
    async fn fresh_cache_hit_skips_network() {
        let fixture = DcapFixture::new();
        let dir = tempfile::tempdir().unwrap();
        let cache = CollateralCache::new(dir.path());
        let qe = fixture.qe_identity_collateral();
        cache.put(QE_IDENTITY_KEY, &qe).await.unwrap();

        let fetcher = offline(cache, fixture.now);
        assert_eq!(fetcher.qe_identity().await.unwrap(), qe);
        assert!(fetcher.tcb_info(&[1; 6]).await.is_err());
    }

    #[tokio::test]
    async fn stale_cache_hit_is_dropped() {
        let fixture = DcapFixture::new();
        let dir = tempfile::tempdir().unwrap();
        let cache = CollateralCache::new(dir.path());
        cache.put(QE_IDENTITY_KEY, &fixture.qe_identity_collateral()).await.unwrap();
        cache.put("tcb_info_aa", &sample()).await.unwrap();

        let fetcher = offline(cache.clone(), fixture.now + 60 * 86_400);
        assert_eq!(
            fetcher.qe_identity().await.unwrap_err().kind(),
            "collateral_fetch_failed"
        );
        assert!(cache.get(QE_IDENTITY_KEY).await.is_none());
        assert!(cache.get("tcb_info_aa").await.is_some());
    }
}
