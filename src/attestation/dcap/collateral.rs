// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed collateral: TCB Info and QE Identity documents.
//!
//! Both arrive as `{"<body>": {...}, "signature": "<hex r‖s>"}` where the
//! ECDSA-P256 signature covers the exact bytes of the inner object. The
//! signing certificate comes from the PCS issuer-chain header and must chain
//! to the trust anchor. A document whose `nextUpdate` has passed is stale and
//! is not used.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::DateTime;
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};
use serde::Deserialize;
use serde_json::value::RawValue;

use super::chain::{verify_chain, TrustAnchor};
use super::tcb::TcbStatus;
use crate::attestation::AttestationError;

/// A collateral document as served, with its issuer chain (PEM).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCollateral {
    pub body: String,
    pub issuer_chain: String,
}

/// Source of DCAP collateral.
#[async_trait]
pub trait CollateralProvider: Send + Sync {
    async fn tcb_info(&self, fmspc: &[u8; 6]) -> Result<SignedCollateral, AttestationError>;

    async fn qe_identity(&self) -> Result<SignedCollateral, AttestationError>;
}

/// Collateral held in memory, for offline verification and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCollateral {
    tcb_info: Vec<([u8; 6], SignedCollateral)>,
    qe_identity: Option<SignedCollateral>,
}

impl StaticCollateral {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tcb_info(mut self, fmspc: [u8; 6], collateral: SignedCollateral) -> Self {
        self.tcb_info.retain(|(f, _)| *f != fmspc);
        self.tcb_info.push((fmspc, collateral));
        self
    }

    pub fn with_qe_identity(mut self, collateral: SignedCollateral) -> Self {
        self.qe_identity = Some(collateral);
        self
    }
}

#[async_trait]
impl CollateralProvider for StaticCollateral {
    async fn tcb_info(&self, fmspc: &[u8; 6]) -> Result<SignedCollateral, AttestationError> {
        self.tcb_info
            .iter()
            .find(|(f, _)| f == fmspc)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| {
                AttestationError::CollateralFetchFailed(format!(
                    "no TCB info for FMSPC {}",
                    hex::encode(fmspc)
                ))
            })
    }

    async fn qe_identity(&self) -> Result<SignedCollateral, AttestationError> {
        self.qe_identity
            .clone()
            .ok_or_else(|| AttestationError::CollateralFetchFailed("no QE identity".into()))
    }
}

/// TCB Info body (v3).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcbInfo {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default)]
    pub next_update: Option<String>,
    pub fmspc: String,
    #[serde(default)]
    pub pce_id: Option<String>,
    pub tcb_levels: Vec<TcbLevel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcbLevel {
    pub tcb: TcbComponents,
    #[serde(default)]
    pub tcb_date: Option<String>,
    pub tcb_status: TcbStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcbComponents {
    pub sgxtcbcomponents: Vec<TcbComponent>,
    pub pcesvn: u16,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TcbComponent {
    pub svn: u8,
}

/// QE Identity body (v2).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QeIdentity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default)]
    pub next_update: Option<String>,
    pub miscselect: String,
    pub miscselect_mask: String,
    pub attributes: String,
    pub attributes_mask: String,
    pub mrsigner: String,
    pub isvprodid: u16,
    pub tcb_levels: Vec<QeTcbLevel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QeTcbLevel {
    pub tcb: QeTcb,
    pub tcb_status: TcbStatus,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QeTcb {
    pub isvsvn: u16,
}

impl SignedCollateral {
    /// Check the signature and issuer chain, then decode the `tcbInfo` body.
    pub fn open_tcb_info(&self, anchor: &TrustAnchor, now: i64) -> Result<TcbInfo, AttestationError> {
        let inner = self.open(anchor, now, "tcbInfo")?;
        let info: TcbInfo = serde_json::from_str(&inner).map_err(|e| unusable(format!("TCB info: {e}")))?;
        ensure_fresh(info.next_update.as_deref(), now, "TCB info")?;
        Ok(info)
    }

    /// Check the signature and issuer chain, then decode the `enclaveIdentity` body.
    pub fn open_qe_identity(&self, anchor: &TrustAnchor, now: i64) -> Result<QeIdentity, AttestationError> {
        let inner = self.open(anchor, now, "enclaveIdentity")?;
        let identity: QeIdentity =
            serde_json::from_str(&inner).map_err(|e| unusable(format!("QE identity: {e}")))?;
        ensure_fresh(identity.next_update.as_deref(), now, "QE identity")?;
        Ok(identity)
    }

    /// Unverified `nextUpdate` of the body as unix seconds. Only good for
    /// deciding whether a cached copy is worth re-fetching.
    pub fn next_update(&self) -> Option<i64> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Dated {
            next_update: Option<String>,
        }

        let envelope: BTreeMap<String, Box<RawValue>> = serde_json::from_str(&self.body).ok()?;
        let inner = envelope.get("tcbInfo").or_else(|| envelope.get("enclaveIdentity"))?;
        let dated: Dated = serde_json::from_str(inner.get()).ok()?;
        parse_time(dated.next_update.as_deref()?)
    }

    fn open(&self, anchor: &TrustAnchor, now: i64, field: &str) -> Result<String, AttestationError> {
        let envelope: BTreeMap<String, Box<RawValue>> =
            serde_json::from_str(&self.body).map_err(|e| unusable(format!("{field}: {e}")))?;
        let inner = envelope
            .get(field)
            .ok_or_else(|| unusable(format!("document has no {field}")))?;
        let signature_hex: String = envelope
            .get("signature")
            .ok_or_else(|| unusable(format!("{field} is unsigned")))
            .and_then(|raw| {
                serde_json::from_str(raw.get()).map_err(|e| unusable(format!("{field} signature: {e}")))
            })?;
        let signature =
            hex::decode(signature_hex).map_err(|e| unusable(format!("{field} signature: {e}")))?;

        let signer_key = self.signer_key(anchor, now)?;
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &signer_key)
            .verify(inner.get().as_bytes(), &signature)
            .map_err(|_| unusable(format!("{field} signature does not verify")))?;
        Ok(inner.get().to_owned())
    }

    fn signer_key(&self, anchor: &TrustAnchor, now: i64) -> Result<Vec<u8>, AttestationError> {
        let ders: Vec<Vec<u8>> = pem::parse_many(&self.issuer_chain)
            .map_err(|e| unusable(format!("issuer chain: {e}")))?
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| block.into_contents())
            .collect();
        verify_chain(&ders, anchor, now).map_err(|e| unusable(format!("issuer chain: {e}")))
    }
}

fn ensure_fresh(next_update: Option<&str>, now: i64, what: &str) -> Result<(), AttestationError> {
    let Some(next_update) = next_update else {
        return Err(unusable(format!("{what} has no nextUpdate")));
    };
    let Some(at) = parse_time(next_update) else {
        return Err(unusable(format!("{what} nextUpdate {next_update:?} is malformed")));
    };
    if at <= now {
        return Err(unusable(format!("{what} is stale: nextUpdate {next_update} has passed")));
    }
    Ok(())
}

fn parse_time(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value).ok().map(|t| t.timestamp())
}

fn unusable(reason: String) -> AttestationError {
    AttestationError::CollateralFetchFailed(reason)
}
