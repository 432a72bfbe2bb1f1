// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Platform instance ID derivation.
//!
//! | Quote                         | ID                                  | Provenance                    |
//! |-------------------------------|-------------------------------------|-------------------------------|
//! | DCAP, cert data type 1        | `SHA-256(PPID)`                     | `ppid`                        |
//! | DCAP, cert data type 5        | `SHA-256(FMSPC ‖ CPUSVN)` from PCK  | `pck-fmspc-cpusvn`            |
//! | DCAP, anything else           | `SHA-256(q[64..80] ‖ q[96..112])`   | `derived-from-report`         |
//! | EPID                          | `SHA-256(q[432..464])`              | `derived-from-epid-signature` |

use std::fmt;

use subtle::ConstantTimeEq;
use tracing::debug;

use crate::primitives::{sha256, sha256_concat};

use super::body::{Quote, SignatureSection};
use super::layout;
use super::pck::{pck_chain_ders, SgxPckExtension};
use super::QuoteError;

/// Which quote material an ID was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Ppid,
    PckFmspcCpuSvn,
    DerivedFromReport,
    DerivedFromEpidSignature,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Ppid => "ppid",
            Provenance::PckFmspcCpuSvn => "pck-fmspc-cpusvn",
            Provenance::DerivedFromReport => "derived-from-report",
            Provenance::DerivedFromEpidSignature => "derived-from-epid-signature",
        }
    }
}

/// Stable 32-byte identifier of the physical CPU that produced a quote.
#[derive(Clone, Copy)]
pub struct PlatformInstanceId {
    id: [u8; 32],
    provenance: Provenance,
}

impl PlatformInstanceId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.id
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Constant-time comparison of the ID bytes; provenance is ignored.
    pub fn same_platform(&self, other: &Self) -> bool {
        bool::from(self.id.ct_eq(&other.id))
    }
}

impl fmt::Debug for PlatformInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlatformInstanceId({}, {})", hex::encode(self.id), self.provenance.as_str())
    }
}

/// Derive the platform instance ID from raw quote bytes.
pub fn extract_platform_instance_id(raw: &[u8]) -> Result<PlatformInstanceId, QuoteError> {
    let quote = Quote::parse(raw)?;

    if !quote.sign_type().is_dcap() {
        let epid = raw.get(layout::PLATFORM_EPID).ok_or(QuoteError::TooShort {
            needed: layout::PLATFORM_EPID.end,
            actual: raw.len(),
        })?;
        return Ok(PlatformInstanceId {
            id: sha256(epid),
            provenance: Provenance::DerivedFromEpidSignature,
        });
    }

    if let SignatureSection::Ecdsa(data) = quote.signature() {
        match data.cert_data_type {
            layout::CERT_DATA_PPID_CLEARTEXT => {
                let ppid = data.cert_data.get(..layout::PPID_LEN).unwrap_or(&data.cert_data);
                return Ok(PlatformInstanceId {
                    id: sha256(ppid),
                    provenance: Provenance::Ppid,
                });
            }
            layout::CERT_DATA_PCK_CHAIN => match from_pck_chain(&data.cert_data) {
                Ok(Some(id)) => return Ok(id),
                Ok(None) => {}
                Err(err) => debug!(error = %err, "PCK chain unusable for platform ID; using report fields"),
            },
            _ => {}
        }
    }

    Ok(PlatformInstanceId {
        id: sha256_concat(&[&raw[layout::PLATFORM_FALLBACK_A], &raw[layout::PLATFORM_FALLBACK_B]]),
        provenance: Provenance::DerivedFromReport,
    })
}

fn from_pck_chain(cert_data: &[u8]) -> Result<Option<PlatformInstanceId>, QuoteError> {
    let chain = pck_chain_ders(cert_data)?;
    let Some(ext) = SgxPckExtension::from_certificate_der(&chain[0])? else {
        return Ok(None);
    };
    let cpu_svn = ext.tcb.as_ref().and_then(|tcb| tcb.cpu_svn);
    match (ext.fmspc, cpu_svn) {
        (Some(fmspc), Some(cpu_svn)) => Ok(Some(PlatformInstanceId {
            id: sha256_concat(&[&fmspc, &cpu_svn]),
            provenance: Provenance::PckFmspcCpuSvn,
        })),
        _ => Ok(None),
    }
}
