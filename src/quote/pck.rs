// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Intel SGX PCK certificate extension.
//!
//! PCK leaf certificates carry an extension at `1.2.840.113741.1.13.1`
//! whose value is a SEQUENCE of `{OID, value}` pairs:
//!
//! | OID suffix | Field   | Encoding                                  |
//! |------------|---------|-------------------------------------------|
//! | `.1`       | PPID    | OCTET STRING (16)                         |
//! | `.2`       | TCB     | SEQUENCE of `.2.1`..`.2.18` pairs         |
//! | `.3`       | PCE-ID  | OCTET STRING (2)                          |
//! | `.4`       | FMSPC   | OCTET STRING (6)                          |
//!
//! Inside TCB, `.2.1`..`.2.16` are the component SVNs, `.2.17` is the
//! PCESVN and `.2.18` the raw 16-byte CPUSVN.

use x509_parser::der_parser::ber::BerObject;
use x509_parser::der_parser::der::parse_der;
use x509_parser::parse_x509_certificate;

use super::QuoteError;

/// Intel SGX extension OID (also used by RA-TLS for the quote itself).
pub const SGX_EXTENSION_OID: &str = "1.2.840.113741.1.13.1";

const PPID_OID: &str = "1.2.840.113741.1.13.1.1";
const TCB_OID: &str = "1.2.840.113741.1.13.1.2";
const PCE_ID_OID: &str = "1.2.840.113741.1.13.1.3";
const FMSPC_OID: &str = "1.2.840.113741.1.13.1.4";
const PCESVN_COMPONENT: u32 = 17;
const CPUSVN_COMPONENT: u32 = 18;

/// TCB values certified in a PCK leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PckTcb {
    pub comp_svn: [u8; 16],
    pub pce_svn: u16,
    pub cpu_svn: Option<[u8; 16]>,
}

/// Decoded SGX extension of a PCK leaf certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SgxPckExtension {
    pub ppid: Option<Vec<u8>>,
    pub tcb: Option<PckTcb>,
    pub pce_id: Option<Vec<u8>>,
    pub fmspc: Option<[u8; 6]>,
}

impl SgxPckExtension {
    /// Locate and decode the SGX extension of a DER certificate.
    ///
    /// Returns `Ok(None)` when the certificate has no SGX extension.
    pub fn from_certificate_der(der: &[u8]) -> Result<Option<Self>, QuoteError> {
        let (_, cert) = parse_x509_certificate(der).map_err(malformed)?;
        let Some(ext) = cert
            .extensions()
            .iter()
            .find(|ext| ext.oid.to_id_string() == SGX_EXTENSION_OID)
        else {
            return Ok(None);
        };
        Self::from_extension_value(ext.value).map(Some)
    }

    pub fn from_extension_value(value: &[u8]) -> Result<Self, QuoteError> {
        let (_, obj) = parse_der(value).map_err(malformed)?;
        let mut out = SgxPckExtension::default();

        for (oid, value) in pairs(&obj)? {
            match oid.as_str() {
                PPID_OID => out.ppid = Some(value.as_slice().map_err(malformed)?.to_vec()),
                TCB_OID => out.tcb = Some(parse_tcb(value)?),
                PCE_ID_OID => out.pce_id = Some(value.as_slice().map_err(malformed)?.to_vec()),
                FMSPC_OID => {
                    let raw = value.as_slice().map_err(malformed)?;
                    let fmspc = <[u8; 6]>::try_from(raw).map_err(|_| {
                        QuoteError::MalformedPck(format!("FMSPC must be 6 bytes, got {}", raw.len()))
                    })?;
                    out.fmspc = Some(fmspc);
                }
                _ => {}
            }
        }
        Ok(out)
    }
}

fn parse_tcb(obj: &BerObject<'_>) -> Result<PckTcb, QuoteError> {
    let mut tcb = PckTcb::default();
    for (oid, value) in pairs(obj)? {
        let Some(component) = oid
            .strip_prefix(TCB_OID)
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        match component {
            1..=16 => {
                let svn = value.as_u32().map_err(malformed)?;
                tcb.comp_svn[(component - 1) as usize] = u8::try_from(svn)
                    .map_err(|_| QuoteError::MalformedPck(format!("component SVN {svn} > 255")))?;
            }
            PCESVN_COMPONENT => {
                let svn = value.as_u32().map_err(malformed)?;
                tcb.pce_svn = u16::try_from(svn)
                    .map_err(|_| QuoteError::MalformedPck(format!("PCESVN {svn} > 65535")))?;
            }
            CPUSVN_COMPONENT => {
                let raw = value.as_slice().map_err(malformed)?;
                tcb.cpu_svn = Some(<[u8; 16]>::try_from(raw).map_err(|_| {
                    QuoteError::MalformedPck(format!("CPUSVN must be 16 bytes, got {}", raw.len()))
                })?);
            }
            _ => {}
        }
    }
    Ok(tcb)
}

/// Iterate a SEQUENCE of `SEQUENCE { OID, value }`, skipping entries of other shapes.
fn pairs<'a>(obj: &'a BerObject<'a>) -> Result<Vec<(String, &'a BerObject<'a>)>, QuoteError> {
    let entries = obj.as_sequence().map_err(malformed)?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let Ok(pair) = entry.as_sequence() else {
            continue;
        };
        if pair.len() < 2 {
            continue;
        }
        let Ok(oid) = pair[0].as_oid() else {
            continue;
        };
        out.push((oid.to_id_string(), &pair[1]));
    }
    Ok(out)
}

/// Split PEM certification data (type 5) into DER certificates, leaf first.
pub fn pck_chain_ders(cert_data: &[u8]) -> Result<Vec<Vec<u8>>, QuoteError> {
    let end = cert_data
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    let blocks = pem::parse_many(&cert_data[..end]).map_err(malformed)?;
    let ders: Vec<Vec<u8>> = blocks
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| block.into_contents())
        .collect();
    if ders.is_empty() {
        return Err(QuoteError::MalformedPck(
            "certification data holds no certificate".into(),
        ));
    }
    Ok(ders)
}

fn malformed(err: impl std::fmt::Display) -> QuoteError {
    QuoteError::MalformedPck(err.to_string())
}
