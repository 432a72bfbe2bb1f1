// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! X.509 chain walking up to a pinned root key.

use x509_parser::certificate::X509Certificate;
use x509_parser::parse_x509_certificate;
use x509_parser::time::ASN1Time;

/// SubjectPublicKeyInfo of the Intel SGX Root CA (P-256).
const INTEL_SGX_ROOT_SPKI: &[u8] = &[
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02,
    0x01, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03,
    0x42, 0x00, 0x04, 0x0b, 0xa9, 0xc4, 0xc0, 0xc0, 0xc8, 0x61, 0x93, 0xa3,
    0xfe, 0x23, 0xd6, 0xb0, 0x2c, 0xda, 0x10, 0xa8, 0xbb, 0xd4, 0xe8, 0x8e,
    0x48, 0xb4, 0x45, 0x85, 0x61, 0xa3, 0x6e, 0x70, 0x55, 0x25, 0xf5, 0x67,
    0x91, 0x8e, 0x2e, 0xdc, 0x88, 0xe4, 0x0d, 0x86, 0x0b, 0xd0, 0xcc, 0x4e,
    0xe2, 0x6a, 0xac, 0xc9, 0x88, 0xe5, 0x05, 0xa9, 0x53, 0x55, 0x8c, 0x45,
    0x3f, 0x6b, 0x09, 0x04, 0xae, 0x73, 0x94,
];

/// The root key every PCK and collateral-signing chain must end in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    spki: Vec<u8>,
}

impl TrustAnchor {
    /// The Intel SGX Root CA.
    pub fn intel() -> Self {
        Self {
            spki: INTEL_SGX_ROOT_SPKI.to_vec(),
        }
    }

    /// Pin an arbitrary DER SubjectPublicKeyInfo.
    pub fn from_spki_der(spki: Vec<u8>) -> Self {
        Self { spki }
    }

    /// Pin the key of a DER root certificate.
    pub fn from_certificate_der(der: &[u8]) -> Result<Self, String> {
        let (_, cert) = parse_x509_certificate(der).map_err(|e| e.to_string())?;
        Ok(Self {
            spki: cert.public_key().raw.to_vec(),
        })
    }
}

impl Default for TrustAnchor {
    fn default() -> Self {
        Self::intel()
    }
}

/// Verify `ders` (leaf first) at unix time `now` and return the leaf's
/// uncompressed public key.
///
/// Every certificate must be inside its validity window and signed by the
/// next one; every issuer must be a CA; the last must be self-signed with the
/// anchor's key.
pub fn verify_chain(ders: &[Vec<u8>], anchor: &TrustAnchor, now: i64) -> Result<Vec<u8>, String> {
    let certs = ders
        .iter()
        .map(|der| {
            parse_x509_certificate(der)
                .map(|(_, cert)| cert)
                .map_err(|e| format!("unparsable certificate: {e}"))
        })
        .collect::<Result<Vec<X509Certificate<'_>>, String>>()?;
    let (Some(leaf), Some(root)) = (certs.first(), certs.last()) else {
        return Err("empty certificate chain".into());
    };

    let at = ASN1Time::from_timestamp(now).map_err(|e| e.to_string())?;
    for (index, cert) in certs.iter().enumerate() {
        if !cert.validity().is_valid_at(at) {
            return Err(format!("certificate {index} is outside its validity window"));
        }
        if index > 0 && !is_ca(cert) {
            return Err(format!("certificate {index} issues certificates but is not a CA"));
        }
        let issuer = certs.get(index + 1).unwrap_or(cert);
        if cert.issuer() != issuer.subject() {
            return Err(format!("certificate {index} issuer does not match its parent"));
        }
        cert.verify_signature(Some(issuer.public_key()))
            .map_err(|e| format!("certificate {index} signature: {e}"))?;
    }

    if root.issuer() != root.subject() {
        return Err("chain does not end in a self-signed root".into());
    }
    if root.public_key().raw != anchor.spki.as_slice() {
        return Err("root is not the trusted anchor".into());
    }
    Ok(leaf.public_key().subject_public_key.data.to_vec())
}

fn is_ca(cert: &X509Certificate<'_>) -> bool {
    matches!(cert.basic_constraints(), Ok(Some(ext)) if ext.value.ca)
}
