// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RA-TLS certificates.
//!
//! The quote travels as the raw value of the non-critical extension
//! `1.2.840.113741.1.13.1`; its `report_data` commits to the first 64 bytes
//! of the certificate's uncompressed subject public key.

use std::fmt;

use x509_parser::parse_x509_certificate;

use crate::quote::layout::REPORT_DATA_LEN;

use super::AttestationError;

/// Extension OID holding the SGX quote.
pub const SGX_QUOTE_OID: &[u64] = &[1, 2, 840, 113741, 1, 13, 1];
const SGX_QUOTE_OID_STR: &str = "1.2.840.113741.1.13.1";

/// A certificate produced for (or by) this node.
#[derive(Clone)]
pub struct RaTlsCertificate {
    der: Vec<u8>,
    pem: String,
    quote: Vec<u8>,
}

impl RaTlsCertificate {
    pub(crate) fn new(der: Vec<u8>, pem: String, quote: Vec<u8>) -> Self {
        Self { der, pem, quote }
    }

    /// Parse a PEM certificate produced elsewhere (e.g. by the library OS).
    pub fn from_pem(pem: &str) -> Result<Self, AttestationError> {
        let block = pem::parse(pem).map_err(|e| AttestationError::CertificateMalformed(e.to_string()))?;
        let der = block.into_contents();
        let parts = CertificateParts::parse(&der)?;
        let quote = parts.quote;
        Ok(Self {
            pem: pem.to_owned(),
            der,
            quote,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn quote(&self) -> &[u8] {
        &self.quote
    }
}

impl fmt::Debug for RaTlsCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaTlsCertificate")
            .field("der_len", &self.der.len())
            .field("quote_len", &self.quote.len())
            .finish()
    }
}

/// Pieces of an RA-TLS certificate the verifier needs.
#[derive(Debug, Clone)]
pub struct CertificateParts {
    pub quote: Vec<u8>,
    /// Uncompressed subject public key.
    pub public_key: Vec<u8>,
    pub not_before: i64,
    pub not_after: i64,
}

impl CertificateParts {
    pub fn parse(der: &[u8]) -> Result<Self, AttestationError> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| AttestationError::CertificateMalformed(e.to_string()))?;
        let quote = cert
            .extensions()
            .iter()
            .find(|ext| ext.oid.to_id_string() == SGX_QUOTE_OID_STR)
            .map(|ext| ext.value.to_vec())
            .ok_or(AttestationError::CertificateMissingQuoteExtension)?;
        let validity = cert.validity();
        Ok(Self {
            quote,
            public_key: cert.public_key().subject_public_key.data.to_vec(),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
        })
    }

    /// Bytes of the public key the quote's `report_data` must commit to.
    pub fn bound_public_key(&self) -> &[u8] {
        &self.public_key[..self.public_key.len().min(REPORT_DATA_LEN)]
    }
}
