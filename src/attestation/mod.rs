// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Attestation
//!
//! Local side: a node identity key, quotes over caller-chosen report data and
//! self-signed RA-TLS certificates carrying a quote over the identity key.
//!
//! Remote side: [`Verifier`] checks a quote (or an RA-TLS certificate) through
//! the stages of [`VerificationStage`], consulting a [`MeasurementPolicy`]
//! owned by the security-config oracle on every call.
//!
//! | Variant | Attestor | Verifier |
//! |---------|----------|----------|
//! | production enclave | `Local` (Gramine device) | `Dcap` |
//! | library OS did the chain check | `LibOsBacked` | `RaTlsNative` |
//! | tests, no SGX | `Mock` | `Mock` |

pub mod certificate;
pub mod dcap;
pub mod identity;
pub mod libos;
pub mod local;
pub mod policy;
pub mod ratls_native;
pub mod verifier;

#[cfg(test)]
pub(crate) mod fixtures;

use std::sync::Arc;

use crate::clock::Clock;
use crate::device::{AttestationDevice, MockDevice, MockIdentity};
use crate::primitives::Measurement;
use crate::quote::QuoteError;

pub use certificate::{CertificateParts, RaTlsCertificate, SGX_QUOTE_OID};
pub use dcap::{CollateralProvider, DcapVerifier, TcbStatus};
pub use identity::{verify_identity_signature, IdentityKey};
pub use libos::LibOsAttestor;
pub use local::{AttestorLocal, CERTIFICATE_CN, CERTIFICATE_VALIDITY_HOURS};
pub use policy::MeasurementPolicy;
pub use ratls_native::{RaTlsNativeVerifier, RaTlsPolicy};
pub use verifier::{MockVerifier, VerifiedCertificate, VerifiedQuote, Verifier, VerifierOptions};

/// Progress of a single verification call.
///
/// Each failure maps to the last stage that was reached before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerificationStage {
    Parsed,
    SignatureValid,
    ChainValid,
    TcbAcceptable,
    MeasurementWhitelisted,
    Accepted,
}

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("quote parse failed: {0}")]
    QuoteParse(#[from] QuoteError),

    #[error("quote signature invalid: {0}")]
    QuoteSignatureInvalid(String),

    #[error("QE report signature invalid: {0}")]
    QeReportSignatureInvalid(String),

    #[error("PCK certificate chain invalid: {0}")]
    PckChainInvalid(String),

    #[error("TCB out of date: {0}")]
    TcbOutOfDate(String),

    #[error("TCB level revoked")]
    TcbRevoked,

    #[error("QE identity unacceptable: {0}")]
    QeIdentityUnacceptable(String),

    #[error("{kind} {measurement} not whitelisted")]
    MeasurementNotWhitelisted {
        kind: &'static str,
        measurement: Measurement,
    },

    #[error("enclave identity rejected: {0}")]
    EnclaveIdentityRejected(String),

    #[error("certificate has no SGX quote extension")]
    CertificateMissingQuoteExtension,

    #[error("certificate public key does not match quote report data")]
    CertificateKeyQuoteBindingMismatch,

    #[error("certificate malformed: {0}")]
    CertificateMalformed(String),

    #[error("collateral fetch failed: {0}")]
    CollateralFetchFailed(String),

    #[error("report data is {len} bytes, at most 64 allowed")]
    ReportDataTooLong { len: usize },

    #[error("quote generation failed: {0}")]
    QuoteGenerationFailed(String),

    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

impl AttestationError {
    pub fn kind(&self) -> &'static str {
        match self {
            AttestationError::QuoteParse(e) => e.kind(),
            AttestationError::QuoteSignatureInvalid(_) => "quote_signature_invalid",
            AttestationError::QeReportSignatureInvalid(_) => "qe_report_signature_invalid",
            AttestationError::PckChainInvalid(_) => "pck_chain_invalid",
            AttestationError::TcbOutOfDate(_) => "tcb_out_of_date",
            AttestationError::TcbRevoked => "tcb_revoked",
            AttestationError::QeIdentityUnacceptable(_) => "qe_identity_unacceptable",
            AttestationError::MeasurementNotWhitelisted { .. } => "measurement_not_whitelisted",
            AttestationError::EnclaveIdentityRejected(_) => "enclave_identity_rejected",
            AttestationError::CertificateMissingQuoteExtension => {
                "certificate_missing_quote_extension"
            }
            AttestationError::CertificateKeyQuoteBindingMismatch => {
                "certificate_key_quote_binding_mismatch"
            }
            AttestationError::CertificateMalformed(_) => "certificate_malformed",
            AttestationError::CollateralFetchFailed(_) => "collateral_fetch_failed",
            AttestationError::ReportDataTooLong { .. } => "report_data_too_long",
            AttestationError::QuoteGenerationFailed(_) => "quote_generation_failed",
            AttestationError::CertificateGenerationFailed(_) => "certificate_generation_failed",
            AttestationError::KeyGenerationFailed(_) => "key_generation_failed",
            AttestationError::SigningFailed(_) => "signing_failed",
        }
    }

    /// Last verification stage reached before this error, if it is a
    /// verification error at all.
    pub fn stage(&self) -> Option<VerificationStage> {
        use VerificationStage::*;
        match self {
            AttestationError::QuoteParse(_)
            | AttestationError::CertificateMissingQuoteExtension
            | AttestationError::CertificateMalformed(_) => None,
            AttestationError::QuoteSignatureInvalid(_) => Some(Parsed),
            AttestationError::QeReportSignatureInvalid(_)
            | AttestationError::PckChainInvalid(_)
            | AttestationError::CollateralFetchFailed(_) => Some(SignatureValid),
            AttestationError::TcbOutOfDate(_)
            | AttestationError::TcbRevoked
            | AttestationError::QeIdentityUnacceptable(_) => Some(ChainValid),
            AttestationError::MeasurementNotWhitelisted { .. }
            | AttestationError::EnclaveIdentityRejected(_) => Some(TcbAcceptable),
            AttestationError::CertificateKeyQuoteBindingMismatch => Some(MeasurementWhitelisted),
            _ => None,
        }
    }
}

/// Local attestation capability.
pub trait Attest {
    /// Quote binding `report_data` (at most 64 bytes).
    fn generate_quote(&self, report_data: &[u8]) -> Result<Vec<u8>, AttestationError>;

    /// RA-TLS certificate over the node identity key.
    fn generate_certificate(&self) -> Result<RaTlsCertificate, AttestationError>;

    fn identity(&self) -> &Arc<IdentityKey>;
}

impl Attest for AttestorLocal {
    fn generate_quote(&self, report_data: &[u8]) -> Result<Vec<u8>, AttestationError> {
        AttestorLocal::generate_quote(self, report_data)
    }

    fn generate_certificate(&self) -> Result<RaTlsCertificate, AttestationError> {
        AttestorLocal::generate_certificate(self)
    }

    fn identity(&self) -> &Arc<IdentityKey> {
        AttestorLocal::identity(self)
    }
}

/// The attestor variants a node can run with.
pub enum Attestor {
    /// Quotes from the library-OS attestation device.
    Local(AttestorLocal),
    /// Synthesized quotes, no SGX required.
    Mock(AttestorLocal),
    /// Certificate and key produced by the library OS's RA-TLS tooling.
    LibOsBacked(LibOsAttestor),
}

impl Attestor {
    /// Attestor over the real device. Only one may exist per process.
    pub fn local(
        device: Box<dyn AttestationDevice>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AttestationError> {
        Ok(Attestor::Local(AttestorLocal::new(device, clock)?))
    }

    pub fn mock(identity: MockIdentity, clock: Arc<dyn Clock>) -> Result<Self, AttestationError> {
        let device =
            MockDevice::new(identity).map_err(|e| AttestationError::QuoteGenerationFailed(e.to_string()))?;
        Ok(Attestor::Mock(AttestorLocal::new(Box::new(device), clock)?))
    }

    pub fn variant(&self) -> &'static str {
        match self {
            Attestor::Local(_) => "local",
            Attestor::Mock(_) => "mock",
            Attestor::LibOsBacked(_) => "libos",
        }
    }

    fn inner(&self) -> &dyn Attest {
        match self {
            Attestor::Local(a) | Attestor::Mock(a) => a as &dyn Attest,
            Attestor::LibOsBacked(a) => a as &dyn Attest,
        }
    }
}

impl Attest for Attestor {
    fn generate_quote(&self, report_data: &[u8]) -> Result<Vec<u8>, AttestationError> {
        self.inner().generate_quote(report_data)
    }

    fn generate_certificate(&self) -> Result<RaTlsCertificate, AttestationError> {
        self.inner().generate_certificate()
    }

    fn identity(&self) -> &Arc<IdentityKey> {
        self.inner().identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::quote::Quote;

    #[test]
    fn mock_attestor_quotes_with_its_identity() {
        let identity = MockIdentity {
            mr_enclave: Measurement::new([0x5a; 32]),
            ..Default::default()
        };
        let attestor = Attestor::mock(identity, system_clock()).unwrap();
        assert_eq!(attestor.variant(), "mock");
        let quote = Quote::parse(&attestor.generate_quote(b"nonce").unwrap()).unwrap();
        assert_eq!(quote.mr_enclave(), Measurement::new([0x5a; 32]));
    }

    #[test]
    fn stages_follow_the_pipeline_order() {
        assert_eq!(
            AttestationError::QuoteSignatureInvalid("x".into()).stage(),
            Some(VerificationStage::Parsed)
        );
        assert_eq!(AttestationError::TcbRevoked.stage(), Some(VerificationStage::ChainValid));
        let not_listed = AttestationError::MeasurementNotWhitelisted {
            kind: "mr_enclave",
            measurement: Measurement::new([0; 32]),
        };
        assert_eq!(not_listed.kind(), "measurement_not_whitelisted");
        assert_eq!(not_listed.stage(), Some(VerificationStage::TcbAcceptable));
        assert!(VerificationStage::Parsed < VerificationStage::Accepted);
    }
}
