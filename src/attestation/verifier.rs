// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote attestation verifiers.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::flavor::BuildFlavor;
use crate::primitives::ct_equal;
use crate::quote::{Quote, QuoteError};

use super::certificate::CertificateParts;
use super::dcap::{DcapVerifier, TcbStatus};
use super::policy::MeasurementPolicy;
use super::ratls_native::RaTlsNativeVerifier;
use super::{AttestationError, VerificationStage};

/// Knobs shared by all verifier variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierOptions {
    /// Admit `OutOfDate` and `Configuration*` TCB levels.
    pub allow_outdated_tcb: bool,
    /// Take the first TCB level instead of comparing component SVNs.
    pub permissive_tcb_match: bool,
    pub flavor: BuildFlavor,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            allow_outdated_tcb: false,
            permissive_tcb_match: false,
            flavor: BuildFlavor::CURRENT,
        }
    }
}

/// A quote that passed every stage.
#[derive(Debug, Clone)]
pub struct VerifiedQuote {
    pub quote: Quote,
    /// Platform TCB status, when the verifier evaluated collateral.
    pub tcb_status: Option<TcbStatus>,
}

impl VerifiedQuote {
    pub fn stage(&self) -> VerificationStage {
        VerificationStage::Accepted
    }
}

/// An RA-TLS certificate whose quote passed and whose key is bound to it.
#[derive(Debug, Clone)]
pub struct VerifiedCertificate {
    pub quote: VerifiedQuote,
    /// Uncompressed subject public key.
    pub public_key: Vec<u8>,
}

/// The verifier variants a node can run with.
pub enum Verifier {
    /// Full DCAP: signatures, PCK chain, TCB Info and QE Identity.
    Dcap(DcapVerifier),
    /// Identity checks only; the library OS verified the chain during the handshake.
    RaTlsNative(RaTlsNativeVerifier),
    /// Parse and whitelist only. Test builds.
    Mock(MockVerifier),
}

impl Verifier {
    pub fn variant(&self) -> &'static str {
        match self {
            Verifier::Dcap(_) => "dcap",
            Verifier::RaTlsNative(_) => "ratls_native",
            Verifier::Mock(_) => "mock",
        }
    }

    pub fn options(&self) -> &VerifierOptions {
        match self {
            Verifier::Dcap(v) => v.options(),
            Verifier::RaTlsNative(v) => v.options(),
            Verifier::Mock(v) => &v.options,
        }
    }

    pub async fn verify_quote(&self, raw: &[u8]) -> Result<VerifiedQuote, AttestationError> {
        let result = match self {
            Verifier::Dcap(v) => v.verify_quote(raw).await,
            Verifier::RaTlsNative(v) => v.verify_quote(raw),
            Verifier::Mock(v) => v.verify_quote(raw),
        };
        match &result {
            Ok(verified) => debug!(
                component = "attestation",
                verifier = self.variant(),
                mr_enclave = %verified.quote.mr_enclave(),
                "Quote accepted"
            ),
            Err(e) => warn!(
                component = "attestation",
                verifier = self.variant(),
                kind = e.kind(),
                stage = ?e.stage(),
                error = %e,
                "Quote rejected"
            ),
        }
        result
    }

    /// Verify an RA-TLS certificate: its quote, then the key binding.
    pub async fn verify_certificate(&self, der: &[u8]) -> Result<VerifiedCertificate, AttestationError> {
        let parts = CertificateParts::parse(der)?;
        if let Verifier::RaTlsNative(v) = self {
            v.check_certificate_window(&parts)?;
        }
        let verified = self.verify_quote(&parts.quote).await?;

        if self.options().flavor.skips_report_data_binding() {
            debug!(
                component = "attestation",
                flavor = self.options().flavor.as_str(),
                "Certificate key binding not compared"
            );
        } else {
            let bound = parts.bound_public_key();
            let report_data = &verified.quote.report_data()[..bound.len()];
            let matches = ct_equal(bound, report_data)
                .map_err(|_| AttestationError::CertificateKeyQuoteBindingMismatch)?;
            if !matches {
                warn!(
                    component = "attestation",
                    kind = "certificate_key_quote_binding_mismatch",
                    "Certificate rejected"
                );
                return Err(AttestationError::CertificateKeyQuoteBindingMismatch);
            }
        }

        Ok(VerifiedCertificate {
            quote: verified,
            public_key: parts.public_key,
        })
    }
}

/// Parses the quote and applies the measurement policy, nothing more.
pub struct MockVerifier {
    policy: Arc<dyn MeasurementPolicy>,
    options: VerifierOptions,
}

impl MockVerifier {
    #[cfg(any(test, feature = "testenv"))]
    pub fn new(policy: Arc<dyn MeasurementPolicy>, options: VerifierOptions) -> Self {
        Self { policy, options }
    }

    fn verify_quote(&self, raw: &[u8]) -> Result<VerifiedQuote, AttestationError> {
        let quote = parse_dcap(raw)?;
        check_measurements(self.policy.as_ref(), &quote)?;
        Ok(VerifiedQuote {
            quote,
            tcb_status: None,
        })
    }
}

/// Parse and require an ECDSA (DCAP) signature type.
pub(crate) fn parse_dcap(raw: &[u8]) -> Result<Quote, AttestationError> {
    let quote = Quote::parse(raw)?;
    if !quote.sign_type().is_dcap() {
        return Err(QuoteError::UnsupportedSignType(quote.sign_type().as_u16()).into());
    }
    Ok(quote)
}

/// Last stage of every variant: both measurements must be admitted.
pub(crate) fn check_measurements(
    policy: &dyn MeasurementPolicy,
    quote: &Quote,
) -> Result<(), AttestationError> {
    let mr_enclave = quote.mr_enclave();
    if !policy.is_allowed_mr_enclave(&mr_enclave) {
        return Err(AttestationError::MeasurementNotWhitelisted {
            kind: "mr_enclave",
            measurement: mr_enclave,
        });
    }
    let mr_signer = quote.mr_signer();
    if !policy.is_allowed_mr_signer(&mr_signer) {
        return Err(AttestationError::MeasurementNotWhitelisted {
            kind: "mr_signer",
            measurement: mr_signer,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::AttestorLocal;
    use crate::clock::system_clock;
    use crate::device::{MockDevice, MockIdentity};
    use crate::oracle::MeasurementWhitelist;
    use crate::primitives::Measurement;
    use crate::quote::{QuoteBuilder, SignType};

    fn attestor() -> AttestorLocal {
        let device = MockDevice::new(MockIdentity::default()).unwrap();
        AttestorLocal::new(Box::new(device), system_clock()).unwrap()
    }

    fn mock(whitelist: Arc<MeasurementWhitelist>, flavor: BuildFlavor) -> Verifier {
        Verifier::Mock(MockVerifier::new(
            whitelist,
            VerifierOptions {
                flavor,
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn accepts_own_certificate_with_binding_checked() {
        let attestor = attestor();
        let cert = attestor.generate_certificate().unwrap();
        let verifier = mock(Arc::new(MeasurementWhitelist::new(false)), BuildFlavor::Production);
        let verified = verifier.verify_certificate(cert.der()).await.unwrap();
        assert_eq!(verified.public_key, attestor.identity().public_key_raw());
        assert_eq!(verified.quote.stage(), VerificationStage::Accepted);
    }

    #[tokio::test]
    async fn binding_mismatch_is_rejected_in_production_only() {
        // Certificate from one identity, quote bound to another.
        let a = attestor();
        let b = attestor();
        let quote = b
            .generate_quote(&b.identity().public_key_raw()[..64])
            .unwrap();
        let mut params = rcgen::CertificateParams::new(vec![]).unwrap();
        params.custom_extensions.push(rcgen::CustomExtension::from_oid_content(
            crate::attestation::SGX_QUOTE_OID,
            quote,
        ));
        let cert = params.self_signed(a.identity().key_pair()).unwrap();

        let whitelist = Arc::new(MeasurementWhitelist::new(false));
        let production = mock(whitelist.clone(), BuildFlavor::Production);
        assert!(matches!(
            production.verify_certificate(cert.der()).await,
            Err(AttestationError::CertificateKeyQuoteBindingMismatch)
        ));
        let testenv = mock(whitelist, BuildFlavor::TestEnv);
        assert!(testenv.verify_certificate(cert.der()).await.is_ok());
    }

    #[tokio::test]
    async fn whitelist_is_consulted_on_every_call() {
        let whitelist = Arc::new(MeasurementWhitelist::new(true));
        whitelist.add_allowed_mr_enclave(Measurement::new([0xaa; 32]));
        let verifier = mock(whitelist.clone(), BuildFlavor::Production);
        let quote = attestor().generate_quote(&[]).unwrap();

        let err = verifier.verify_quote(&quote).await.unwrap_err();
        assert!(matches!(
            err,
            AttestationError::MeasurementNotWhitelisted { kind: "mr_enclave", .. }
        ));

        whitelist.add_allowed_mr_enclave(MockIdentity::default().mr_enclave);
        assert!(verifier.verify_quote(&quote).await.is_ok());
    }

    #[tokio::test]
    async fn mr_signer_list_applies_too() {
        let whitelist = Arc::new(MeasurementWhitelist::new(false));
        whitelist.add_allowed_mr_signer(Measurement::new([0x01; 32]));
        let verifier = mock(whitelist, BuildFlavor::Production);
        let quote = attestor().generate_quote(&[]).unwrap();
        assert!(matches!(
            verifier.verify_quote(&quote).await,
            Err(AttestationError::MeasurementNotWhitelisted { kind: "mr_signer", .. })
        ));
    }

    #[tokio::test]
    async fn epid_quotes_are_rejected() {
        let verifier = mock(Arc::new(MeasurementWhitelist::new(false)), BuildFlavor::Production);
        let raw = QuoteBuilder::new(3, SignType::EpidLinkable).build().to_bytes();
        let err = verifier.verify_quote(&raw).await.unwrap_err();
        assert_eq!(err.kind(), "unsupported_sign_type");
    }

    #[tokio::test]
    async fn certificate_without_quote_is_rejected() {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).unwrap();
        let cert = rcgen::CertificateParams::new(vec![])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let verifier = mock(Arc::new(MeasurementWhitelist::new(false)), BuildFlavor::Production);
        assert!(matches!(
            verifier.verify_certificate(cert.der()).await,
            Err(AttestationError::CertificateMissingQuoteExtension)
        ));
    }
}
