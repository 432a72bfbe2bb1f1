// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! DCAP quote verification.
//!
//! ```text
//! parse ─▶ attestation-key signature ─▶ QE binding ─▶ PCK chain ─▶ QE report signature
//!   ─▶ TCB Info level ─▶ QE Identity ─▶ measurement policy ─▶ accepted
//! ```

pub mod chain;
pub mod collateral;
pub mod pcs;
pub mod tcb;

use std::sync::Arc;

use ring::signature::{
    UnparsedPublicKey, VerificationAlgorithm, ECDSA_P256_SHA256_FIXED, ECDSA_P384_SHA384_FIXED,
};
use tracing::debug;

use crate::clock::Clock;
use crate::primitives::{ct_equal, sha256_concat};
use crate::quote::layout::CERT_DATA_PCK_CHAIN;
use crate::quote::{pck_chain_ders, QuoteError, SgxPckExtension, SignType};

use super::policy::MeasurementPolicy;
use super::verifier::{check_measurements, parse_dcap, VerifiedQuote, VerifierOptions};
use super::AttestationError;

pub use chain::TrustAnchor;
pub use collateral::{CollateralProvider, QeIdentity, SignedCollateral, StaticCollateral, TcbInfo};
pub use pcs::{CollateralCache, PcsCollateralFetcher};
pub use tcb::TcbStatus;

pub struct DcapVerifier {
    policy: Arc<dyn MeasurementPolicy>,
    collateral: Arc<dyn CollateralProvider>,
    anchor: TrustAnchor,
    clock: Arc<dyn Clock>,
    options: VerifierOptions,
}

impl DcapVerifier {
    pub fn new(
        policy: Arc<dyn MeasurementPolicy>,
        collateral: Arc<dyn CollateralProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            collateral,
            anchor: TrustAnchor::intel(),
            clock,
            options: VerifierOptions::default(),
        }
    }

    pub fn with_trust_anchor(mut self, anchor: TrustAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_options(mut self, options: VerifierOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &VerifierOptions {
        &self.options
    }

    pub async fn verify_quote(&self, raw: &[u8]) -> Result<VerifiedQuote, AttestationError> {
        let quote = parse_dcap(raw)?;
        let ecdsa = quote
            .ecdsa()
            .ok_or(AttestationError::QuoteParse(QuoteError::UnsupportedAttestationKey))?;

        // Parsed -> SignatureValid
        let attestation_key = uncompressed(&ecdsa.attestation_key);
        let algorithm: &'static dyn VerificationAlgorithm = match quote.sign_type() {
            SignType::EcdsaP384 => &ECDSA_P384_SHA384_FIXED,
            _ => &ECDSA_P256_SHA256_FIXED,
        };
        UnparsedPublicKey::new(algorithm, &attestation_key)
            .verify(&quote.signed_region(), &ecdsa.signature)
            .map_err(|_| {
                AttestationError::QuoteSignatureInvalid("attestation key signature".into())
            })?;

        // SignatureValid -> ChainValid
        let qe_report = ecdsa.qe_report();
        let expected = sha256_concat(&[ecdsa.attestation_key.as_slice(), ecdsa.auth_data.as_slice()]);
        let bound = ct_equal(&expected, &qe_report.report_data()[..32])
            .map_err(|e| AttestationError::QeReportSignatureInvalid(e.to_string()))?;
        if !bound {
            return Err(AttestationError::QeReportSignatureInvalid(
                "QE report does not commit to the attestation key".into(),
            ));
        }

        if ecdsa.cert_data_type != CERT_DATA_PCK_CHAIN {
            return Err(AttestationError::PckChainInvalid(format!(
                "certification data type {} carries no PCK chain",
                ecdsa.cert_data_type
            )));
        }
        let now = self.clock.unix_now();
        let ders = pck_chain_ders(&ecdsa.cert_data)
            .map_err(|e| AttestationError::PckChainInvalid(e.to_string()))?;
        let pck_key = chain::verify_chain(&ders, &self.anchor, now)
            .map_err(AttestationError::PckChainInvalid)?;

        let pck_algorithm: &'static dyn VerificationAlgorithm = if pck_key.len() == 97 {
            &ECDSA_P384_SHA384_FIXED
        } else {
            &ECDSA_P256_SHA256_FIXED
        };
        UnparsedPublicKey::new(pck_algorithm, &pck_key)
            .verify(qe_report.as_bytes(), &ecdsa.qe_report_signature)
            .map_err(|_| AttestationError::QeReportSignatureInvalid("PCK signature".into()))?;

        // ChainValid -> TcbAcceptable
        let extension = SgxPckExtension::from_certificate_der(&ders[0])
            .map_err(|e| AttestationError::PckChainInvalid(e.to_string()))?
            .ok_or_else(|| AttestationError::PckChainInvalid("PCK leaf has no SGX extension".into()))?;
        let (Some(fmspc), Some(pck_tcb)) = (extension.fmspc, extension.tcb.as_ref()) else {
            return Err(AttestationError::PckChainInvalid(
                "PCK extension lacks FMSPC or TCB".into(),
            ));
        };

        let tcb_info = self
            .collateral
            .tcb_info(&fmspc)
            .await?
            .open_tcb_info(&self.anchor, now)?;
        let listed_fmspc = hex::decode(&tcb_info.fmspc).unwrap_or_default();
        if listed_fmspc != fmspc {
            return Err(AttestationError::CollateralFetchFailed(format!(
                "TCB info is for FMSPC {}, platform is {}",
                tcb_info.fmspc,
                hex::encode(fmspc)
            )));
        }
        let level = tcb::select_tcb_level(&tcb_info, pck_tcb, self.options.permissive_tcb_match);
        let tcb_status = tcb::evaluate_platform_tcb(level, self.options.allow_outdated_tcb)?;

        let qe_identity = self
            .collateral
            .qe_identity()
            .await?
            .open_qe_identity(&self.anchor, now)?;
        tcb::check_qe_identity(&qe_identity, &qe_report, self.options.allow_outdated_tcb)?;

        // TcbAcceptable -> MeasurementWhitelisted -> Accepted
        check_measurements(self.policy.as_ref(), &quote)?;

        debug!(
            component = "attestation",
            fmspc = %hex::encode(fmspc),
            tcb_status = tcb_status.as_str(),
            "DCAP quote verified"
        );
        Ok(VerifiedQuote {
            quote,
            tcb_status: Some(tcb_status),
        })
    }
}

/// Prefix a raw `x ‖ y` point with the SEC1 uncompressed tag.
fn uncompressed(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 1);
    out.push(0x04);
    out.extend_from_slice(raw);
    out
}
