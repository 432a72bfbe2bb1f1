// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local attestation: quotes and RA-TLS certificates for this enclave.

use std::sync::Arc;
use std::time::SystemTime;

use chrono::Duration;
use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    KeyUsagePurpose, SerialNumber,
};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::device::AttestationDevice;
use crate::quote::layout::REPORT_DATA_LEN;

use super::certificate::{RaTlsCertificate, SGX_QUOTE_OID};
use super::identity::IdentityKey;
use super::AttestationError;

/// Subject common name of every node certificate.
pub const CERTIFICATE_CN: &str = "X-Chain-Node";

/// Certificate lifetime.
pub const CERTIFICATE_VALIDITY_HOURS: i64 = 24;

/// Owns the attestation device and the node identity key.
pub struct AttestorLocal {
    device: Box<dyn AttestationDevice>,
    identity: Arc<IdentityKey>,
    clock: Arc<dyn Clock>,
}

impl AttestorLocal {
    /// Take ownership of `device` and generate a fresh P-384 identity.
    pub fn new(device: Box<dyn AttestationDevice>, clock: Arc<dyn Clock>) -> Result<Self, AttestationError> {
        let identity = IdentityKey::generate()?;
        debug!(device = device.name(), "Local attestor created");
        Ok(Self {
            device,
            identity: Arc::new(identity),
            clock,
        })
    }

    pub fn identity(&self) -> &Arc<IdentityKey> {
        &self.identity
    }

    pub fn device(&self) -> &dyn AttestationDevice {
        self.device.as_ref()
    }

    /// Quote binding `report_data` (at most 64 bytes, zero-padded).
    pub fn generate_quote(&self, report_data: &[u8]) -> Result<Vec<u8>, AttestationError> {
        quote_with(self.device.as_ref(), report_data)
    }

    /// Self-signed certificate carrying a quote over the identity public key.
    pub fn generate_certificate(&self) -> Result<RaTlsCertificate, AttestationError> {
        let public_key = self.identity.public_key_raw();
        let bound = &public_key[..public_key.len().min(REPORT_DATA_LEN)];
        let quote = self.generate_quote(bound)?;

        let now = self.clock.now();
        let mut params =
            CertificateParams::new(vec![]).map_err(|e| AttestationError::CertificateGenerationFailed(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CERTIFICATE_CN);
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from(now.timestamp().max(0) as u64));
        params.not_before = SystemTime::from(now).into();
        params.not_after = SystemTime::from(now + Duration::hours(CERTIFICATE_VALIDITY_HOURS)).into();
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(SGX_QUOTE_OID, quote.clone()));

        let cert = params
            .self_signed(self.identity.key_pair())
            .map_err(|e| AttestationError::CertificateGenerationFailed(e.to_string()))?;

        info!(
            component = "attestation",
            device = self.device.name(),
            not_after = %(now + Duration::hours(CERTIFICATE_VALIDITY_HOURS)),
            "RA-TLS certificate generated"
        );
        Ok(RaTlsCertificate::new(cert.der().to_vec(), cert.pem(), quote))
    }
}

/// Pad `report_data` to 64 bytes and read a quote from `device`.
pub(crate) fn quote_with(
    device: &dyn AttestationDevice,
    report_data: &[u8],
) -> Result<Vec<u8>, AttestationError> {
    if report_data.len() > REPORT_DATA_LEN {
        return Err(AttestationError::ReportDataTooLong {
            len: report_data.len(),
        });
    }
    let mut padded = [0u8; REPORT_DATA_LEN];
    padded[..report_data.len()].copy_from_slice(report_data);
    device
        .quote(&padded)
        .map_err(|e| AttestationError::QuoteGenerationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::device::{MockDevice, MockIdentity};
    use crate::quote::{extract_platform_instance_id, Quote};
    use x509_parser::parse_x509_certificate;

    fn attestor() -> AttestorLocal {
        let device = MockDevice::new(MockIdentity::default()).unwrap();
        AttestorLocal::new(Box::new(device), system_clock()).unwrap()
    }

    #[test]
    fn report_data_is_padded() {
        let quote = Quote::parse(&attestor().generate_quote(b"abc").unwrap()).unwrap();
        let mut expected = [0u8; 64];
        expected[..3].copy_from_slice(b"abc");
        assert_eq!(quote.report_data(), &expected);
    }

    #[test]
    fn report_data_over_64_bytes_is_rejected() {
        assert!(matches!(
            attestor().generate_quote(&[0u8; 65]),
            Err(AttestationError::ReportDataTooLong { len: 65 })
        ));
    }

    #[test]
    fn platform_id_is_stable_across_report_data() {
        let a = attestor();
        let first = extract_platform_instance_id(&a.generate_quote(&[1; 64]).unwrap()).unwrap();
        let second = extract_platform_instance_id(&a.generate_quote(&[2; 10]).unwrap()).unwrap();
        assert_eq!(first.as_bytes().len(), 32);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn certificate_carries_quote_bound_to_public_key() {
        let a = attestor();
        let cert = a.generate_certificate().unwrap();
        let (_, parsed) = parse_x509_certificate(cert.der()).unwrap();

        let cn = parsed.subject().iter_common_name().next().unwrap();
        assert_eq!(cn.as_str().unwrap(), CERTIFICATE_CN);

        let validity = parsed.validity();
        assert_eq!(
            validity.not_after.timestamp() - validity.not_before.timestamp(),
            24 * 3600
        );

        let ext = parsed
            .extensions()
            .iter()
            .find(|e| e.oid.to_id_string() == "1.2.840.113741.1.13.1")
            .unwrap();
        assert!(!ext.critical);
        let quote = Quote::parse(ext.value).unwrap();
        let spki = parsed.public_key().subject_public_key.data.as_ref();
        assert_eq!(spki, a.identity().public_key_raw());
        assert_eq!(quote.report_data(), &spki[..64]);
    }
}
