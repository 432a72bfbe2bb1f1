// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RA-TLS credentials produced by the library OS.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::device::AttestationDevice;

use super::certificate::{CertificateParts, RaTlsCertificate};
use super::identity::IdentityKey;
use super::local::quote_with;
use super::{Attest, AttestationError};

/// Serves a certificate and key pair written by the library OS's RA-TLS
/// tooling instead of minting its own.
pub struct LibOsAttestor {
    device: Box<dyn AttestationDevice>,
    identity: Arc<IdentityKey>,
    certificate: RaTlsCertificate,
}

impl LibOsAttestor {
    /// Load PEM credentials. The key must be the certificate's subject key.
    pub fn load(
        device: Box<dyn AttestationDevice>,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<Self, AttestationError> {
        let cert_pem = read_pem(cert_path)?;
        let key_pem = read_pem(key_path)?;
        let certificate = RaTlsCertificate::from_pem(&cert_pem)?;
        let identity = IdentityKey::from_pem(&key_pem)?;

        let parts = CertificateParts::parse(certificate.der())?;
        if parts.public_key != identity.public_key_raw() {
            return Err(AttestationError::CertificateMalformed(
                "key file does not match certificate".into(),
            ));
        }

        info!(
            component = "attestation",
            cert = %cert_path.display(),
            "Loaded library-OS RA-TLS credentials"
        );
        Ok(Self {
            device,
            identity: Arc::new(identity),
            certificate,
        })
    }
}

fn read_pem(path: &Path) -> Result<String, AttestationError> {
    std::fs::read_to_string(path).map_err(|e| {
        AttestationError::CertificateMalformed(format!("{}: {e}", path.display()))
    })
}

impl Attest for LibOsAttestor {
    fn generate_quote(&self, report_data: &[u8]) -> Result<Vec<u8>, AttestationError> {
        quote_with(self.device.as_ref(), report_data)
    }

    fn generate_certificate(&self) -> Result<RaTlsCertificate, AttestationError> {
        Ok(self.certificate.clone())
    }

    fn identity(&self) -> &Arc<IdentityKey> {
        &self.identity
    }
}
