// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity-only verification against the exported `RA_TLS_*` policy.
//!
//! Used when the library OS already validated the DCAP chain during the TLS
//! handshake. The policy is re-read from the process environment on every
//! call because the oracle rewrites it on each refresh. A variable that is
//! unset or set to `any` does not constrain.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{
    RA_TLS_CERT_TIMESTAMP_NOT_AFTER_ENV, RA_TLS_CERT_TIMESTAMP_NOT_BEFORE_ENV,
    RA_TLS_ISV_PROD_ID_ENV, RA_TLS_ISV_SVN_ENV, RA_TLS_MRENCLAVE_ENV, RA_TLS_MRSIGNER_ENV,
};
use crate::primitives::{Measurement, MrEnclave, MrSigner};

use super::certificate::CertificateParts;
use super::policy::MeasurementPolicy;
use super::verifier::{check_measurements, parse_dcap, VerifiedQuote, VerifierOptions};
use super::AttestationError;

/// Snapshot of the six `RA_TLS_*` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaTlsPolicy {
    pub mr_enclave: Option<MrEnclave>,
    pub mr_signer: Option<MrSigner>,
    pub isv_prod_id: Option<u16>,
    /// Minimum ISV SVN.
    pub isv_svn: Option<u16>,
    pub cert_not_before: Option<i64>,
    pub cert_not_after: Option<i64>,
}

impl RaTlsPolicy {
    pub fn from_env() -> Result<Self, AttestationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AttestationError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("any"))
        };
        Ok(Self {
            mr_enclave: get(RA_TLS_MRENCLAVE_ENV)
                .map(|v| parse_value::<Measurement>(RA_TLS_MRENCLAVE_ENV, &v))
                .transpose()?,
            mr_signer: get(RA_TLS_MRSIGNER_ENV)
                .map(|v| parse_value::<Measurement>(RA_TLS_MRSIGNER_ENV, &v))
                .transpose()?,
            isv_prod_id: get(RA_TLS_ISV_PROD_ID_ENV)
                .map(|v| parse_value::<u16>(RA_TLS_ISV_PROD_ID_ENV, &v))
                .transpose()?,
            isv_svn: get(RA_TLS_ISV_SVN_ENV)
                .map(|v| parse_value::<u16>(RA_TLS_ISV_SVN_ENV, &v))
                .transpose()?,
            cert_not_before: get(RA_TLS_CERT_TIMESTAMP_NOT_BEFORE_ENV)
                .map(|v| parse_value::<i64>(RA_TLS_CERT_TIMESTAMP_NOT_BEFORE_ENV, &v))
                .transpose()?,
            cert_not_after: get(RA_TLS_CERT_TIMESTAMP_NOT_AFTER_ENV)
                .map(|v| parse_value::<i64>(RA_TLS_CERT_TIMESTAMP_NOT_AFTER_ENV, &v))
                .transpose()?,
        })
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AttestationError> {
    value
        .parse()
        .map_err(|_| AttestationError::EnclaveIdentityRejected(format!("{name} is malformed")))
}

pub struct RaTlsNativeVerifier {
    policy: Arc<dyn MeasurementPolicy>,
    clock: Arc<dyn Clock>,
    options: VerifierOptions,
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl RaTlsNativeVerifier {
    pub fn new(policy: Arc<dyn MeasurementPolicy>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            options: VerifierOptions::default(),
            lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    pub fn with_options(mut self, options: VerifierOptions) -> Self {
        self.options = options;
        self
    }

    /// Read the policy from somewhere other than the process environment.
    pub fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    pub fn options(&self) -> &VerifierOptions {
        &self.options
    }

    fn current_policy(&self) -> Result<RaTlsPolicy, AttestationError> {
        RaTlsPolicy::from_lookup(|name| (self.lookup)(name))
    }

    pub(crate) fn verify_quote(&self, raw: &[u8]) -> Result<VerifiedQuote, AttestationError> {
        let quote = parse_dcap(raw)?;
        let policy = self.current_policy()?;

        if let Some(expected) = policy.mr_enclave {
            if quote.mr_enclave() != expected {
                return Err(AttestationError::MeasurementNotWhitelisted {
                    kind: "mr_enclave",
                    measurement: quote.mr_enclave(),
                });
            }
        }
        if let Some(expected) = policy.mr_signer {
            if quote.mr_signer() != expected {
                return Err(AttestationError::MeasurementNotWhitelisted {
                    kind: "mr_signer",
                    measurement: quote.mr_signer(),
                });
            }
        }
        if let Some(expected) = policy.isv_prod_id {
            if quote.isv_prod_id() != expected {
                return Err(AttestationError::EnclaveIdentityRejected(format!(
                    "isv_prod_id {} != {expected}",
                    quote.isv_prod_id()
                )));
            }
        }
        if let Some(minimum) = policy.isv_svn {
            if quote.isv_svn() < minimum {
                return Err(AttestationError::EnclaveIdentityRejected(format!(
                    "isv_svn {} < {minimum}",
                    quote.isv_svn()
                )));
            }
        }

        check_measurements(self.policy.as_ref(), &quote)?;
        Ok(VerifiedQuote {
            quote,
            tcb_status: None,
        })
    }

    /// The certificate must be current and inside the exported window.
    pub(crate) fn check_certificate_window(&self, parts: &CertificateParts) -> Result<(), AttestationError> {
        let now = self.clock.unix_now();
        if now < parts.not_before || now > parts.not_after {
            return Err(AttestationError::CertificateMalformed(
                "certificate is not currently valid".into(),
            ));
        }
        let policy = self.current_policy()?;
        if policy.cert_not_before.is_some_and(|t| parts.not_before < t)
            || policy.cert_not_after.is_some_and(|t| parts.not_after > t)
        {
            return Err(AttestationError::EnclaveIdentityRejected(
                "certificate validity outside the permitted window".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::attestation::{AttestorLocal, Verifier};
    use crate::clock::system_clock;
    use crate::device::{MockDevice, MockIdentity};
    use crate::oracle::MeasurementWhitelist;

    fn verifier(vars: &[(&str, &str)]) -> Verifier {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Verifier::RaTlsNative(
            RaTlsNativeVerifier::new(Arc::new(MeasurementWhitelist::new(false)), system_clock())
                .with_lookup(move |name| vars.get(name).cloned()),
        )
    }

    fn attestor() -> AttestorLocal {
        let device = MockDevice::new(MockIdentity::default()).unwrap();
        AttestorLocal::new(Box::new(device), system_clock()).unwrap()
    }

    #[test]
    fn any_and_unset_do_not_constrain() {
        let policy = RaTlsPolicy::from_lookup(|name| {
            (name == RA_TLS_MRENCLAVE_ENV).then(|| "any".to_string())
        })
        .unwrap();
        assert_eq!(policy, RaTlsPolicy::default());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = RaTlsPolicy::from_lookup(|name| {
            (name == RA_TLS_ISV_SVN_ENV).then(|| "seven".to_string())
        })
        .unwrap_err();
        assert_eq!(err.kind(), "enclave_identity_rejected");
    }

    #[tokio::test]
    async fn enforces_exported_identity() {
        let quote = attestor().generate_quote(&[]).unwrap();
        let mr_enclave = MockIdentity::default().mr_enclave.to_hex();

        let ok = verifier(&[
            (RA_TLS_MRENCLAVE_ENV, mr_enclave.as_str()),
            (RA_TLS_ISV_PROD_ID_ENV, "1"),
            (RA_TLS_ISV_SVN_ENV, "1"),
        ]);
        assert!(ok.verify_quote(&quote).await.is_ok());

        let wrong_enclave = verifier(&[(RA_TLS_MRENCLAVE_ENV, &"33".repeat(32))]);
        assert_eq!(
            wrong_enclave.verify_quote(&quote).await.unwrap_err().kind(),
            "measurement_not_whitelisted"
        );

        let svn_too_low = verifier(&[(RA_TLS_ISV_SVN_ENV, "2")]);
        assert_eq!(
            svn_too_low.verify_quote(&quote).await.unwrap_err().kind(),
            "enclave_identity_rejected"
        );
    }

    #[tokio::test]
    async fn certificate_window_is_enforced() {
        let cert = attestor().generate_certificate().unwrap();
        let now = chrono::Utc::now().timestamp();

        let open = verifier(&[]);
        assert!(open.verify_certificate(cert.der()).await.is_ok());

        let not_after = (now + 3600).to_string();
        let narrow = verifier(&[(RA_TLS_CERT_TIMESTAMP_NOT_AFTER_ENV, not_after.as_str())]);
        assert_eq!(
            narrow.verify_certificate(cert.der()).await.unwrap_err().kind(),
            "enclave_identity_rejected"
        );
    }
}
