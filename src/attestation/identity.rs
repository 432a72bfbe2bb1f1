// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Node identity key (ECDSA P-384).
//!
//! The same key backs the RA-TLS certificate and signs sync responses.

use std::fmt;

use rcgen::{KeyPair, PKCS_ECDSA_P384_SHA384};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, UnparsedPublicKey, ECDSA_P384_SHA384_FIXED, ECDSA_P384_SHA384_FIXED_SIGNING,
};

use super::AttestationError;

/// Length of an uncompressed P-384 point (`0x04 ‖ x ‖ y`).
pub const P384_PUBLIC_KEY_LEN: usize = 97;
/// Length of a fixed `r ‖ s` P-384 signature.
pub const P384_SIGNATURE_LEN: usize = 96;

pub struct IdentityKey {
    key_pair: KeyPair,
    signer: EcdsaKeyPair,
    rng: SystemRandom,
}

impl IdentityKey {
    pub fn generate() -> Result<Self, AttestationError> {
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)
            .map_err(|e| AttestationError::KeyGenerationFailed(e.to_string()))?;
        Self::from_key_pair(key_pair)
    }

    /// Load a PKCS#8 PEM key. Only P-384 ECDSA keys are accepted.
    pub fn from_pem(pem: &str) -> Result<Self, AttestationError> {
        let key_pair = KeyPair::from_pem(pem)
            .map_err(|e| AttestationError::KeyGenerationFailed(e.to_string()))?;
        if key_pair.algorithm() != &PKCS_ECDSA_P384_SHA384 {
            return Err(AttestationError::KeyGenerationFailed(
                "identity key must be ECDSA P-384".into(),
            ));
        }
        Self::from_key_pair(key_pair)
    }

    fn from_key_pair(key_pair: KeyPair) -> Result<Self, AttestationError> {
        let rng = SystemRandom::new();
        let signer =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_FIXED_SIGNING, &key_pair.serialize_der(), &rng)
                .map_err(|e| AttestationError::KeyGenerationFailed(e.to_string()))?;
        Ok(Self {
            key_pair,
            signer,
            rng,
        })
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Uncompressed public point.
    pub fn public_key_raw(&self) -> &[u8] {
        self.key_pair.public_key_raw()
    }

    /// Fixed-width `r ‖ s` signature over `message` (SHA-384).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, AttestationError> {
        self.signer
            .sign(&self.rng, message)
            .map(|sig| sig.as_ref().to_vec())
            .map_err(|e| AttestationError::SigningFailed(e.to_string()))
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("public_key", &hex::encode(self.public_key_raw()))
            .finish_non_exhaustive()
    }
}

/// Check a signature made by [`IdentityKey::sign`].
pub fn verify_identity_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    UnparsedPublicKey::new(&ECDSA_P384_SHA384_FIXED, public_key)
        .verify(message, signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = IdentityKey::generate().unwrap();
        assert_eq!(key.public_key_raw().len(), P384_PUBLIC_KEY_LEN);
        let sig = key.sign(b"sync response").unwrap();
        assert_eq!(sig.len(), P384_SIGNATURE_LEN);
        assert!(verify_identity_signature(key.public_key_raw(), b"sync response", &sig));
        assert!(!verify_identity_signature(key.public_key_raw(), b"other", &sig));

        let other = IdentityKey::generate().unwrap();
        assert!(!verify_identity_signature(other.public_key_raw(), b"sync response", &sig));
    }

    #[test]
    fn pem_roundtrip_keeps_public_key() {
        let key = IdentityKey::generate().unwrap();
        let loaded = IdentityKey::from_pem(&key.key_pair().serialize_pem()).unwrap();
        assert_eq!(loaded.public_key_raw(), key.public_key_raw());
    }

    #[test]
    fn rejects_other_curves() {
        let p256 = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        assert!(matches!(
            IdentityKey::from_pem(&p256.serialize_pem()),
            Err(AttestationError::KeyGenerationFailed(_))
        ));
    }
}
