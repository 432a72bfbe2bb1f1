// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RSA-3072 / exponent 3 signature verification.
//!
//! SGX enclave signing keys are RSA-3072 with public exponent 3, and both the
//! SIGSTRUCT and the detached manifest `.sig` store integers little-endian.
//! Only verification is needed inside the enclave, so this is a direct
//! `s^3 mod n` followed by a PKCS#1 v1.5 encoding check.

use num_bigint::BigUint;

use super::{ct::ct_equal, PrimitiveError};

/// Byte length of an RSA-3072 modulus or signature.
pub const RSA3072_KEY_BYTES: usize = 384;

/// DER `DigestInfo` prefix for SHA-256 (RFC 8017, section 9.2 note 1).
const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];

const DIGEST_LEN: usize = 32;

/// Expected encoded message without the trailing digest:
/// `0x00 || 0x01 || 0xFF.. || 0x00 || DigestInfo`.
fn expected_prefix() -> [u8; RSA3072_KEY_BYTES - DIGEST_LEN] {
    let mut prefix = [0xffu8; RSA3072_KEY_BYTES - DIGEST_LEN];
    prefix[0] = 0x00;
    prefix[1] = 0x01;
    let info_start = prefix.len() - SHA256_DIGEST_INFO.len();
    prefix[info_start - 1] = 0x00;
    prefix[info_start..].copy_from_slice(&SHA256_DIGEST_INFO);
    prefix
}

/// Verify an RSA-3072, e = 3, PKCS#1 v1.5 signature over a SHA-256 digest.
///
/// `modulus_le` and `signature_le` are 384-byte little-endian magnitudes, as
/// stored in SIGSTRUCT and in the detached manifest signature.
pub fn rsa3072_exp3_pkcs1v15_verify(
    modulus_le: &[u8],
    signature_le: &[u8],
    sha256_digest: &[u8; 32],
) -> Result<(), PrimitiveError> {
    if modulus_le.len() != RSA3072_KEY_BYTES {
        return Err(PrimitiveError::ModulusSizeInvalid);
    }
    if signature_le.len() != RSA3072_KEY_BYTES {
        return Err(PrimitiveError::LengthMismatch {
            left: signature_le.len(),
            right: RSA3072_KEY_BYTES,
        });
    }

    let modulus = BigUint::from_bytes_le(modulus_le);
    if modulus.bits() != 3072 {
        return Err(PrimitiveError::ModulusSizeInvalid);
    }
    let signature = BigUint::from_bytes_le(signature_le);
    if signature >= modulus {
        return Err(PrimitiveError::BadPadding);
    }

    let message = signature.modpow(&BigUint::from(3u32), &modulus).to_bytes_be();
    if message.len() > RSA3072_KEY_BYTES {
        return Err(PrimitiveError::BadPadding);
    }
    // Left-pad to the modulus size; the leading 0x00 is dropped by to_bytes_be.
    let mut encoded = [0u8; RSA3072_KEY_BYTES];
    encoded[RSA3072_KEY_BYTES - message.len()..].copy_from_slice(&message);

    let (prefix, digest) = encoded.split_at(RSA3072_KEY_BYTES - DIGEST_LEN);
    if !ct_equal(prefix, &expected_prefix())? {
        return Err(PrimitiveError::BadPadding);
    }
    if !ct_equal(digest, sha256_digest)? {
        return Err(PrimitiveError::DigestMismatch);
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_key::{primary, secondary};
    use super::*;
    use crate::primitives::sha256;

    #[test]
    fn accepts_valid_signature() {
        let key = primary();
        let digest = sha256(b"enclave manifest");
        let sig = key.sign_digest(&digest);
        rsa3072_exp3_pkcs1v15_verify(&key.modulus_le(), &sig, &digest).unwrap();
    }

    #[test]
    fn rejects_single_bit_flips() {
        let key = primary();
        let message = b"enclave manifest".to_vec();
        let digest = sha256(&message);
        let sig = key.sign_digest(&digest);
        let modulus = key.modulus_le();

        let mut tampered_message = message.clone();
        tampered_message[3] ^= 0x01;
        assert_eq!(
            rsa3072_exp3_pkcs1v15_verify(&modulus, &sig, &sha256(&tampered_message)),
            Err(PrimitiveError::DigestMismatch)
        );

        for byte in [0usize, 17, 200, 383] {
            let mut bad_sig = sig;
            bad_sig[byte] ^= 0x04;
            assert!(rsa3072_exp3_pkcs1v15_verify(&modulus, &bad_sig, &digest).is_err());
        }

        for byte in [0usize, 100, 382] {
            let mut bad_modulus = modulus;
            bad_modulus[byte] ^= 0x02;
            assert!(rsa3072_exp3_pkcs1v15_verify(&bad_modulus, &sig, &digest).is_err());
        }
    }

    #[test]
    fn rejects_signature_from_other_key() {
        let digest = sha256(b"payload");
        let sig = secondary().sign_digest(&digest);
        assert!(rsa3072_exp3_pkcs1v15_verify(&primary().modulus_le(), &sig, &digest).is_err());
    }

    #[test]
    fn rejects_bad_padding() {
        let key = primary();
        let digest = sha256(b"payload");
        let mut encoded = expected_prefix().to_vec();
        encoded.extend_from_slice(&digest);
        encoded[1] = 0x02;
        let sig = key.sign_raw(&encoded);
        assert_eq!(
            rsa3072_exp3_pkcs1v15_verify(&key.modulus_le(), &sig, &digest),
            Err(PrimitiveError::BadPadding)
        );
    }

    #[test]
    fn rejects_short_modulus() {
        let digest = sha256(b"payload");
        let mut modulus = primary().modulus_le();
        modulus[383] = 0;
        modulus[382] = 0;
        assert_eq!(
            rsa3072_exp3_pkcs1v15_verify(&modulus, &[1u8; 384], &digest),
            Err(PrimitiveError::ModulusSizeInvalid)
        );
        assert_eq!(
            rsa3072_exp3_pkcs1v15_verify(&modulus[..256], &[1u8; 384], &digest),
            Err(PrimitiveError::ModulusSizeInvalid)
        );
    }

    #[test]
    fn rejects_wrong_signature_length() {
        let key = primary();
        assert!(matches!(
            rsa3072_exp3_pkcs1v15_verify(&key.modulus_le(), &[1u8; 383], &[0u8; 32]),
            Err(PrimitiveError::LengthMismatch { .. })
        ));
    }
}
