// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SIGSTRUCT field access.
//!
//! | Offset      | Field                                   |
//! |-------------|-----------------------------------------|
//! | `0..128`    | header (signed)                         |
//! | `128..512`  | RSA-3072 modulus, little-endian         |
//! | `512..516`  | RSA exponent, must be 3                 |
//! | `516..900`  | RSA-3072 signature, little-endian       |
//! | `900..908`  | misc_select + mask (signed)             |
//! | `928..960`  | attributes + mask (signed)              |
//! | `960..992`  | enclave hash / MRENCLAVE (signed)       |
//! | `1024..1028`| isv_prod_id, isv_svn (signed)           |
//! | `1028..1808`| reserved, q1, q2 (unsigned)             |

use std::ops::Range;

use crate::primitives::{
    rsa3072_exp3_pkcs1v15_verify, sha256, sha256_concat, Measurement, MrEnclave, MrSigner,
    PrimitiveError,
};

pub const SIGSTRUCT_LEN: usize = 1808;

const HEADER: Range<usize> = 0..128;
const MODULUS: Range<usize> = 128..512;
const EXPONENT: Range<usize> = 512..516;
const SIGNATURE: Range<usize> = 516..900;
const SIGNED_BODY: Range<usize> = 900..1028;
const MISC_SELECT: Range<usize> = 900..904;
const ATTRIBUTES: Range<usize> = 928..944;
const ENCLAVE_HASH: Range<usize> = 960..992;
const ISV_PROD_ID: Range<usize> = 1024..1026;
const ISV_SVN: Range<usize> = 1026..1028;

const REQUIRED_EXPONENT: u32 = 3;

/// Borrowed view over the first 1808 bytes of a manifest file.
#[derive(Clone, Copy)]
pub struct Sigstruct<'a>(&'a [u8; SIGSTRUCT_LEN]);

impl<'a> Sigstruct<'a> {
    /// `None` when `buf` is shorter than a SIGSTRUCT.
    pub fn new(buf: &'a [u8]) -> Option<Self> {
        buf.get(..SIGSTRUCT_LEN)
            .and_then(|head| <&[u8; SIGSTRUCT_LEN]>::try_from(head).ok())
            .map(Sigstruct)
    }

    pub fn modulus_le(&self) -> &'a [u8] {
        &self.0[MODULUS]
    }

    pub fn exponent(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.0[EXPONENT]);
        u32::from_le_bytes(raw)
    }

    pub fn signature_le(&self) -> &'a [u8] {
        &self.0[SIGNATURE]
    }

    pub fn mr_enclave(&self) -> MrEnclave {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[ENCLAVE_HASH]);
        Measurement::new(out)
    }

    /// SHA-256 of the little-endian modulus.
    pub fn mr_signer(&self) -> MrSigner {
        Measurement::new(sha256(self.modulus_le()))
    }

    pub fn isv_prod_id(&self) -> u16 {
        u16::from_le_bytes([self.0[ISV_PROD_ID.start], self.0[ISV_PROD_ID.start + 1]])
    }

    pub fn isv_svn(&self) -> u16 {
        u16::from_le_bytes([self.0[ISV_SVN.start], self.0[ISV_SVN.start + 1]])
    }

    pub fn misc_select(&self) -> &'a [u8] {
        &self.0[MISC_SELECT]
    }

    pub fn attributes(&self) -> &'a [u8] {
        &self.0[ATTRIBUTES]
    }

    /// SHA-256 over the two signed regions, `header ‖ body`.
    pub fn signed_digest(&self) -> [u8; 32] {
        sha256_concat(&[&self.0[HEADER], &self.0[SIGNED_BODY]])
    }

    /// Check the embedded signature with the embedded modulus.
    pub fn verify_self_signature(&self) -> Result<(), SigstructError> {
        let exponent = self.exponent();
        if exponent != REQUIRED_EXPONENT {
            return Err(SigstructError::Exponent(exponent));
        }
        rsa3072_exp3_pkcs1v15_verify(self.modulus_le(), self.signature_le(), &self.signed_digest())
            .map_err(SigstructError::Signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigstructError {
    #[error("RSA exponent is {0}, expected 3")]
    Exponent(u32),

    #[error(transparent)]
    Signature(#[from] PrimitiveError),
}
