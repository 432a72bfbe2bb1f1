// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Measurement Primitives
//!
//! Single audit point for side-channel discipline. Every byte comparison
//! between a secret or measured value and attacker-supplied input in this
//! crate goes through [`ct_equal`], [`ct_copy_if`] or [`ct_select`].
//!
//! - `ct` - constant-time equality, conditional copy and select (via `subtle`)
//! - `rsa` - RSA-3072, public exponent 3, PKCS#1 v1.5 / SHA-256 verification
//! - `hash` - SHA-256 / SHA-384 helpers
//! - `measurement` - 32-byte MRENCLAVE / MRSIGNER values

pub mod ct;
pub mod hash;
pub mod measurement;
pub mod rsa;

pub use ct::{ct_copy_if, ct_equal, ct_select};
pub use hash::{sha256, sha256_concat, sha384};
pub use measurement::{Measurement, MrEnclave, MrSigner};
pub use rsa::{rsa3072_exp3_pkcs1v15_verify, RSA3072_KEY_BYTES};

/// Errors returned by the primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrimitiveError {
    /// Inputs of different lengths were handed to a constant-time operation.
    ///
    /// Callers must not map this to "not equal": doing so reintroduces a
    /// length-dependent timing difference.
    #[error("length mismatch: {left} != {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("RSA modulus is not 3072 bits")]
    ModulusSizeInvalid,

    #[error("PKCS#1 v1.5 padding is invalid")]
    BadPadding,

    #[error("signed digest does not match")]
    DigestMismatch,
}

impl PrimitiveError {
    pub fn kind(&self) -> &'static str {
        match self {
            PrimitiveError::LengthMismatch { .. } => "length_mismatch",
            PrimitiveError::ModulusSizeInvalid => "modulus_size_invalid",
            PrimitiveError::BadPadding => "bad_padding",
            PrimitiveError::DigestMismatch => "digest_mismatch",
        }
    }
}
