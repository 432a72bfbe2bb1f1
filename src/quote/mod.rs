// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Quote Codec
//!
//! Parsing and building of SGX quotes (DCAP ECDSA and legacy EPID) and
//! extraction of the values the rest of the core needs from them.
//!
//! ## Quote Layout
//!
//! ```text
//! 0      48                                                   432    436
//! +------+----------------------------------------------------+------+-----------------+
//! |header| report body (384)                                  | len  | signature data  |
//! +------+----------------------------------------------------+------+-----------------+
//!   version @0 (u16), sign_type @2 (u16)
//!   cpusvn @48, attributes @96, mr_enclave @112, mr_signer @176,
//!   isv_prod_id @304, isv_svn @306, report_data @368
//! ```
//!
//! ECDSA signature data (`C` = 32 for P-256, 48 for P-384):
//!
//! ```text
//! signature (2C) | attestation key (2C) | QE report (384) | QE report signature (2C)
//! | auth data len (u16) | auth data | cert data type (u16) | cert data len (u32) | cert data
//! ```

pub mod body;
pub mod layout;
pub mod pck;
pub mod platform;

pub use body::{EcdsaSignatureData, QeReport, Quote, QuoteBuilder, SignType, SignatureSection};
pub use pck::{pck_chain_ders, PckTcb, SgxPckExtension};
pub use platform::{extract_platform_instance_id, PlatformInstanceId, Provenance};

/// Errors returned while decoding quotes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteError {
    #[error("quote too short: need {needed} bytes, have {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("unsupported quote version {0}")]
    UnsupportedVersion(u16),

    #[error("unsupported quote signature type {0}")]
    UnsupportedSignType(u16),

    #[error("quote carries no usable attestation key")]
    UnsupportedAttestationKey,

    #[error("malformed PCK certificate: {0}")]
    MalformedPck(String),
}

impl QuoteError {
    pub fn kind(&self) -> &'static str {
        match self {
            QuoteError::TooShort { .. } => "too_short",
            QuoteError::UnsupportedVersion(_) => "unsupported_version",
            QuoteError::UnsupportedSignType(_) => "unsupported_sign_type",
            QuoteError::UnsupportedAttestationKey => "unsupported_attestation_key",
            QuoteError::MalformedPck(_) => "malformed_pck",
        }
    }
}
