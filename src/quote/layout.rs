// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed offsets inside an SGX quote and report.

use std::ops::Range;

/// Quote header length.
pub const HEADER_LEN: usize = 48;
/// SGX report body length.
pub const REPORT_BODY_LEN: usize = 384;
/// Header plus report body; the region covered by the attestation key signature.
pub const SIGNED_LEN: usize = HEADER_LEN + REPORT_BODY_LEN;
/// Byte length of the signature-section length prefix.
pub const SIGNATURE_LEN_PREFIX: usize = 4;

pub const VERSION: Range<usize> = 0..2;
pub const SIGN_TYPE: Range<usize> = 2..4;
pub const QE_SVN: Range<usize> = 8..10;
pub const PCE_SVN: Range<usize> = 10..12;

// Absolute offsets inside the quote (report body starts at 48).
pub const CPU_SVN: Range<usize> = 48..64;
pub const MISC_SELECT: Range<usize> = 64..68;
pub const ATTRIBUTES: Range<usize> = 96..112;
pub const MR_ENCLAVE: Range<usize> = 112..144;
pub const MR_SIGNER: Range<usize> = 176..208;
pub const ISV_PROD_ID: Range<usize> = 304..306;
pub const ISV_SVN: Range<usize> = 306..308;
pub const REPORT_DATA: Range<usize> = 368..432;

/// Inputs of the report-derived platform instance ID.
pub const PLATFORM_FALLBACK_A: Range<usize> = 64..80;
pub const PLATFORM_FALLBACK_B: Range<usize> = 96..112;
/// Input of the EPID-derived platform instance ID.
pub const PLATFORM_EPID: Range<usize> = 432..464;

/// Offsets inside a bare 384-byte report body (QE report).
pub mod report {
    use std::ops::Range;

    pub const CPU_SVN: Range<usize> = 0..16;
    pub const MISC_SELECT: Range<usize> = 16..20;
    pub const ATTRIBUTES: Range<usize> = 48..64;
    pub const MR_ENCLAVE: Range<usize> = 64..96;
    pub const MR_SIGNER: Range<usize> = 128..160;
    pub const ISV_PROD_ID: Range<usize> = 256..258;
    pub const ISV_SVN: Range<usize> = 258..260;
    pub const REPORT_DATA: Range<usize> = 320..384;
}

/// Supported quote versions.
pub const SUPPORTED_VERSIONS: [u16; 2] = [3, 4];

/// Certification data: plaintext PPID (+ CPUSVN, PCESVN, PCE ID).
pub const CERT_DATA_PPID_CLEARTEXT: u16 = 1;
/// Certification data: concatenated PEM PCK certificate chain.
pub const CERT_DATA_PCK_CHAIN: u16 = 5;
/// PPID length inside type-1 certification data.
pub const PPID_LEN: usize = 16;

/// Maximum `report_data` length.
pub const REPORT_DATA_LEN: usize = 64;
