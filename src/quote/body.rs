// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Quote parsing and serialization.

use std::fmt;

use crate::primitives::Measurement;

use super::layout;
use super::QuoteError;

/// Attestation signature scheme carried in the quote header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignType {
    EpidUnlinkable,
    EpidLinkable,
    EcdsaP256,
    EcdsaP384,
}

impl SignType {
    pub fn from_u16(value: u16) -> Result<Self, QuoteError> {
        match value {
            0 => Ok(SignType::EpidUnlinkable),
            1 => Ok(SignType::EpidLinkable),
            2 => Ok(SignType::EcdsaP256),
            3 => Ok(SignType::EcdsaP384),
            other => Err(QuoteError::UnsupportedSignType(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            SignType::EpidUnlinkable => 0,
            SignType::EpidLinkable => 1,
            SignType::EcdsaP256 => 2,
            SignType::EcdsaP384 => 3,
        }
    }

    pub fn is_dcap(self) -> bool {
        matches!(self, SignType::EcdsaP256 | SignType::EcdsaP384)
    }

    /// ECDSA coordinate size `C`; `None` for EPID.
    pub fn coordinate_len(self) -> Option<usize> {
        match self {
            SignType::EcdsaP256 => Some(32),
            SignType::EcdsaP384 => Some(48),
            _ => None,
        }
    }
}

/// ECDSA (DCAP) signature data following the report body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaSignatureData {
    /// Raw `r ‖ s` over the quote header and report body.
    pub signature: Vec<u8>,
    /// Raw `x ‖ y` of the attestation public key.
    pub attestation_key: Vec<u8>,
    /// 384-byte report of the quoting enclave.
    pub qe_report: Vec<u8>,
    /// Raw `r ‖ s` over `qe_report`, made by the PCK.
    pub qe_report_signature: Vec<u8>,
    pub auth_data: Vec<u8>,
    pub cert_data_type: u16,
    pub cert_data: Vec<u8>,
}

impl EcdsaSignatureData {
    fn parse(data: &[u8], coordinate_len: usize) -> Result<Self, QuoteError> {
        let mut reader = Reader::new(data, layout::SIGNED_LEN + layout::SIGNATURE_LEN_PREFIX);
        let signature = reader.take(2 * coordinate_len)?.to_vec();
        let attestation_key = reader.take(2 * coordinate_len)?.to_vec();
        let qe_report = reader.take(layout::REPORT_BODY_LEN)?.to_vec();
        let qe_report_signature = reader.take(2 * coordinate_len)?.to_vec();
        let auth_len = reader.u16()? as usize;
        let auth_data = reader.take(auth_len)?.to_vec();
        let cert_data_type = reader.u16()?;
        let cert_len = reader.u32()? as usize;
        let cert_data = reader.take(cert_len)?.to_vec();

        Ok(Self {
            signature,
            attestation_key,
            qe_report,
            qe_report_signature,
            auth_data,
            cert_data_type,
            cert_data,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.signature.len()
                + self.attestation_key.len()
                + self.qe_report.len()
                + self.qe_report_signature.len()
                + 8
                + self.auth_data.len()
                + self.cert_data.len(),
        );
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.attestation_key);
        out.extend_from_slice(&self.qe_report);
        out.extend_from_slice(&self.qe_report_signature);
        out.extend_from_slice(&(self.auth_data.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.auth_data);
        out.extend_from_slice(&self.cert_data_type.to_le_bytes());
        out.extend_from_slice(&(self.cert_data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.cert_data);
        out
    }

    pub fn qe_report(&self) -> QeReport<'_> {
        QeReport(&self.qe_report)
    }
}

/// Signature section of a quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureSection {
    /// Bare 432-byte quote (mock builds).
    Absent,
    /// EPID signature, kept opaque.
    Epid(Vec<u8>),
    Ecdsa(EcdsaSignatureData),
}

impl SignatureSection {
    fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            SignatureSection::Absent => None,
            SignatureSection::Epid(raw) => Some(raw.clone()),
            SignatureSection::Ecdsa(data) => Some(data.to_bytes()),
        }
    }
}

/// Read-only view over a 384-byte QE report.
#[derive(Clone, Copy)]
pub struct QeReport<'a>(&'a [u8]);

impl<'a> QeReport<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn mr_signer(&self) -> Measurement {
        measurement_at(self.0, layout::report::MR_SIGNER)
    }

    pub fn mr_enclave(&self) -> Measurement {
        measurement_at(self.0, layout::report::MR_ENCLAVE)
    }

    pub fn isv_prod_id(&self) -> u16 {
        u16_at(self.0, layout::report::ISV_PROD_ID.start)
    }

    pub fn isv_svn(&self) -> u16 {
        u16_at(self.0, layout::report::ISV_SVN.start)
    }

    pub fn misc_select(&self) -> u32 {
        u32_at(self.0, layout::report::MISC_SELECT.start)
    }

    pub fn attributes(&self) -> &'a [u8] {
        &self.0[layout::report::ATTRIBUTES]
    }

    pub fn report_data(&self) -> &'a [u8] {
        &self.0[layout::report::REPORT_DATA]
    }
}

/// A parsed SGX quote.
///
/// The header and report body are kept verbatim so that serialization
/// reproduces the signed bytes exactly.
#[derive(Clone, PartialEq, Eq)]
pub struct Quote {
    header: [u8; layout::HEADER_LEN],
    body: [u8; layout::REPORT_BODY_LEN],
    sign_type: SignType,
    signature: SignatureSection,
}

impl Quote {
    pub fn parse(buf: &[u8]) -> Result<Self, QuoteError> {
        if buf.len() < layout::SIGNED_LEN {
            return Err(QuoteError::TooShort {
                needed: layout::SIGNED_LEN,
                actual: buf.len(),
            });
        }

        let version = u16_at(buf, layout::VERSION.start);
        if !layout::SUPPORTED_VERSIONS.contains(&version) {
            return Err(QuoteError::UnsupportedVersion(version));
        }
        let sign_type = SignType::from_u16(u16_at(buf, layout::SIGN_TYPE.start))?;

        let mut header = [0u8; layout::HEADER_LEN];
        header.copy_from_slice(&buf[..layout::HEADER_LEN]);
        let mut body = [0u8; layout::REPORT_BODY_LEN];
        body.copy_from_slice(&buf[layout::HEADER_LEN..layout::SIGNED_LEN]);

        let signature = if buf.len() == layout::SIGNED_LEN {
            SignatureSection::Absent
        } else {
            let mut reader = Reader::new(&buf[layout::SIGNED_LEN..], layout::SIGNED_LEN);
            let sig_len = reader.u32()? as usize;
            let sig_data = reader.take(sig_len)?;
            match sign_type.coordinate_len() {
                Some(c) => SignatureSection::Ecdsa(EcdsaSignatureData::parse(sig_data, c)?),
                None => SignatureSection::Epid(sig_data.to_vec()),
            }
        };

        Ok(Self {
            header,
            body,
            sign_type,
            signature,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(layout::SIGNED_LEN);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        if let Some(sig) = self.signature.to_bytes() {
            out.extend_from_slice(&(sig.len() as u32).to_le_bytes());
            out.extend_from_slice(&sig);
        }
        out
    }

    /// Header and report body: the bytes signed by the attestation key.
    pub fn signed_region(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(layout::SIGNED_LEN);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn version(&self) -> u16 {
        u16_at(&self.header, layout::VERSION.start)
    }

    pub fn sign_type(&self) -> SignType {
        self.sign_type
    }

    pub fn qe_svn(&self) -> u16 {
        u16_at(&self.header, layout::QE_SVN.start)
    }

    pub fn pce_svn(&self) -> u16 {
        u16_at(&self.header, layout::PCE_SVN.start)
    }

    pub fn cpu_svn(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(self.body_range(layout::CPU_SVN));
        out
    }

    pub fn attributes(&self) -> &[u8] {
        self.body_range(layout::ATTRIBUTES)
    }

    pub fn mr_enclave(&self) -> Measurement {
        measurement_at(&self.body, shift(layout::MR_ENCLAVE))
    }

    pub fn mr_signer(&self) -> Measurement {
        measurement_at(&self.body, shift(layout::MR_SIGNER))
    }

    pub fn isv_prod_id(&self) -> u16 {
        u16_at(&self.body, layout::ISV_PROD_ID.start - layout::HEADER_LEN)
    }

    pub fn isv_svn(&self) -> u16 {
        u16_at(&self.body, layout::ISV_SVN.start - layout::HEADER_LEN)
    }

    pub fn report_data(&self) -> &[u8] {
        self.body_range(layout::REPORT_DATA)
    }

    pub fn signature(&self) -> &SignatureSection {
        &self.signature
    }

    pub fn ecdsa(&self) -> Option<&EcdsaSignatureData> {
        match &self.signature {
            SignatureSection::Ecdsa(data) => Some(data),
            _ => None,
        }
    }

    /// Embedded attestation public key (raw `x ‖ y`).
    pub fn extract_public_key(&self) -> Result<&[u8], QuoteError> {
        self.ecdsa()
            .map(|data| data.attestation_key.as_slice())
            .ok_or(QuoteError::UnsupportedAttestationKey)
    }

    fn body_range(&self, absolute: std::ops::Range<usize>) -> &[u8] {
        &self.body[shift(absolute)]
    }
}

impl fmt::Debug for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quote")
            .field("version", &self.version())
            .field("sign_type", &self.sign_type)
            .field("mr_enclave", &self.mr_enclave())
            .field("mr_signer", &self.mr_signer())
            .field("isv_prod_id", &self.isv_prod_id())
            .field("isv_svn", &self.isv_svn())
            .finish_non_exhaustive()
    }
}

/// Assembles quotes field by field.
///
/// Used by the mock attestation device and by tests that need quotes with
/// specific measurements.
#[derive(Clone)]
pub struct QuoteBuilder {
    header: [u8; layout::HEADER_LEN],
    body: [u8; layout::REPORT_BODY_LEN],
    sign_type: SignType,
    signature: SignatureSection,
}

impl QuoteBuilder {
    pub fn new(version: u16, sign_type: SignType) -> Self {
        let mut header = [0u8; layout::HEADER_LEN];
        header[layout::VERSION].copy_from_slice(&version.to_le_bytes());
        header[layout::SIGN_TYPE].copy_from_slice(&sign_type.as_u16().to_le_bytes());
        Self {
            header,
            body: [0u8; layout::REPORT_BODY_LEN],
            sign_type,
            signature: SignatureSection::Absent,
        }
    }

    fn set(mut self, absolute: std::ops::Range<usize>, bytes: &[u8]) -> Self {
        self.body[shift(absolute)].copy_from_slice(bytes);
        self
    }

    pub fn cpu_svn(self, cpu_svn: [u8; 16]) -> Self {
        self.set(layout::CPU_SVN, &cpu_svn)
    }

    /// Bytes `[64..80]` of the quote: misc-select and the reserved area after it.
    pub fn platform_bytes(self, bytes: [u8; 16]) -> Self {
        self.set(layout::PLATFORM_FALLBACK_A, &bytes)
    }

    pub fn attributes(self, attributes: [u8; 16]) -> Self {
        self.set(layout::ATTRIBUTES, &attributes)
    }

    pub fn mr_enclave(self, m: Measurement) -> Self {
        self.set(layout::MR_ENCLAVE, m.as_bytes())
    }

    pub fn mr_signer(self, m: Measurement) -> Self {
        self.set(layout::MR_SIGNER, m.as_bytes())
    }

    pub fn isv_prod_id(self, id: u16) -> Self {
        self.set(layout::ISV_PROD_ID, &id.to_le_bytes())
    }

    pub fn isv_svn(self, svn: u16) -> Self {
        self.set(layout::ISV_SVN, &svn.to_le_bytes())
    }

    pub fn report_data(self, data: &[u8; layout::REPORT_DATA_LEN]) -> Self {
        self.set(layout::REPORT_DATA, data)
    }

    pub fn signature(mut self, signature: SignatureSection) -> Self {
        self.signature = signature;
        self
    }

    /// Header and body bytes as they will appear in the built quote.
    pub fn signed_region(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(layout::SIGNED_LEN);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn build(self) -> Quote {
        Quote {
            header: self.header,
            body: self.body,
            sign_type: self.sign_type,
            signature: self.signature,
        }
    }
}

/// Bounds-checked cursor; every failure reports the absolute quote offset.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], QuoteError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len()).ok_or(
            QuoteError::TooShort {
                needed: self.base.saturating_add(self.pos).saturating_add(len),
                actual: self.base + self.data.len(),
            },
        )?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, QuoteError> {
        Ok(u16_at(self.take(2)?, 0))
    }

    fn u32(&mut self) -> Result<u32, QuoteError> {
        Ok(u32_at(self.take(4)?, 0))
    }
}

fn shift(absolute: std::ops::Range<usize>) -> std::ops::Range<usize> {
    absolute.start - layout::HEADER_LEN..absolute.end - layout::HEADER_LEN
}

fn u16_at(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn measurement_at(buf: &[u8], range: std::ops::Range<usize>) -> Measurement {
    let mut out = [0u8; 32];
    out.copy_from_slice(&buf[range]);
    Measurement::new(out)
}
