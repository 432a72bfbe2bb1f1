// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! DCAP test material: a private root CA, a PCK chain with an SGX
//! extension, an attestation key, signed QE reports and signed collateral.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{TimeZone, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName, DnType,
    IsCa, KeyPair, PKCS_ECDSA_P256_SHA256,
};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair as _, ECDSA_P256_SHA256_FIXED_SIGNING};

use super::dcap::{SignedCollateral, StaticCollateral, TrustAnchor};
use crate::clock::{Clock, ManualClock};
use crate::primitives::{sha256_concat, Measurement};
use crate::quote::layout::{report, CERT_DATA_PCK_CHAIN};
use crate::quote::{EcdsaSignatureData, Quote, QuoteBuilder, SignType, SignatureSection};

/// 2026-06-01T00:00:00Z
pub(crate) const FIXTURE_NOW: i64 = 1_780_272_000;

pub(crate) const QE_MRSIGNER: [u8; 32] = [0x8c; 32];
const QE_ISV_SVN: u16 = 8;
const QE_ATTRIBUTES: [u8; 16] = [0x11, 0, 0, 0, 0, 0, 0, 0, 0xe7, 0, 0, 0, 0, 0, 0, 0];
const SGX_EXTENSION_ARCS: &[u64] = &[1, 2, 840, 113741, 1, 13, 1];
const PLATFORM_SVN: u8 = 3;
const PLATFORM_PCE_SVN: u16 = 11;

pub(crate) struct DcapFixture {
    pub anchor: TrustAnchor,
    pub now: i64,
    pub fmspc: [u8; 6],
    root: Certificate,
    root_key: KeyPair,
    intermediate: Certificate,
    pck: Certificate,
    pck_key: EcdsaKeyPair,
    tcb_signer: Certificate,
    tcb_signer_key: EcdsaKeyPair,
    attestation_key: EcdsaKeyPair,
    rng: SystemRandom,
    platform_status: String,
    qe_mrsigner: [u8; 32],
}

impl DcapFixture {
    pub fn new() -> Self {
        Self::build("UpToDate", QE_MRSIGNER)
    }

    /// Fixture whose matching TCB level carries `status`.
    pub fn with_platform_status(status: &str) -> Self {
        Self::build(status, QE_MRSIGNER)
    }

    /// Fixture whose QE Identity expects a different QE signer.
    pub fn with_qe_mrsigner(mrsigner: [u8; 32]) -> Self {
        Self::build("UpToDate", mrsigner)
    }

    fn build(platform_status: &str, qe_mrsigner: [u8; 32]) -> Self {
        let rng = SystemRandom::new();
        let fmspc = [0x00, 0x90, 0x6e, 0xa1, 0x00, 0x00];

        let root_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let root = ca_params("Test SGX Root CA")
            .self_signed(&root_key)
            .unwrap();

        let intermediate_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let intermediate = ca_params("Test SGX PCK Platform CA")
            .signed_by(&intermediate_key, &root, &root_key)
            .unwrap();

        let pck_rcgen_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut pck_params = leaf_params("Test SGX PCK Certificate");
        pck_params.custom_extensions.push(CustomExtension::from_oid_content(
            SGX_EXTENSION_ARCS,
            sgx_extension(&fmspc),
        ));
        let pck = pck_params
            .signed_by(&pck_rcgen_key, &intermediate, &intermediate_key)
            .unwrap();

        let tcb_rcgen_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let tcb_signer = leaf_params("Test SGX TCB Signing")
            .signed_by(&tcb_rcgen_key, &root, &root_key)
            .unwrap();

        let attestation_pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let attestation_key =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, attestation_pkcs8.as_ref(), &rng)
                .unwrap();

        Self {
            anchor: TrustAnchor::from_certificate_der(root.der()).unwrap(),
            now: FIXTURE_NOW,
            fmspc,
            pck_key: ring_key(&pck_rcgen_key, &rng),
            tcb_signer_key: ring_key(&tcb_rcgen_key, &rng),
            root,
            root_key,
            intermediate,
            pck,
            tcb_signer,
            attestation_key,
            rng,
            platform_status: platform_status.to_owned(),
            qe_mrsigner,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        let start = Utc.timestamp_opt(self.now, 0).single().unwrap();
        Arc::new(ManualClock::new(start))
    }

    /// PCK leaf, intermediate and root as concatenated PEM.
    pub fn pck_chain_pem(&self) -> String {
        format!("{}{}{}", self.pck.pem(), self.intermediate.pem(), self.root.pem())
    }

    /// A fully signed ECDSA-P256 quote with a type-5 PCK chain.
    pub fn quote(&self, mr_enclave: Measurement, report_data: &[u8; 64]) -> Vec<u8> {
        let builder = QuoteBuilder::new(3, SignType::EcdsaP256)
            .mr_enclave(mr_enclave)
            .mr_signer(Measurement::new([0x22; 32]))
            .isv_prod_id(1)
            .isv_svn(1)
            .report_data(report_data);
        let signature = self.sign(&builder.signed_region());

        let attestation_key = self.attestation_key.public_key().as_ref()[1..].to_vec();
        let auth_data = vec![0u8; 32];
        let qe_report = self.qe_report(&attestation_key, &auth_data);
        let qe_report_signature = sign_with(&self.pck_key, &self.rng, &qe_report);

        builder
            .signature(SignatureSection::Ecdsa(EcdsaSignatureData {
                signature,
                attestation_key,
                qe_report,
                qe_report_signature,
                auth_data,
                cert_data_type: CERT_DATA_PCK_CHAIN,
                cert_data: self.pck_chain_pem().into_bytes(),
            }))
            .build()
            .to_bytes()
    }

    /// Re-serialize `quote` with another signature section, keeping the
    /// signed header and body.
    pub fn replace_signature(&self, quote: &Quote, signature: SignatureSection) -> Vec<u8> {
        let SignatureSection::Ecdsa(data) = signature else {
            panic!("fixture only handles ECDSA sections");
        };
        let section = data.to_bytes();
        let mut out = quote.signed_region();
        out.extend_from_slice(&(section.len() as u32).to_le_bytes());
        out.extend_from_slice(&section);
        out
    }

    pub fn collateral(&self) -> StaticCollateral {
        StaticCollateral::new()
            .with_tcb_info(self.fmspc, self.tcb_info_collateral())
            .with_qe_identity(self.qe_identity_collateral())
    }

    /// Root, then an issuer without CA rights, then a leaf; DER, leaf first.
    pub fn chain_through_non_ca(&self) -> Vec<Vec<u8>> {
        let issuer_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let issuer = leaf_params("Test Non-CA Issuer")
            .signed_by(&issuer_key, &self.root, &self.root_key)
            .unwrap();
        let leaf_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let leaf = leaf_params("Test Leaf")
            .signed_by(&leaf_key, &issuer, &issuer_key)
            .unwrap();
        vec![leaf.der().to_vec(), issuer.der().to_vec(), self.root.der().to_vec()]
    }

    pub fn tcb_info_collateral(&self) -> SignedCollateral {
        let components = |svn: u8| {
            (0..16)
                .map(|_| format!(r#"{{"svn":{svn}}}"#))
                .collect::<Vec<_>>()
                .join(",")
        };
        let inner = format!(
            concat!(
                r#"{{"version":3,"issueDate":"2026-05-01T00:00:00Z","nextUpdate":"2026-07-01T00:00:00Z","#,
                r#""fmspc":"{fmspc}","pceId":"0000","tcbLevels":["#,
                r#"{{"tcb":{{"sgxtcbcomponents":[{high}],"pcesvn":13}},"tcbDate":"2026-02-01T00:00:00Z","tcbStatus":"UpToDate"}},"#,
                r#"{{"tcb":{{"sgxtcbcomponents":[{mid}],"pcesvn":{pce}}},"tcbDate":"2025-08-01T00:00:00Z","tcbStatus":"{status}"}},"#,
                r#"{{"tcb":{{"sgxtcbcomponents":[{low}],"pcesvn":5}},"tcbDate":"2024-01-01T00:00:00Z","tcbStatus":"OutOfDate"}}"#,
                r#"]}}"#
            ),
            fmspc = hex::encode(self.fmspc),
            high = components(PLATFORM_SVN + 2),
            mid = components(PLATFORM_SVN),
            pce = PLATFORM_PCE_SVN,
            status = self.platform_status,
            low = components(1),
        );
        self.signed_document("tcbInfo", &inner)
    }

    pub fn qe_identity_collateral(&self) -> SignedCollateral {
        let inner = format!(
            concat!(
                r#"{{"id":"QE","version":2,"issueDate":"2026-05-01T00:00:00Z","nextUpdate":"2026-07-01T00:00:00Z","#,
                r#""miscselect":"00000000","miscselectMask":"FFFFFFFF","#,
                r#""attributes":"{attributes}","attributesMask":"FBFFFFFFFFFFFFFF0000000000000000","#,
                r#""mrsigner":"{mrsigner}","isvprodid":1,"tcbLevels":["#,
                r#"{{"tcb":{{"isvsvn":{svn}}},"tcbDate":"2026-02-01T00:00:00Z","tcbStatus":"UpToDate"}},"#,
                r#"{{"tcb":{{"isvsvn":0}},"tcbDate":"2024-01-01T00:00:00Z","tcbStatus":"OutOfDate"}}"#,
                r#"]}}"#
            ),
            attributes = hex::encode_upper(masked_attributes()),
            mrsigner = hex::encode_upper(self.qe_mrsigner),
            svn = QE_ISV_SVN,
        );
        self.signed_document("enclaveIdentity", &inner)
    }

    fn signed_document(&self, field: &str, inner: &str) -> SignedCollateral {
        let signature = sign_with(&self.tcb_signer_key, &self.rng, inner.as_bytes());
        SignedCollateral {
            body: format!(r#"{{"{field}":{inner},"signature":"{}"}}"#, hex::encode(signature)),
            issuer_chain: format!("{}{}", self.tcb_signer.pem(), self.root.pem()),
        }
    }

    fn qe_report(&self, attestation_key: &[u8], auth_data: &[u8]) -> Vec<u8> {
        let mut qe_report = vec![0u8; 384];
        qe_report[report::ATTRIBUTES].copy_from_slice(&QE_ATTRIBUTES);
        qe_report[report::MR_ENCLAVE].copy_from_slice(&[0x5e; 32]);
        qe_report[report::MR_SIGNER].copy_from_slice(&QE_MRSIGNER);
        qe_report[report::ISV_PROD_ID].copy_from_slice(&1u16.to_le_bytes());
        qe_report[report::ISV_SVN].copy_from_slice(&QE_ISV_SVN.to_le_bytes());
        let binding = sha256_concat(&[attestation_key, auth_data]);
        qe_report[report::REPORT_DATA.start..report::REPORT_DATA.start + 32].copy_from_slice(&binding);
        qe_report
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        sign_with(&self.attestation_key, &self.rng, message)
    }
}

fn masked_attributes() -> [u8; 16] {
    let mask = [0xfb, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0, 0, 0, 0, 0];
    let mut out = [0u8; 16];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = QE_ATTRIBUTES[i] & mask[i];
    }
    out
}

fn validity(params: &mut CertificateParams) {
    params.not_before = (SystemTime::UNIX_EPOCH + Duration::from_secs(FIXTURE_NOW as u64 - 86_400)).into();
    params.not_after =
        (SystemTime::UNIX_EPOCH + Duration::from_secs(FIXTURE_NOW as u64 + 10 * 365 * 86_400)).into();
}

fn named(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::new(vec![]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    validity(&mut params);
    params
}

fn ca_params(cn: &str) -> CertificateParams {
    let mut params = named(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

fn leaf_params(cn: &str) -> CertificateParams {
    named(cn)
}

fn ring_key(key: &KeyPair, rng: &SystemRandom) -> EcdsaKeyPair {
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &key.serialize_der(), rng).unwrap()
}

fn sign_with(key: &EcdsaKeyPair, rng: &SystemRandom, message: &[u8]) -> Vec<u8> {
    key.sign(rng, message).unwrap().as_ref().to_vec()
}

/// SGX PCK extension: TCB components at `PLATFORM_SVN`, PCESVN, CPUSVN and FMSPC.
fn sgx_extension(fmspc: &[u8; 6]) -> Vec<u8> {
    let oid = |suffix: &[u64]| {
        let mut arcs = SGX_EXTENSION_ARCS.to_vec();
        arcs.extend_from_slice(suffix);
        yasna::models::ObjectIdentifier::from_slice(&arcs)
    };
    yasna::construct_der(|w| {
        w.write_sequence(|w| {
            w.next().write_sequence(|w| {
                w.next().write_oid(&oid(&[1]));
                w.next().write_bytes(&[0x0b; 16]);
            });
            w.next().write_sequence(|w| {
                w.next().write_oid(&oid(&[2]));
                w.next().write_sequence(|w| {
                    for i in 1..=16u64 {
                        w.next().write_sequence(|w| {
                            w.next().write_oid(&oid(&[2, i]));
                            w.next().write_u64(u64::from(PLATFORM_SVN));
                        });
                    }
                    w.next().write_sequence(|w| {
                        w.next().write_oid(&oid(&[2, 17]));
                        w.next().write_u64(u64::from(PLATFORM_PCE_SVN));
                    });
                    w.next().write_sequence(|w| {
                        w.next().write_oid(&oid(&[2, 18]));
                        w.next().write_bytes(&[PLATFORM_SVN; 16]);
                    });
                });
            });
            w.next().write_sequence(|w| {
                w.next().write_oid(&oid(&[3]));
                w.next().write_bytes(&[0, 0]);
            });
            w.next().write_sequence(|w| {
                w.next().write_oid(&oid(&[4]));
                w.next().write_bytes(fmspc);
            });
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::{extract_platform_instance_id, Provenance, SgxPckExtension};
    use crate::primitives::sha256;

    #[test]
    fn pck_leaf_carries_the_sgx_extension() {
        let fixture = DcapFixture::new();
        let ext = SgxPckExtension::from_certificate_der(fixture.pck.der())
            .unwrap()
            .unwrap();
        assert_eq!(ext.fmspc, Some(fixture.fmspc));
        assert_eq!(ext.tcb.unwrap().pce_svn, PLATFORM_PCE_SVN);
    }

    #[test]
    fn platform_id_comes_from_the_pck_leaf() {
        let fixture = DcapFixture::new();
        let first = extract_platform_instance_id(&fixture.quote(Measurement::new([1; 32]), &[1; 64])).unwrap();
        let second = extract_platform_instance_id(&fixture.quote(Measurement::new([2; 32]), &[2; 64])).unwrap();
        assert_eq!(first.provenance(), Provenance::PckFmspcCpuSvn);
        assert!(first.same_platform(&second));

        let mut input = fixture.fmspc.to_vec();
        input.extend_from_slice(&[PLATFORM_SVN; 16]);
        assert_eq!(first.as_bytes(), &sha256(&input));
    }
}
