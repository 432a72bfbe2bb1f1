// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TCB level matching and QE identity checks.

use serde::Deserialize;

use super::collateral::{QeIdentity, TcbInfo, TcbLevel};
use crate::attestation::AttestationError;
use crate::quote::{PckTcb, QeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TcbStatus {
    UpToDate,
    SWHardeningNeeded,
    ConfigurationNeeded,
    ConfigurationAndSWHardeningNeeded,
    OutOfDate,
    OutOfDateConfigurationNeeded,
    Revoked,
    #[serde(other)]
    Unknown,
}

impl TcbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TcbStatus::UpToDate => "UpToDate",
            TcbStatus::SWHardeningNeeded => "SWHardeningNeeded",
            TcbStatus::ConfigurationNeeded => "ConfigurationNeeded",
            TcbStatus::ConfigurationAndSWHardeningNeeded => "ConfigurationAndSWHardeningNeeded",
            TcbStatus::OutOfDate => "OutOfDate",
            TcbStatus::OutOfDateConfigurationNeeded => "OutOfDateConfigurationNeeded",
            TcbStatus::Revoked => "Revoked",
            TcbStatus::Unknown => "Unknown",
        }
    }

    /// Statuses admitted only when outdated TCBs are allowed.
    fn is_outdated(&self) -> bool {
        matches!(
            self,
            TcbStatus::OutOfDate
                | TcbStatus::OutOfDateConfigurationNeeded
                | TcbStatus::SWHardeningNeeded
                | TcbStatus::ConfigurationNeeded
                | TcbStatus::ConfigurationAndSWHardeningNeeded
        )
    }
}

/// Pick the TCB level describing `pck`.
///
/// Strict: the first level whose every component SVN and PCESVN the
/// platform meets. Permissive: the first level, no comparison.
pub fn select_tcb_level<'a>(info: &'a TcbInfo, pck: &PckTcb, permissive: bool) -> Option<&'a TcbLevel> {
    if permissive {
        return info.tcb_levels.first();
    }
    info.tcb_levels.iter().find(|level| level_matches(level, pck))
}

fn level_matches(level: &TcbLevel, pck: &PckTcb) -> bool {
    let components = &level.tcb.sgxtcbcomponents;
    if components.len() != pck.comp_svn.len() {
        return false;
    }
    components
        .iter()
        .zip(pck.comp_svn.iter())
        .all(|(required, have)| *have >= required.svn)
        && pck.pce_svn >= level.tcb.pcesvn
}

/// Turn the selected level into a verdict.
pub fn evaluate_platform_tcb(
    level: Option<&TcbLevel>,
    allow_outdated: bool,
) -> Result<TcbStatus, AttestationError> {
    let Some(level) = level else {
        return Err(AttestationError::TcbOutOfDate(
            "platform TCB is below every listed level".into(),
        ));
    };
    match level.tcb_status {
        TcbStatus::UpToDate => Ok(level.tcb_status),
        TcbStatus::Revoked => Err(AttestationError::TcbRevoked),
        status if status.is_outdated() && allow_outdated => Ok(status),
        status => Err(AttestationError::TcbOutOfDate(status.as_str().into())),
    }
}

/// Compare the QE report against the QE Identity document.
pub fn check_qe_identity(
    identity: &QeIdentity,
    report: &QeReport<'_>,
    allow_outdated: bool,
) -> Result<TcbStatus, AttestationError> {
    let mrsigner = decode(&identity.mrsigner, 32, "mrsigner")?;
    if report.mr_signer().as_bytes()[..] != mrsigner[..] {
        return Err(reject("QE MRSIGNER differs"));
    }
    if report.isv_prod_id() != identity.isvprodid {
        return Err(reject(&format!(
            "QE ISVPRODID {} != {}",
            report.isv_prod_id(),
            identity.isvprodid
        )));
    }

    let miscselect = le_u32(&decode(&identity.miscselect, 4, "miscselect")?);
    let miscselect_mask = le_u32(&decode(&identity.miscselect_mask, 4, "miscselectMask")?);
    if report.misc_select() & miscselect_mask != miscselect {
        return Err(reject("QE MISCSELECT differs"));
    }

    let attributes = decode(&identity.attributes, 16, "attributes")?;
    let attributes_mask = decode(&identity.attributes_mask, 16, "attributesMask")?;
    let masked_ok = report
        .attributes()
        .iter()
        .zip(attributes_mask.iter())
        .zip(attributes.iter())
        .all(|((have, mask), want)| have & mask == *want);
    if !masked_ok {
        return Err(reject("QE ATTRIBUTES differ"));
    }

    let level = identity
        .tcb_levels
        .iter()
        .find(|level| report.isv_svn() >= level.tcb.isvsvn)
        .ok_or_else(|| reject(&format!("QE ISVSVN {} below every level", report.isv_svn())))?;
    match level.tcb_status {
        TcbStatus::UpToDate => Ok(level.tcb_status),
        TcbStatus::Revoked => Err(reject("QE TCB revoked")),
        status if status.is_outdated() && allow_outdated => Ok(status),
        status => Err(reject(&format!("QE TCB {}", status.as_str()))),
    }
}

fn decode(value: &str, len: usize, field: &str) -> Result<Vec<u8>, AttestationError> {
    match hex::decode(value) {
        Ok(bytes) if bytes.len() == len => Ok(bytes),
        _ => Err(reject(&format!("malformed {field}"))),
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

fn reject(reason: &str) -> AttestationError {
    AttestationError::QeIdentityUnacceptable(reason.to_owned())
}
