// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Constant-time measurement whitelist.
//!
//! Each list is searched in full and per-entry results are OR-accumulated,
//! so lookup time depends only on list length. An empty MRSIGNER list
//! accepts any signer. An empty MRENCLAVE list accepts any enclave unless
//! admission is strict.

use std::sync::{PoisonError, RwLock};

use subtle::{Choice, ConstantTimeEq};

use crate::attestation::MeasurementPolicy;
use crate::primitives::{Measurement, MrEnclave, MrSigner};

#[derive(Debug, Default)]
struct Lists {
    mr_enclaves: Vec<MrEnclave>,
    mr_signers: Vec<MrSigner>,
    admission_strict: bool,
}

#[derive(Debug, Default)]
pub struct MeasurementWhitelist {
    inner: RwLock<Lists>,
}

impl MeasurementWhitelist {
    pub fn new(admission_strict: bool) -> Self {
        Self {
            inner: RwLock::new(Lists {
                admission_strict,
                ..Lists::default()
            }),
        }
    }

    pub fn add_allowed_mr_enclave(&self, m: MrEnclave) {
        let mut lists = self.write();
        if !contains(&lists.mr_enclaves, &m) {
            lists.mr_enclaves.push(m);
        }
    }

    pub fn remove_allowed_mr_enclave(&self, m: &MrEnclave) {
        self.write().mr_enclaves.retain(|e| e != m);
    }

    pub fn add_allowed_mr_signer(&self, m: MrSigner) {
        let mut lists = self.write();
        if !contains(&lists.mr_signers, &m) {
            lists.mr_signers.push(m);
        }
    }

    pub fn remove_allowed_mr_signer(&self, m: &MrSigner) {
        self.write().mr_signers.retain(|e| e != m);
    }

    /// Swap both lists and the admission mode in one step.
    pub fn replace(&self, mr_enclaves: Vec<MrEnclave>, mr_signers: Vec<MrSigner>, admission_strict: bool) {
        *self.write() = Lists {
            mr_enclaves,
            mr_signers,
            admission_strict,
        };
    }

    pub fn is_allowed_mr_enclave(&self, m: &MrEnclave) -> bool {
        let lists = self.read();
        if lists.mr_enclaves.is_empty() {
            return !lists.admission_strict;
        }
        contains(&lists.mr_enclaves, m)
    }

    pub fn is_allowed_mr_signer(&self, m: &MrSigner) -> bool {
        let lists = self.read();
        lists.mr_signers.is_empty() || contains(&lists.mr_signers, m)
    }

    pub fn mr_enclaves(&self) -> Vec<MrEnclave> {
        self.read().mr_enclaves.clone()
    }

    pub fn mr_signers(&self) -> Vec<MrSigner> {
        self.read().mr_signers.clone()
    }

    pub fn admission_strict(&self) -> bool {
        self.read().admission_strict
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Lists> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Lists> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MeasurementPolicy for MeasurementWhitelist {
    fn is_allowed_mr_enclave(&self, m: &MrEnclave) -> bool {
        MeasurementWhitelist::is_allowed_mr_enclave(self, m)
    }

    fn is_allowed_mr_signer(&self, m: &MrSigner) -> bool {
        MeasurementWhitelist::is_allowed_mr_signer(self, m)
    }
}

/// Full scan with no early exit.
fn contains(list: &[Measurement], m: &Measurement) -> bool {
    let hit = list
        .iter()
        .fold(Choice::from(0), |acc, entry| acc | entry.as_bytes().ct_eq(m.as_bytes()));
    bool::from(hit)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Measurement = Measurement::new([0xaa; 32]);
    const B: Measurement = Measurement::new([0xbb; 32]);

    #[test]
    fn empty_list_follows_admission_mode() {
        assert!(MeasurementWhitelist::new(false).is_allowed_mr_enclave(&A));
        assert!(!MeasurementWhitelist::new(true).is_allowed_mr_enclave(&A));
        assert!(MeasurementWhitelist::new(true).is_allowed_mr_signer(&A));
    }

    #[test]
    fn non_empty_list_is_strict() {
        let list = MeasurementWhitelist::new(false);
        list.add_allowed_mr_enclave(A);
        assert!(list.is_allowed_mr_enclave(&A));
        assert!(!list.is_allowed_mr_enclave(&B));
    }

    #[test]
    fn remove_is_exact() {
        let list = MeasurementWhitelist::new(false);
        list.add_allowed_mr_enclave(A);
        list.add_allowed_mr_enclave(B);
        list.add_allowed_mr_enclave(A);
        assert_eq!(list.mr_enclaves().len(), 2);

        list.remove_allowed_mr_enclave(&A);
        assert!(!list.is_allowed_mr_enclave(&A));
        assert!(list.is_allowed_mr_enclave(&B));

        list.add_allowed_mr_signer(A);
        list.remove_allowed_mr_signer(&A);
        assert!(list.mr_signers().is_empty());
    }

    #[test]
    fn replace_swaps_lists_and_mode() {
        let list = MeasurementWhitelist::new(false);
        list.add_allowed_mr_enclave(A);
        list.replace(vec![B], vec![A], true);
        assert!(!list.is_allowed_mr_enclave(&A));
        assert!(list.is_allowed_mr_enclave(&B));
        assert!(!list.is_allowed_mr_signer(&B));
        assert!(list.admission_strict());

        list.replace(Vec::new(), Vec::new(), true);
        assert!(!list.is_allowed_mr_enclave(&B));
    }
}
