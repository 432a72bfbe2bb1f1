// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::primitives::{MrEnclave, MrSigner};

/// Which measurements a verifier admits.
///
/// Implemented by the oracle's whitelist; verifiers hold it behind an `Arc`
/// and ask on every call instead of caching the lists.
pub trait MeasurementPolicy: Send + Sync {
    fn is_allowed_mr_enclave(&self, measurement: &MrEnclave) -> bool;

    fn is_allowed_mr_signer(&self, measurement: &MrSigner) -> bool;
}
