// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Core-wide error umbrella.
//!
//! Each component keeps its own error enum; [`CoreError`] only exists so the
//! binary and integration callers can log any of them the same way.

use tracing::error;

use crate::attestation::AttestationError;
use crate::blockchain::ChainClientError;
use crate::config::ConfigError;
use crate::device::DeviceError;
use crate::manifest::ManifestError;
use crate::oracle::OracleError;
use crate::primitives::PrimitiveError;
use crate::quote::QuoteError;
use crate::storage::StorageError;
use crate::sync::SyncError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Primitive(#[from] PrimitiveError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Chain(#[from] ChainClientError),
}

impl CoreError {
    /// Component that raised the error.
    pub fn component(&self) -> &'static str {
        match self {
            CoreError::Primitive(_) => "primitives",
            CoreError::Quote(_) => "quote",
            CoreError::Manifest(_) => "manifest",
            CoreError::Attestation(_) | CoreError::Device(_) => "attestation",
            CoreError::Oracle(_) | CoreError::Chain(_) => "oracle",
            CoreError::Storage(_) => "storage",
            CoreError::Sync(SyncError::Storage(_)) => "storage",
            CoreError::Sync(SyncError::MigrationInProgress | SyncError::MigrationLimitExceeded { .. }) => {
                "migration"
            }
            CoreError::Sync(_) => "sync",
            CoreError::Config(_) => "config",
        }
    }

    /// Stable snake_case code.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Primitive(e) => e.kind(),
            CoreError::Quote(e) => e.kind(),
            CoreError::Manifest(e) => e.kind(),
            CoreError::Attestation(e) => e.kind(),
            CoreError::Oracle(e) => e.kind(),
            CoreError::Storage(e) => e.kind(),
            CoreError::Sync(e) => e.kind(),
            CoreError::Config(e) => e.kind(),
            CoreError::Device(e) => e.kind(),
            CoreError::Chain(e) => e.kind(),
        }
    }

    /// Emit the error as one structured line.
    pub fn log(&self) {
        error!(component = self.component(), kind = self.kind(), error = %self, "Core operation failed");
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_come_from_the_component_error() {
        let err = CoreError::from(SyncError::MigrationLimitExceeded {
            tier: "basic",
            count: 10,
            cap: 10,
        });
        assert_eq!(err.component(), "migration");
        assert_eq!(err.kind(), "migration_limit_exceeded");
        assert!(err.to_string().contains("10/10"));

        let err = CoreError::from(SyncError::Storage(StorageError::EncryptedPathUnvalidated("/tmp".into())));
        assert_eq!(err.component(), "storage");
        assert_eq!(err.kind(), "encrypted_path_unvalidated");

        let err = CoreError::from(AttestationError::TcbRevoked);
        assert_eq!(err.component(), "attestation");
        assert_eq!(err.kind(), "tcb_revoked");

        let err = CoreError::from(ConfigError::DowngradeRefused {
            field: "admission_strict",
            source_name: "cli",
        });
        assert_eq!(err.kind(), "downgrade_refused");
        err.log();
    }
}
