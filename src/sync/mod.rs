// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Secret Replication
//!
//! Request/response replication of [`SecretEntry`](crate::storage::SecretEntry)
//! values between enclaves on the MRENCLAVE whitelist, plus the
//! upgrade-driven migration scheduler with its daily cap.

pub mod manager;
pub mod migration;
pub mod types;

pub use manager::{SyncManager, RESYNC_AFTER_SECS};
pub use migration::{AutoMigrationManager, MigrationRecord, MigrationStats};
pub use types::{PeerId, PeerRecord, PermissionLevel, RequestId, SyncRequest, SyncResponse, SyncStatus};

use crate::attestation::AttestationError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("peer {0} is not on the MRENCLAVE whitelist")]
    PeerNotWhitelisted(String),

    #[error("no outstanding sync request {0}")]
    UnknownSyncRequest(String),

    #[error("sync response signature invalid")]
    ResponseSignatureInvalid,

    #[error("a migration is already in progress")]
    MigrationInProgress,

    #[error("daily migration cap reached for {tier} tier ({count}/{cap})")]
    MigrationLimitExceeded {
        tier: &'static str,
        count: u64,
        cap: u64,
    },

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::PeerNotFound(_) => "peer_not_found",
            SyncError::PeerNotWhitelisted(_) => "peer_not_whitelisted",
            SyncError::UnknownSyncRequest(_) => "unknown_sync_request",
            SyncError::ResponseSignatureInvalid => "response_signature_invalid",
            SyncError::MigrationInProgress => "migration_in_progress",
            SyncError::MigrationLimitExceeded { .. } => "migration_limit_exceeded",
            SyncError::Attestation(e) => e.kind(),
            SyncError::Storage(e) => e.kind(),
        }
    }
}
