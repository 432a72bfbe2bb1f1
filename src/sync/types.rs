// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Peer records and sync messages.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::primitives::MrEnclave;
use crate::quote::Quote;
use crate::storage::{SecretEntry, SecretKind};

pub type PeerId = [u8; 32];
pub type RequestId = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Per-MRENCLAVE trust tier; sets the daily migration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum PermissionLevel {
    Basic = 0x01,
    Standard = 0x02,
    Full = 0x03,
}

impl PermissionLevel {
    /// Migrations allowed per UTC day; `None` is unlimited.
    pub fn daily_cap(self) -> Option<u64> {
        match self {
            PermissionLevel::Basic => Some(10),
            PermissionLevel::Standard => Some(100),
            PermissionLevel::Full => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::Basic => "basic",
            PermissionLevel::Standard => "standard",
            PermissionLevel::Full => "full",
        }
    }
}

impl TryFrom<u8> for PermissionLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PermissionLevel::Basic),
            0x02 => Ok(PermissionLevel::Standard),
            0x03 => Ok(PermissionLevel::Full),
            other => Err(format!("unknown permission level 0x{other:02x}")),
        }
    }
}

impl From<PermissionLevel> for u8 {
    fn from(level: PermissionLevel) -> Self {
        level as u8
    }
}

/// A peer admitted by quote or certificate verification.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub mr_enclave: MrEnclave,
    pub quote: Quote,
    /// P-384 identity key, known when the peer was admitted by certificate.
    pub identity_key: Option<Vec<u8>>,
    /// Unix seconds of the last completed sync; 0 before the first.
    pub last_sync: i64,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(with = "hex")]
    pub request_id: RequestId,
    /// The requesting node.
    #[serde(with = "hex")]
    pub peer_id: PeerId,
    /// Empty asks for every kind.
    pub secret_kinds: Vec<SecretKind>,
    pub timestamp: u64,
}

impl SyncRequest {
    pub fn wants(&self, kind: SecretKind) -> bool {
        self.secret_kinds.is_empty() || self.secret_kinds.contains(&kind)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(with = "hex")]
    pub request_id: RequestId,
    /// The responding node.
    #[serde(with = "hex")]
    pub peer_id: PeerId,
    /// MRENCLAVE of the responder.
    pub mr_enclave: MrEnclave,
    pub secrets: Vec<SecretEntry>,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
    pub timestamp: u64,
}

impl SyncResponse {
    /// SHA-256 over every field except the signature, length-prefixed.
    pub fn digest(&self) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(b"xchain-sync-response-v1");
        h.update(self.request_id);
        h.update(self.peer_id);
        h.update(self.mr_enclave.as_bytes());
        h.update(self.timestamp.to_le_bytes());
        h.update((self.secrets.len() as u64).to_le_bytes());
        for secret in &self.secrets {
            h.update([secret.kind.as_u8()]);
            update_field(&mut h, &secret.id);
            update_field(&mut h, &secret.payload);
            h.update(secret.created_at.to_le_bytes());
            h.update(secret.expires_at.to_le_bytes());
            h.update((secret.metadata.len() as u64).to_le_bytes());
            for (key, value) in &secret.metadata {
                update_field(&mut h, key.as_bytes());
                update_field(&mut h, value.as_bytes());
            }
        }
        h.finalize().into()
    }
}

fn update_field(h: &mut Sha256, bytes: &[u8]) {
    h.update((bytes.len() as u64).to_le_bytes());
    h.update(bytes);
}

impl fmt::Debug for SyncResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncResponse")
            .field("request_id", &hex::encode(self.request_id))
            .field("peer_id", &hex::encode(self.peer_id))
            .field("mr_enclave", &self.mr_enclave)
            .field("secrets", &self.secrets.len())
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Measurement;

    fn response() -> SyncResponse {
        SyncResponse {
            request_id: [1; 32],
            peer_id: [2; 32],
            mr_enclave: Measurement::new([3; 32]),
            secrets: vec![SecretEntry::new(SecretKind::SealingKey, b"id".to_vec(), b"payload".to_vec(), 5)
                .with_metadata("purpose", "sealing")],
            signature: vec![],
            timestamp: 9,
        }
    }

    #[test]
    fn permission_levels_order_and_caps() {
        assert!(PermissionLevel::Basic < PermissionLevel::Standard);
        assert!(PermissionLevel::Standard < PermissionLevel::Full);
        assert_eq!(PermissionLevel::Basic.daily_cap(), Some(10));
        assert_eq!(PermissionLevel::Standard.daily_cap(), Some(100));
        assert_eq!(PermissionLevel::Full.daily_cap(), None);
        assert_eq!(PermissionLevel::try_from(0x02), Ok(PermissionLevel::Standard));
        assert!(PermissionLevel::try_from(0x04).is_err());
    }

    #[test]
    fn empty_kind_list_wants_everything() {
        let mut request = SyncRequest {
            request_id: [0; 32],
            peer_id: [0; 32],
            secret_kinds: vec![],
            timestamp: 0,
        };
        assert!(request.wants(SecretKind::NodeIdentity));
        request.secret_kinds = vec![SecretKind::PrivateKey];
        assert!(request.wants(SecretKind::PrivateKey));
        assert!(!request.wants(SecretKind::NodeIdentity));
    }

    #[test]
    fn digest_covers_contents_but_not_signature() {
        let base = response();
        let mut signed = base.clone();
        signed.signature = vec![0xff; 96];
        assert_eq!(base.digest(), signed.digest());

        let mut altered = base.clone();
        altered.secrets[0].payload.push(0);
        assert_ne!(base.digest(), altered.digest());

        let mut relabelled = base.clone();
        relabelled.secrets[0].metadata.insert("purpose".into(), "other".into());
        assert_ne!(base.digest(), relabelled.digest());
    }

    #[test]
    fn messages_serialize_as_json() {
        let json = serde_json::to_string(&response()).unwrap();
        let back: SyncResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response());
    }
}
