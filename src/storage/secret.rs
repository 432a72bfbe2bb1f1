// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Replicable secrets.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire tags are `0x01..=0x04`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum SecretKind {
    PrivateKey = 0x01,
    SealingKey = 0x02,
    NodeIdentity = 0x03,
    SharedSecret = 0x04,
}

impl SecretKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SecretKind::PrivateKey => "private_key",
            SecretKind::SealingKey => "sealing_key",
            SecretKind::NodeIdentity => "node_identity",
            SecretKind::SharedSecret => "shared_secret",
        }
    }
}

impl TryFrom<u8> for SecretKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(SecretKind::PrivateKey),
            0x02 => Ok(SecretKind::SealingKey),
            0x03 => Ok(SecretKind::NodeIdentity),
            0x04 => Ok(SecretKind::SharedSecret),
            other => Err(format!("unknown secret kind 0x{other:02x}")),
        }
    }
}

impl From<SecretKind> for u8 {
    fn from(kind: SecretKind) -> Self {
        kind.as_u8()
    }
}

/// One secret as stored and as replicated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    pub kind: SecretKind,
    #[serde(with = "hex")]
    pub id: Vec<u8>,
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds; 0 never expires.
    pub expires_at: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl SecretEntry {
    pub fn new(kind: SecretKind, id: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>, created_at: u64) -> Self {
        Self {
            kind,
            id: id.into(),
            payload: payload.into(),
            created_at,
            expires_at: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_expiry(mut self, expires_at: u64) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && now >= self.expires_at
    }
}

// Payloads never reach logs.
impl fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretEntry")
            .field("kind", &self.kind)
            .field("id", &hex::encode(&self.id))
            .field("payload_len", &self.payload.len())
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
