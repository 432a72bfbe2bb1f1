// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Secret Sync Manager
//!
//! Replicates secrets between attested enclaves.
//!
//! ## Peer lifecycle
//!
//! ```text
//! add_peer ──► Pending ──request_sync──► InProgress ──apply ok──► Completed
//!                 ▲                           │                        │
//!                 │                           └──apply failed──► Failed │
//!                 └───────────── heartbeat, one hour after ─────────────┘
//! ```
//!
//! `Failed` is left only by `remove_peer` and a fresh `add_peer`.
//!
//! ## Locking
//!
//! Peers and outstanding requests share one mutex. It is never held across
//! verification or disk I/O: calls snapshot what they need, release, do the
//! work, then re-acquire to commit.
//!
//! Applying a response is serialized with peer insertion, removal and new
//! requests through a second gate mutex, taken before the state mutex and
//! held for the whole apply. Once `remove_peer` returns, no write from that
//! peer's responses can land.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{PeerId, PeerRecord, RequestId, SyncRequest, SyncResponse, SyncStatus};
use super::SyncError;
use crate::attestation::{verify_identity_signature, AttestationError, IdentityKey, MeasurementPolicy, Verifier};
use crate::clock::Clock;
use crate::primitives::{sha256_concat, MrEnclave};
use crate::storage::{EncryptedStore, SecretKind};

/// A completed peer becomes due again after this long.
pub const RESYNC_AFTER_SECS: i64 = 3600;

struct OutstandingRequest {
    peer_id: PeerId,
    secret_kinds: Vec<SecretKind>,
}

#[derive(Default)]
struct SyncState {
    peers: HashMap<PeerId, PeerRecord>,
    sync_requests: HashMap<RequestId, OutstandingRequest>,
    request_counter: u64,
}

pub struct SyncManager {
    local_peer_id: PeerId,
    local_mr_enclave: MrEnclave,
    identity: Arc<IdentityKey>,
    verifier: Arc<Verifier>,
    policy: Arc<dyn MeasurementPolicy>,
    store: Arc<EncryptedStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<SyncState>,
    apply_gate: Mutex<()>,
}

impl SyncManager {
    pub fn new(
        local_peer_id: PeerId,
        local_mr_enclave: MrEnclave,
        identity: Arc<IdentityKey>,
        verifier: Arc<Verifier>,
        policy: Arc<dyn MeasurementPolicy>,
        store: Arc<EncryptedStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local_peer_id,
            local_mr_enclave,
            identity,
            verifier,
            policy,
            store,
            clock,
            state: Mutex::new(SyncState::default()),
            apply_gate: Mutex::new(()),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub fn store(&self) -> &Arc<EncryptedStore> {
        &self.store
    }

    /// Admit a peer by its quote. `mr_enclave` must be what the quote attests.
    pub async fn add_peer(&self, peer_id: PeerId, mr_enclave: MrEnclave, quote: &[u8]) -> Result<(), SyncError> {
        let verified = self.verifier.verify_quote(quote).await?;
        if verified.quote.mr_enclave() != mr_enclave {
            return Err(AttestationError::EnclaveIdentityRejected(
                "claimed MRENCLAVE differs from the quote".into(),
            )
            .into());
        }
        self.insert_peer(PeerRecord {
            peer_id,
            mr_enclave,
            quote: verified.quote,
            identity_key: None,
            last_sync: 0,
            status: SyncStatus::Pending,
        });
        Ok(())
    }

    /// Admit a peer by its RA-TLS certificate; its responses must then be
    /// signed with the certified key.
    pub async fn add_peer_from_certificate(&self, peer_id: PeerId, der: &[u8]) -> Result<MrEnclave, SyncError> {
        let verified = self.verifier.verify_certificate(der).await?;
        let mr_enclave = verified.quote.quote.mr_enclave();
        self.insert_peer(PeerRecord {
            peer_id,
            mr_enclave,
            quote: verified.quote.quote,
            identity_key: Some(verified.public_key),
            last_sync: 0,
            status: SyncStatus::Pending,
        });
        Ok(mr_enclave)
    }

    fn insert_peer(&self, record: PeerRecord) {
        info!(
            component = "sync",
            peer = %hex::encode(record.peer_id),
            mr_enclave = %record.mr_enclave,
            by_certificate = record.identity_key.is_some(),
            "Peer added"
        );
        let _gate = self.gate();
        self.lock().peers.insert(record.peer_id, record);
    }

    pub fn remove_peer(&self, peer_id: &PeerId) -> Result<(), SyncError> {
        let _gate = self.gate();
        let mut state = self.lock();
        state.peers.remove(peer_id).ok_or_else(|| SyncError::PeerNotFound(hex::encode(peer_id)))?;
        state.sync_requests.retain(|_, r| r.peer_id != *peer_id);
        info!(component = "sync", peer = %hex::encode(peer_id), "Peer removed");
        Ok(())
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.lock().peers.get(peer_id).cloned()
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.lock().peers.values().cloned().collect()
    }

    /// Open a request to `peer_id`; the returned message goes to the peer.
    pub fn request_sync(&self, peer_id: &PeerId, secret_kinds: &[SecretKind]) -> Result<SyncRequest, SyncError> {
        let now = self.clock.now();
        let _gate = self.gate();
        let mut state = self.lock();
        let peer = state
            .peers
            .get(peer_id)
            .ok_or_else(|| SyncError::PeerNotFound(hex::encode(peer_id)))?;
        if !self.policy.is_allowed_mr_enclave(&peer.mr_enclave) {
            return Err(SyncError::PeerNotWhitelisted(hex::encode(peer_id)));
        }

        state.request_counter += 1;
        let nanos = now.timestamp_nanos_opt().unwrap_or_default();
        let request_id = sha256_concat(&[
            peer_id.as_slice(),
            &nanos.to_le_bytes(),
            &state.request_counter.to_le_bytes(),
        ]);
        state.sync_requests.insert(
            request_id,
            OutstandingRequest {
                peer_id: *peer_id,
                secret_kinds: secret_kinds.to_vec(),
            },
        );
        if let Some(peer) = state.peers.get_mut(peer_id) {
            peer.status = SyncStatus::InProgress;
        }
        debug!(component = "sync", peer = %hex::encode(peer_id), request = %hex::encode(request_id), "Sync requested");

        Ok(SyncRequest {
            request_id,
            peer_id: self.local_peer_id,
            secret_kinds: secret_kinds.to_vec(),
            timestamp: now.timestamp().max(0) as u64,
        })
    }

    /// Answer a peer's request with the matching, unexpired local secrets,
    /// signed with the node identity key.
    pub fn handle_sync_request(&self, request: &SyncRequest) -> Result<SyncResponse, SyncError> {
        {
            let state = self.lock();
            let requester = state
                .peers
                .get(&request.peer_id)
                .ok_or_else(|| SyncError::PeerNotFound(hex::encode(request.peer_id)))?;
            if !self.policy.is_allowed_mr_enclave(&requester.mr_enclave) {
                return Err(SyncError::PeerNotWhitelisted(hex::encode(request.peer_id)));
            }
        }

        let now = self.clock.unix_now().max(0) as u64;
        let secrets: Vec<_> = self
            .store
            .entries()?
            .into_iter()
            .filter(|entry| !entry.is_expired(now) && request.wants(entry.kind))
            .collect();

        let mut response = SyncResponse {
            request_id: request.request_id,
            peer_id: self.local_peer_id,
            mr_enclave: self.local_mr_enclave,
            secrets,
            signature: Vec::new(),
            timestamp: now,
        };
        response.signature = self.identity.sign(&response.digest())?;

        info!(
            component = "sync",
            peer = %hex::encode(request.peer_id),
            secrets = response.secrets.len(),
            "Sync request served"
        );
        Ok(response)
    }

    /// Apply a response to one of our outstanding requests.
    ///
    /// The request record is consumed before any write, so a replayed
    /// response fails with `UnknownSyncRequest`.
    pub fn verify_and_apply_sync(&self, response: &SyncResponse) -> Result<usize, SyncError> {
        let _gate = self.gate();
        let (requested, identity_key) = {
            let mut state = self.lock();
            let matches = state
                .sync_requests
                .get(&response.request_id)
                .is_some_and(|r| r.peer_id == response.peer_id);
            if !matches {
                return Err(SyncError::UnknownSyncRequest(hex::encode(response.request_id)));
            }
            let Some(outstanding) = state.sync_requests.remove(&response.request_id) else {
                return Err(SyncError::UnknownSyncRequest(hex::encode(response.request_id)));
            };

            let Some(peer) = state.peers.get_mut(&response.peer_id) else {
                return Err(SyncError::PeerNotFound(hex::encode(response.peer_id)));
            };
            let admitted = self.policy.is_allowed_mr_enclave(&peer.mr_enclave)
                && self.policy.is_allowed_mr_enclave(&response.mr_enclave)
                && peer.mr_enclave == response.mr_enclave;
            if !admitted {
                peer.status = SyncStatus::Failed;
                warn!(component = "sync", kind = "peer_not_whitelisted", peer = %hex::encode(response.peer_id), "Sync response rejected");
                return Err(SyncError::PeerNotWhitelisted(hex::encode(response.peer_id)));
            }
            (outstanding.secret_kinds, peer.identity_key.clone())
        };

        if let Some(key) = identity_key {
            if !verify_identity_signature(&key, &response.digest(), &response.signature) {
                self.set_status(&response.peer_id, SyncStatus::Failed, None);
                warn!(component = "sync", kind = "response_signature_invalid", peer = %hex::encode(response.peer_id), "Sync response rejected");
                return Err(SyncError::ResponseSignatureInvalid);
            }
        }

        let mut written = 0;
        for secret in &response.secrets {
            if !requested.is_empty() && !requested.contains(&secret.kind) {
                debug!(component = "sync", kind = secret.kind.as_str(), "Skipping unrequested secret kind");
                continue;
            }
            if let Err(e) = self.store.put_entry(secret) {
                self.set_status(&response.peer_id, SyncStatus::Failed, None);
                return Err(e.into());
            }
            written += 1;
        }

        self.set_status(&response.peer_id, SyncStatus::Completed, Some(self.clock.unix_now()));
        info!(component = "sync", peer = %hex::encode(response.peer_id), written, "Sync applied");
        Ok(written)
    }

    /// Flip peers completed over an hour ago back to `Pending`. Returns
    /// how many flipped.
    pub fn check_peer_health(&self) -> usize {
        let now = self.clock.unix_now();
        let mut state = self.lock();
        let mut flipped = 0;
        for peer in state.peers.values_mut() {
            if peer.status == SyncStatus::Completed && now - peer.last_sync > RESYNC_AFTER_SECS {
                peer.status = SyncStatus::Pending;
                flipped += 1;
            }
        }
        if flipped > 0 {
            debug!(component = "sync", flipped, "Peers due for re-sync");
        }
        flipped
    }

    /// Spawn the heartbeat loop.
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            info!(component = "sync", interval_secs = interval.as_secs(), "Sync heartbeat starting");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {},
                    _ = shutdown.cancelled() => {
                        info!(component = "sync", "Sync heartbeat shutting down");
                        return;
                    }
                }
                manager.check_peer_health();
            }
        })
    }

    fn set_status(&self, peer_id: &PeerId, status: SyncStatus, last_sync: Option<i64>) {
        if let Some(peer) = self.lock().peers.get_mut(peer_id) {
            peer.status = status;
            if let Some(at) = last_sync {
                peer.last_sync = at;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.apply_gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
