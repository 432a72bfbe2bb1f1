// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Automatic Key Migration
//!
//! Once the chain passes the upgrade-complete height, re-opens sync with
//! every pending peer, throttled by a per-day cap.
//!
//! The cap comes from the *lowest* [`PermissionLevel`] among the known peers:
//!
//! | Tier | Migrations per UTC day |
//! |------|------------------------|
//! | Basic | 10 |
//! | Standard | 100 |
//! | Full | unlimited |
//!
//! Only today's record is kept; earlier days are dropped on the next
//! migration. The lifetime total is a separate counter.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::manager::SyncManager;
use super::types::{PermissionLevel, SyncRequest, SyncStatus};
use super::SyncError;
use crate::blockchain::BlockSource;
use crate::clock::Clock;
use crate::primitives::MrEnclave;

/// One UTC day of migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Unix seconds of the first migration that day.
    pub timestamp: i64,
    pub count: u64,
}

/// Snapshot returned by [`AutoMigrationManager::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStats {
    pub status: SyncStatus,
    /// `YYYYMMDD`, UTC.
    pub day: String,
    pub today_count: u64,
    pub total_count: u64,
    pub first_migration_at: Option<i64>,
}

struct MigrationState {
    status: SyncStatus,
    records: BTreeMap<String, MigrationRecord>,
    total: u64,
}

pub struct AutoMigrationManager {
    sync: Arc<SyncManager>,
    blocks: Arc<dyn BlockSource>,
    clock: Arc<dyn Clock>,
    upgrade_complete_block: u64,
    permissions: Mutex<Vec<(MrEnclave, PermissionLevel)>>,
    state: Mutex<MigrationState>,
}

impl AutoMigrationManager {
    pub fn new(
        sync: Arc<SyncManager>,
        blocks: Arc<dyn BlockSource>,
        clock: Arc<dyn Clock>,
        upgrade_complete_block: u64,
    ) -> Self {
        Self {
            sync,
            blocks,
            clock,
            upgrade_complete_block,
            permissions: Mutex::new(Vec::new()),
            state: Mutex::new(MigrationState {
                status: SyncStatus::Pending,
                records: BTreeMap::new(),
                total: 0,
            }),
        }
    }

    pub fn upgrade_complete_block(&self) -> u64 {
        self.upgrade_complete_block
    }

    pub fn set_permission(&self, mr_enclave: MrEnclave, level: PermissionLevel) {
        let mut permissions = self.permissions.lock().unwrap_or_else(PoisonError::into_inner);
        match permissions.iter_mut().find(|(m, _)| *m == mr_enclave) {
            Some(entry) => entry.1 = level,
            None => permissions.push((mr_enclave, level)),
        }
        info!(component = "migration", mr_enclave = %mr_enclave, level = level.as_str(), "Permission level set");
    }

    /// Tier of `mr_enclave`; unregistered measurements are `Basic`.
    pub fn permission(&self, mr_enclave: &MrEnclave) -> PermissionLevel {
        self.permissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(m, _)| m == mr_enclave)
            .map(|(_, level)| *level)
            .unwrap_or(PermissionLevel::Basic)
    }

    /// Lowest tier over every known peer, `Basic` with no peers.
    pub fn lowest_tier(&self) -> PermissionLevel {
        self.sync
            .peers()
            .iter()
            .map(|peer| self.permission(&peer.mr_enclave))
            .min()
            .unwrap_or(PermissionLevel::Basic)
    }

    /// Fail with `MigrationLimitExceeded` if today's cap is used up.
    pub fn enforce_migration_limit(&self) -> Result<(), SyncError> {
        let tier = self.lowest_tier();
        let state = self.lock();
        self.enforce_migration_limit_internal(&state, tier)
    }

    fn enforce_migration_limit_internal(&self, state: &MigrationState, tier: PermissionLevel) -> Result<(), SyncError> {
        let Some(cap) = tier.daily_cap() else {
            return Ok(());
        };
        let count = state.records.get(&self.today()).map_or(0, |r| r.count);
        if count >= cap {
            return Err(SyncError::MigrationLimitExceeded {
                tier: tier.as_str(),
                count,
                cap,
            });
        }
        Ok(())
    }

    /// Count one migration against today's cap and open sync with every
    /// pending, whitelisted peer. The requests are returned for delivery.
    pub fn perform_migration(&self) -> Result<Vec<SyncRequest>, SyncError> {
        let tier = self.lowest_tier();
        {
            let mut state = self.lock();
            if state.status == SyncStatus::InProgress {
                return Err(SyncError::MigrationInProgress);
            }
            self.enforce_migration_limit_internal(&state, tier)?;

            let now = self.clock.unix_now();
            let today = self.today();
            state.records = state.records.split_off(&today);
            let record = state.records.entry(today).or_insert(MigrationRecord {
                timestamp: now,
                count: 0,
            });
            record.count += 1;
            state.total += 1;
            state.status = SyncStatus::InProgress;
        }

        let mut requests = Vec::new();
        for peer in self.sync.peers() {
            if peer.status != SyncStatus::Pending {
                continue;
            }
            match self.sync.request_sync(&peer.peer_id, &[]) {
                Ok(request) => requests.push(request),
                Err(e) => debug!(
                    component = "migration",
                    peer = %hex::encode(peer.peer_id),
                    kind = e.kind(),
                    "Peer skipped"
                ),
            }
        }

        self.lock().status = SyncStatus::Completed;
        info!(component = "migration", tier = tier.as_str(), requests = requests.len(), "Migration performed");
        Ok(requests)
    }

    pub fn stats(&self) -> MigrationStats {
        let day = self.today();
        let state = self.lock();
        let today = state.records.get(&day);
        MigrationStats {
            status: state.status,
            today_count: today.map_or(0, |r| r.count),
            first_migration_at: today.map(|r| r.timestamp),
            total_count: state.total,
            day,
        }
    }

    /// Spawn the migration loop.
    pub fn start(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run(interval, shutdown).await })
    }

    async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        info!(
            component = "migration",
            interval_secs = interval.as_secs(),
            upgrade_complete_block = self.upgrade_complete_block,
            "Migration scheduler starting"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown.cancelled() => {
                    info!(component = "migration", "Migration scheduler shutting down");
                    return;
                }
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        if self.lock().status == SyncStatus::InProgress {
            return;
        }
        let height = match self.blocks.block_number().await {
            Ok(height) => height,
            Err(e) => {
                warn!(component = "migration", error = %e, "Block height unavailable");
                return;
            }
        };
        if height < self.upgrade_complete_block {
            debug!(component = "migration", height, "Upgrade not complete");
            return;
        }
        if let Err(e) = self.perform_migration() {
            error!(component = "migration", kind = e.kind(), error = %e, "Migration failed");
        }
    }

    fn today(&self) -> String {
        self.clock.now().format("%Y%m%d").to_string()
    }

    fn lock(&self) -> MutexGuard<'_, MigrationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
