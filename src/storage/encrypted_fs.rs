// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Secret files on a Gramine encrypted mount.
//!
//! ## Security Note
//!
//! This module uses **standard filesystem I/O**. Gramine encrypts every file
//! under a path the manifest mounts as `type = "encrypted"`; the store only
//! checks, at construction, that its directory is such a path.
//!
//! **DO NOT**:
//! - Implement any crypto operations in this module
//! - Access SGX key devices (`/dev/attestation/keys/*`)

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, info, warn};

use super::paths::{is_encrypted_mount, StoragePaths};
use super::secret::SecretEntry;

const WIPE_CHUNK: usize = 64 * 1024;

/// Error type for encrypted storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0} is not on a library-OS encrypted path")]
    EncryptedPathUnvalidated(String),

    #[error("secret not found: {0}")]
    NotFound(String),

    /// Gramine refused to decrypt: the file was modified outside the enclave.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("secret encoding: {0}")]
    Serialization(String),
}

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::EncryptedPathUnvalidated(_) => "encrypted_path_unvalidated",
            StorageError::NotFound(_) => "secret_not_found",
            StorageError::IntegrityViolation(_) => "integrity_violation",
            StorageError::Io(_) => "storage_io",
            StorageError::Serialization(_) => "secret_encoding",
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        // Gramine signals integrity failures as I/O errors
        let msg = e.to_string();
        if msg.contains("Authentication") || msg.contains("integrity") || msg.contains("tamper") {
            StorageError::IntegrityViolation(msg)
        } else if e.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(msg)
        } else {
            StorageError::Io(msg)
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// One file per secret under a validated encrypted directory.
#[derive(Debug, Clone)]
pub struct EncryptedStore {
    paths: StoragePaths,
}

impl EncryptedStore {
    /// Open the store at `root`.
    ///
    /// `encrypted_paths` is the manifest's `GRAMINE_ENCRYPTED_PATHS`. Fails
    /// with `EncryptedPathUnvalidated` unless `root` is listed there or
    /// carries the `.gramine_encrypted_fs` marker.
    pub fn open(root: impl AsRef<Path>, encrypted_paths: Option<&str>) -> StorageResult<Self> {
        let root = root.as_ref();
        if !is_encrypted_mount(root, encrypted_paths) {
            warn!(component = "storage", path = %root.display(), "Refusing unencrypted secret directory");
            return Err(StorageError::EncryptedPathUnvalidated(root.display().to_string()));
        }
        fs::create_dir_all(root)?;
        info!(component = "storage", path = %root.display(), "Encrypted secret store ready");
        Ok(Self {
            paths: StoragePaths::new(root),
        })
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Write (or replace) secret `id` atomically via rename.
    pub fn write_secret(&self, id: &[u8], data: &[u8]) -> StorageResult<()> {
        let path = self.secret_path(id)?;
        let temp_path = path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(data)?;
            file.flush()?;
        }
        fs::rename(&temp_path, &path)?;
        debug!(component = "storage", id = %hex::encode(id), len = data.len(), "Secret written");
        Ok(())
    }

    pub fn read_secret(&self, id: &[u8]) -> StorageResult<Vec<u8>> {
        let path = self.secret_path(id)?;
        let mut file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(hex::encode(id)),
            _ => StorageError::from(e),
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Wipe and remove secret `id`.
    pub fn delete_secret(&self, id: &[u8]) -> StorageResult<()> {
        let path = self.secret_path(id)?;
        if File::open(&path).is_err() {
            return Err(StorageError::NotFound(hex::encode(id)));
        }
        self.secure_delete(&path)
    }

    /// Ids of every stored secret, sorted.
    pub fn list_secrets(&self) -> StorageResult<Vec<Vec<u8>>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.paths.root())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(StoragePaths::secret_id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Overwrite `path` with random bytes of the same length, sync, then unlink.
    ///
    /// Once the overwrite is synced the old content is gone even if the
    /// unlink never happens.
    pub fn secure_delete(&self, path: &Path) -> StorageResult<()> {
        if !self.paths.contains(path) {
            return Err(StorageError::EncryptedPathUnvalidated(path.display().to_string()));
        }
        let len = fs::metadata(path)?.len();
        {
            let mut file = OpenOptions::new().write(true).open(path)?;
            let rng = SystemRandom::new();
            let mut chunk = vec![0u8; WIPE_CHUNK];
            let mut remaining = len;
            while remaining > 0 {
                let n = remaining.min(WIPE_CHUNK as u64) as usize;
                rng.fill(&mut chunk[..n])
                    .map_err(|_| StorageError::Io("random source unavailable".into()))?;
                file.write_all(&chunk[..n])?;
                remaining -= n as u64;
            }
            file.sync_all()?;
        }
        fs::remove_file(path)?;
        debug!(component = "storage", path = %path.display(), "Secret file wiped");
        Ok(())
    }

    pub fn put_entry(&self, entry: &SecretEntry) -> StorageResult<()> {
        let encoded = serde_json::to_vec(entry)?;
        self.write_secret(&entry.id, &encoded)
    }

    pub fn get_entry(&self, id: &[u8]) -> StorageResult<SecretEntry> {
        let raw = self.read_secret(id)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Every decodable entry. Files that are not entries are skipped.
    pub fn entries(&self) -> StorageResult<Vec<SecretEntry>> {
        let mut out = Vec::new();
        for id in self.list_secrets()? {
            match self.get_entry(&id) {
                Ok(entry) => out.push(entry),
                Err(StorageError::Serialization(e)) => {
                    debug!(component = "storage", id = %hex::encode(&id), error = %e, "Skipping non-entry secret file");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Wipe every entry whose expiry has passed. Returns how many went.
    pub fn purge_expired(&self, now: u64) -> StorageResult<usize> {
        let mut purged = 0;
        for entry in self.entries()? {
            if entry.is_expired(now) {
                self.secure_delete(&self.secret_path(&entry.id)?)?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(component = "storage", purged, "Expired secrets purged");
        }
        Ok(purged)
    }

    fn secret_path(&self, id: &[u8]) -> StorageResult<PathBuf> {
        if id.is_empty() {
            return Err(StorageError::Serialization("empty secret id".into()));
        }
        Ok(self.paths.secret(id))
    }
}
