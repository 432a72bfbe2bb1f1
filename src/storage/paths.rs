// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Secret file layout and the encrypted-mount check.

use std::path::{Component, Path, PathBuf};

use crate::config::ENCRYPTED_FS_MARKER;

/// Storage path utilities for the encrypted secret directory.
///
/// ```text
/// <root>/
///   .gramine_encrypted_fs   # optional marker
///   <hex(secret id)>        # one file per secret
/// ```
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the file holding secret `id`.
    pub fn secret(&self, id: &[u8]) -> PathBuf {
        self.root.join(hex::encode(id))
    }

    pub fn marker(&self) -> PathBuf {
        self.root.join(ENCRYPTED_FS_MARKER)
    }

    /// Secret id encoded in a file name, if it is one of ours.
    pub fn secret_id(file_name: &str) -> Option<Vec<u8>> {
        if file_name.is_empty() || file_name.starts_with('.') {
            return None;
        }
        hex::decode(file_name).ok().filter(|id| !id.is_empty())
    }

    /// True when `path` is inside the root.
    pub fn contains(&self, path: &Path) -> bool {
        is_plain(path) && path.starts_with(&self.root) && path != self.root
    }
}

/// Whether the library OS mounts `root` encrypted: `root` is (under) an
/// entry of the comma-separated `encrypted_paths` list from the manifest,
/// or carries the marker file.
pub fn is_encrypted_mount(root: &Path, encrypted_paths: Option<&str>) -> bool {
    if !root.is_absolute() || !is_plain(root) {
        return false;
    }
    let listed = encrypted_paths
        .into_iter()
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| root.starts_with(entry));
    listed || root.join(ENCRYPTED_FS_MARKER).is_file()
}

/// No `..` or `.` components.
fn is_plain(path: &Path) -> bool {
    path.components()
        .all(|c| !matches!(c, Component::ParentDir | Component::CurDir))
}
