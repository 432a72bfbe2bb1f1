// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Encrypted Secret Storage
//!
//! Replicable secrets kept on a **Gramine encrypted files** mount.
//!
//! ## Security Model
//!
//! - Gramine encrypts and authenticates every file under the mount
//! - Keys are derived by Gramine from the enclave identity
//! - A file modified on the host fails to read inside the enclave
//! - The store refuses to open on a path Gramine does not encrypt
//!
//! ## Storage Layout
//!
//! ```text
//! /data/secrets/
//!   .gramine_encrypted_fs   # marker, when not listed in GRAMINE_ENCRYPTED_PATHS
//!   {hex(secret_id)}        # one JSON-encoded SecretEntry per file
//! ```
//!
//! No cryptography happens here; deletion overwrites before unlinking.

pub mod encrypted_fs;
pub mod paths;
pub mod secret;

pub use encrypted_fs::{EncryptedStore, StorageError, StorageResult};
pub use paths::StoragePaths;
pub use secret::{SecretEntry, SecretKind};
