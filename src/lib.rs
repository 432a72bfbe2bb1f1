// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! X-Chain SGX Core - attestation and secret replication
//!
//! Trusted core of an X-Chain node running inside an Intel SGX enclave under
//! Gramine. Peers prove, by remote attestation, that they run an approved
//! measurement before any long-lived secret is exchanged with them.
//!
//! ## Modules
//!
//! - `primitives` - constant-time comparison, hashing, RSA-3072 (e=3) verification
//! - `quote` - SGX quote codec, PCK extension, platform instance IDs
//! - `device` - library-OS attestation device
//! - `manifest` - SIGSTRUCT-anchored manifest verification
//! - `attestation` - quote/RA-TLS generation and DCAP verification
//! - `blockchain` - security-config and governance contract reads
//! - `oracle` - on-chain security-config mirror and measurement whitelist
//! - `storage` - secrets on Gramine encrypted files
//! - `sync` - peer secret replication and migration throttling

pub mod attestation;
pub mod blockchain;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod flavor;
pub mod manifest;
pub mod oracle;
pub mod primitives;
pub mod quote;
pub mod storage;
pub mod sync;
