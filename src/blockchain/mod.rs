// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain access for the security-parameter and governance contracts.
//!
//! This module provides:
//! - The current block height (migration scheduling)
//! - Reads of the on-chain `SecurityConfig` and key migration threshold

pub mod client;
pub mod contracts;

pub use client::{parse_address, BlockSource, ChainClient, ChainClientError};
pub use contracts::{GovernanceContract, SecurityConfigContract};
