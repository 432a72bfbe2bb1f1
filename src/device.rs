// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Attestation Device
//!
//! Access to the library OS attestation pseudo-files.
//!
//! | Path                                | Direction | Content                          |
//! |-------------------------------------|-----------|----------------------------------|
//! | `/dev/attestation/my_target_info`   | read      | target info, MRENCLAVE at `[0..32]` |
//! | `/dev/attestation/user_report_data` | write     | 64 bytes bound into the next quote |
//! | `/dev/attestation/quote`            | read      | quote over the last report data  |
//!
//! The devices are process-wide. [`GramineDevice::open`] takes an exclusive
//! lease that is released when the device is dropped, so at most one handle
//! exists per process.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use ring::rand::{SecureRandom, SystemRandom};
use tracing::debug;

use crate::primitives::{Measurement, MrEnclave, MrSigner};
use crate::quote::layout::REPORT_DATA_LEN;
use crate::quote::{QuoteBuilder, SignType};

/// Default mount point of the attestation pseudo-files.
pub const DEFAULT_DEVICE_ROOT: &str = "/dev/attestation";

const TARGET_INFO: &str = "my_target_info";
const USER_REPORT_DATA: &str = "user_report_data";
const QUOTE: &str = "quote";

/// Size of an SGX `TARGETINFO` record.
pub const TARGET_INFO_LEN: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("attestation device already acquired by this process")]
    AlreadyAcquired,

    #[error("attestation device {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("attestation device {path} returned {actual} bytes, need at least {needed}")]
    ShortRead {
        path: PathBuf,
        needed: usize,
        actual: usize,
    },

    #[error("random source failure")]
    Random,
}

impl DeviceError {
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceError::AlreadyAcquired => "device_already_acquired",
            DeviceError::Io { .. } => "device_io",
            DeviceError::ShortRead { .. } => "device_short_read",
            DeviceError::Random => "random_unavailable",
        }
    }
}

/// Library OS attestation surface.
pub trait AttestationDevice: Send + Sync {
    /// Raw `my_target_info` record.
    fn target_info(&self) -> Result<Vec<u8>, DeviceError>;

    /// Bind `report_data` and return the resulting quote.
    fn quote(&self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<Vec<u8>, DeviceError>;

    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// MRENCLAVE of the running enclave (first 32 bytes of the target info).
    fn runtime_mr_enclave(&self) -> Result<MrEnclave, DeviceError> {
        let info = self.target_info()?;
        Measurement::from_slice(info.get(..Measurement::LEN).unwrap_or(&[])).ok_or(
            DeviceError::ShortRead {
                path: PathBuf::from(TARGET_INFO),
                needed: Measurement::LEN,
                actual: info.len(),
            },
        )
    }
}

static DEVICE_LEASE: AtomicBool = AtomicBool::new(false);

/// Exclusive ownership of the process-wide attestation devices.
#[derive(Debug)]
struct DeviceLease;

impl DeviceLease {
    fn acquire() -> Result<Self, DeviceError> {
        DEVICE_LEASE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| DeviceLease)
            .map_err(|_| DeviceError::AlreadyAcquired)
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        DEVICE_LEASE.store(false, Ordering::Release);
    }
}

/// Gramine's `/dev/attestation` interface.
#[derive(Debug)]
pub struct GramineDevice {
    root: PathBuf,
    _lease: DeviceLease,
}

impl GramineDevice {
    /// Open the devices under `root`, taking the process-wide lease.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let lease = DeviceLease::acquire()?;
        let root = root.as_ref().to_path_buf();
        let target_info = root.join(TARGET_INFO);
        if !target_info.exists() {
            return Err(DeviceError::Io {
                path: target_info,
                reason: "not present (not running under the library OS?)".into(),
            });
        }
        debug!(root = %root.display(), "Attestation device opened");
        Ok(Self {
            root,
            _lease: lease,
        })
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, DeviceError> {
        let path = self.root.join(name);
        fs::read(&path).map_err(|e| DeviceError::Io {
            reason: e.to_string(),
            path,
        })
    }
}

impl AttestationDevice for GramineDevice {
    fn target_info(&self) -> Result<Vec<u8>, DeviceError> {
        self.read(TARGET_INFO)
    }

    fn quote(&self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<Vec<u8>, DeviceError> {
        let path = self.root.join(USER_REPORT_DATA);
        fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|mut f| f.write_all(report_data))
            .map_err(|e| DeviceError::Io {
                reason: e.to_string(),
                path: path.clone(),
            })?;
        self.read(QUOTE)
    }

    fn name(&self) -> &'static str {
        "gramine"
    }
}

/// Identity presented by a [`MockDevice`].
#[derive(Debug, Clone, Copy)]
pub struct MockIdentity {
    pub mr_enclave: MrEnclave,
    pub mr_signer: MrSigner,
    pub isv_prod_id: u16,
    pub isv_svn: u16,
}

impl Default for MockIdentity {
    fn default() -> Self {
        Self {
            mr_enclave: Measurement::new([0x11; 32]),
            mr_signer: Measurement::new([0x22; 32]),
            isv_prod_id: 1,
            isv_svn: 1,
        }
    }
}

/// In-process stand-in that synthesizes bare 432-byte quotes.
///
/// Each instance draws its own platform bytes, so quotes from one instance
/// share a platform instance ID and quotes from different instances do not.
#[derive(Debug, Clone)]
pub struct MockDevice {
    identity: MockIdentity,
    platform: [u8; 16],
}

impl MockDevice {
    pub fn new(identity: MockIdentity) -> Result<Self, DeviceError> {
        let mut platform = [0u8; 16];
        SystemRandom::new()
            .fill(&mut platform)
            .map_err(|_| DeviceError::Random)?;
        Ok(Self { identity, platform })
    }

    pub fn identity(&self) -> &MockIdentity {
        &self.identity
    }
}

impl AttestationDevice for MockDevice {
    fn target_info(&self) -> Result<Vec<u8>, DeviceError> {
        let mut info = vec![0u8; TARGET_INFO_LEN];
        info[..Measurement::LEN].copy_from_slice(self.identity.mr_enclave.as_bytes());
        Ok(info)
    }

    fn quote(&self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<Vec<u8>, DeviceError> {
        Ok(QuoteBuilder::new(3, SignType::EcdsaP256)
            .platform_bytes(self.platform)
            .mr_enclave(self.identity.mr_enclave)
            .mr_signer(self.identity.mr_signer)
            .isv_prod_id(self.identity.isv_prod_id)
            .isv_svn(self.identity.isv_svn)
            .report_data(report_data)
            .build()
            .to_bytes())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::{extract_platform_instance_id, Quote};

    #[test]
    fn mock_quotes_carry_identity_and_report_data() {
        let device = MockDevice::new(MockIdentity::default()).unwrap();
        let raw = device.quote(&[0xab; 64]).unwrap();
        assert_eq!(raw.len(), 432);
        let quote = Quote::parse(&raw).unwrap();
        assert_eq!(quote.mr_enclave(), MockIdentity::default().mr_enclave);
        assert_eq!(quote.report_data(), &[0xab; 64]);
        assert_eq!(device.runtime_mr_enclave().unwrap(), quote.mr_enclave());
    }

    #[test]
    fn mock_platform_id_is_per_instance() {
        let a = MockDevice::new(MockIdentity::default()).unwrap();
        let b = MockDevice::new(MockIdentity::default()).unwrap();
        let id = |d: &MockDevice, rd: u8| extract_platform_instance_id(&d.quote(&[rd; 64]).unwrap()).unwrap();
        assert!(id(&a, 1).same_platform(&id(&a, 2)));
        assert!(!id(&a, 1).same_platform(&id(&b, 1)));
    }

    #[test]
    fn gramine_device_is_exclusive_and_roundtrips_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut info = vec![0u8; TARGET_INFO_LEN];
        info[..32].copy_from_slice(&[0x5a; 32]);
        fs::write(dir.path().join(TARGET_INFO), &info).unwrap();
        fs::write(dir.path().join(USER_REPORT_DATA), []).unwrap();
        fs::write(dir.path().join(QUOTE), b"quote-bytes").unwrap();

        let device = GramineDevice::open(dir.path()).unwrap();
        assert!(matches!(
            GramineDevice::open(dir.path()),
            Err(DeviceError::AlreadyAcquired)
        ));
        assert_eq!(
            device.runtime_mr_enclave().unwrap(),
            Measurement::new([0x5a; 32])
        );
        assert_eq!(device.quote(&[7; 64]).unwrap(), b"quote-bytes");
        assert_eq!(
            fs::read(dir.path().join(USER_REPORT_DATA)).unwrap(),
            vec![7u8; 64]
        );

        drop(device);
        let reopened = GramineDevice::open(dir.path()).unwrap();
        drop(reopened);

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            GramineDevice::open(empty.path()),
            Err(DeviceError::Io { .. })
        ));
    }
}
