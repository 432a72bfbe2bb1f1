// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Build Flavor
//!
//! The enclave is built either for production or for a test environment
//! (`--features testenv`). The test flavor relaxes exactly three checks:
//!
//! | Check | Production | Test environment |
//! |-------|------------|------------------|
//! | Manifest SIGSTRUCT MRENCLAVE vs. runtime MRENCLAVE | fatal | warning |
//! | Trusted-file SHA-256 listed in the manifest | fatal | warning |
//! | Certificate public key vs. quote `report_data` | compared | skipped |
//!
//! Nothing else may depend on the flavor. Components read
//! [`BuildFlavor::CURRENT`] at construction time; tests may override it.

/// Compile-time build flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildFlavor {
    /// All checks are fatal.
    Production,
    /// Test vectors and development enclaves.
    TestEnv,
}

impl BuildFlavor {
    /// The flavor this crate was compiled with.
    #[cfg(not(feature = "testenv"))]
    pub const CURRENT: BuildFlavor = BuildFlavor::Production;

    /// The flavor this crate was compiled with.
    #[cfg(feature = "testenv")]
    pub const CURRENT: BuildFlavor = BuildFlavor::TestEnv;

    /// Manifest MRENCLAVE mismatch against the running enclave is only a warning.
    pub fn tolerates_runtime_mismatch(self) -> bool {
        matches!(self, BuildFlavor::TestEnv)
    }

    /// Missing or mismatching trusted files are only a warning.
    pub fn tolerates_trusted_file_mismatch(self) -> bool {
        matches!(self, BuildFlavor::TestEnv)
    }

    /// The certificate public key is not compared against the quote `report_data`.
    pub fn skips_report_data_binding(self) -> bool {
        matches!(self, BuildFlavor::TestEnv)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildFlavor::Production => "production",
            BuildFlavor::TestEnv => "testenv",
        }
    }
}

impl Default for BuildFlavor {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl std::fmt::Display for BuildFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_relaxes_nothing() {
        let flavor = BuildFlavor::Production;
        assert!(!flavor.tolerates_runtime_mismatch());
        assert!(!flavor.tolerates_trusted_file_mismatch());
        assert!(!flavor.skips_report_data_binding());
    }

    #[test]
    fn testenv_relaxes_exactly_three_checks() {
        let flavor = BuildFlavor::TestEnv;
        assert!(flavor.tolerates_runtime_mismatch());
        assert!(flavor.tolerates_trusted_file_mismatch());
        assert!(flavor.skips_report_data_binding());
    }

    #[test]
    fn default_is_compiled_flavor() {
        assert_eq!(BuildFlavor::default(), BuildFlavor::CURRENT);
    }
}
