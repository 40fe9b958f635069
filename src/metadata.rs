//! Device metadata directory
//!
//! Lookup contract for authenticator-model metadata keyed by AAGUID. The
//! directory itself is populated by an out-of-process sync job (not part of
//! this crate) that refreshes entries on a 7-day cache TTL; this module
//! defines the contract, the generic fallback records, and a small static
//! directory of well-known models so the crate is usable without the job.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use uuid::Uuid;

/// Cache TTL the sync job must honor for directory entries.
pub const METADATA_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Metadata for one authenticator model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor: String,
    pub model: String,
    pub transports: Vec<String>,
    pub certified: bool,
}

impl DeviceInfo {
    /// "Vendor Model" display form.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.vendor, self.model)
    }
}

/// Directory lookup contract.
#[async_trait]
pub trait DeviceMetadataDirectory: Send + Sync {
    /// Metadata for the given device family, if the directory knows it.
    async fn lookup(&self, aaguid: &Uuid) -> Option<DeviceInfo>;
}

static GENERIC_PLATFORM: Lazy<DeviceInfo> = Lazy::new(|| DeviceInfo {
    vendor: "Platform".to_string(),
    model: "Authenticator".to_string(),
    transports: vec!["internal".to_string(), "hybrid".to_string()],
    certified: false,
});

static GENERIC_CROSS_PLATFORM: Lazy<DeviceInfo> = Lazy::new(|| DeviceInfo {
    vendor: "Security".to_string(),
    model: "Key".to_string(),
    transports: vec!["usb".to_string(), "nfc".to_string()],
    certified: false,
});

/// Generic record for platform authenticators. An all-zero AAGUID always
/// maps here, regardless of directory contents.
#[must_use]
pub fn generic_platform() -> DeviceInfo {
    GENERIC_PLATFORM.clone()
}

/// Generic record for roaming authenticators with no directory entry.
#[must_use]
pub fn generic_cross_platform() -> DeviceInfo {
    GENERIC_CROSS_PLATFORM.clone()
}

/// A fixed in-memory directory.
///
/// `with_known_devices` seeds the handful of models that cover the vast
/// majority of real-world registrations; the sync job supersedes this in
/// deployments that run it.
#[derive(Debug, Default)]
pub struct StaticDeviceDirectory {
    entries: HashMap<Uuid, DeviceInfo>,
}

impl StaticDeviceDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-seeded with well-known authenticator models.
    #[must_use]
    pub fn with_known_devices() -> Self {
        let mut directory = Self::new();
        directory.insert(
            "ea9b8d66-4d01-1d21-3ce4-b6b48cb575d4",
            "Google",
            "Password Manager",
            &["internal", "hybrid"],
            true,
        );
        directory.insert(
            "fbfc3007-154e-4ecc-8c0b-6e020557d7bd",
            "Apple",
            "iCloud Keychain",
            &["internal", "hybrid"],
            true,
        );
        directory.insert(
            "08987058-cadc-4b81-b6e1-30de50dcbe96",
            "Microsoft",
            "Windows Hello",
            &["internal"],
            true,
        );
        directory.insert(
            "d548826e-79b4-db40-a3d8-11116f7e8349",
            "Bitwarden",
            "Passkey Vault",
            &["internal", "hybrid"],
            false,
        );
        directory.insert(
            "ee882879-721c-4913-9775-3dfcce97072a",
            "Yubico",
            "YubiKey 5 Series",
            &["usb", "nfc"],
            true,
        );
        directory
    }

    /// Add or replace an entry.
    pub fn insert(
        &mut self,
        aaguid: &str,
        vendor: &str,
        model: &str,
        transports: &[&str],
        certified: bool,
    ) {
        if let Ok(aaguid) = Uuid::parse_str(aaguid) {
            self.entries.insert(
                aaguid,
                DeviceInfo {
                    vendor: vendor.to_string(),
                    model: model.to_string(),
                    transports: transports.iter().map(ToString::to_string).collect(),
                    certified,
                },
            );
        }
    }
}

#[async_trait]
impl DeviceMetadataDirectory for StaticDeviceDirectory {
    async fn lookup(&self, aaguid: &Uuid) -> Option<DeviceInfo> {
        self.entries.get(aaguid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_aaguid_resolves() {
        let directory = StaticDeviceDirectory::with_known_devices();
        let aaguid = Uuid::parse_str("ee882879-721c-4913-9775-3dfcce97072a").unwrap();
        let info = directory.lookup(&aaguid).await.unwrap();
        assert_eq!(info.display_name(), "Yubico YubiKey 5 Series");
        assert!(info.transports.contains(&"usb".to_string()));
    }

    #[tokio::test]
    async fn unknown_aaguid_is_absent() {
        let directory = StaticDeviceDirectory::with_known_devices();
        assert!(directory.lookup(&Uuid::new_v4()).await.is_none());
    }

    #[test]
    fn generic_records_have_transports() {
        assert!(!generic_platform().transports.is_empty());
        assert!(!generic_cross_platform().transports.is_empty());
        assert!(!generic_platform().certified);
    }
}
