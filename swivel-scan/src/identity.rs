//! Identity resolution across address rotation
//!
//! Maps a raw observation (hardware address + advertised service ids) to a
//! stable device key. Resolution order:
//! 1. A device whose last known address equals the observed address
//! 2. A device carrying the same GATT signature, most recently seen first
//!    (the device rotated its address)
//! 3. Otherwise a fresh device key
//!
//! Two distinct devices advertising identical service sets are merged by
//! rule 2. That is a known limitation of signature matching.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use swivel_common::db::Device;
use swivel_common::{Error, Result};
use tracing::debug;
use uuid::Uuid;

/// Device lookups needed by the resolver
#[async_trait]
pub trait DeviceLookup: Send + Sync {
    async fn find_by_address(&self, address: &str) -> Result<Option<Device>>;

    /// Most recently seen device carrying this signature
    async fn find_by_signature(&self, signature: &str) -> Result<Option<Device>>;
}

/// How an observation was matched to its device key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityMatch {
    /// Address seen before under this key
    Address,
    /// Address rotated; matched on GATT signature
    Reidentified { previous_address: String },
    /// First observation of this device
    New,
}

/// Result of resolving one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub device_key: String,
    /// Normalized observed address
    pub address: String,
    pub gatt_signature: Option<String>,
    pub matched: IdentityMatch,
}

impl Resolution {
    pub fn is_new(&self) -> bool {
        self.matched == IdentityMatch::New
    }

    pub fn previous_address(&self) -> Option<&str> {
        match &self.matched {
            IdentityMatch::Reidentified { previous_address } => Some(previous_address),
            _ => None,
        }
    }
}

/// Resolves raw observations to stable device keys
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    /// Minimum advertised services before a signature is computed
    min_services: usize,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self { min_services: 1 }
    }

    /// Require more advertised services before signature matching applies
    pub fn with_min_services(mut self, min_services: usize) -> Self {
        self.min_services = min_services.max(1);
        self
    }

    /// Signature for the service set, honoring the minimum service count
    pub fn signature_for<S: AsRef<str>>(&self, service_ids: &[S]) -> Option<String> {
        let services = normalize_services(service_ids);
        if services.len() < self.min_services {
            return None;
        }
        signature_of(&services)
    }

    /// Resolve an observation to a device key
    ///
    /// Read-only: the caller persists the result through the store.
    pub async fn resolve<S: AsRef<str> + Sync>(
        &self,
        lookup: &dyn DeviceLookup,
        raw_address: &str,
        service_ids: &[S],
    ) -> Result<Resolution> {
        let address = normalize_address(raw_address);
        if address.is_empty() {
            return Err(Error::InvalidInput("Observation has an empty address".to_string()));
        }

        let gatt_signature = self.signature_for(service_ids);

        if let Some(device) = lookup.find_by_address(&address).await? {
            debug!(device_key = %device.device_key, address = %address, "Matched device by address");
            return Ok(Resolution {
                device_key: device.device_key,
                address,
                gatt_signature,
                matched: IdentityMatch::Address,
            });
        }

        if let Some(signature) = &gatt_signature {
            if let Some(device) = lookup.find_by_signature(signature).await? {
                debug!(
                    device_key = %device.device_key,
                    previous_address = %device.last_known_address,
                    new_address = %address,
                    "Re-identified device by GATT signature"
                );
                return Ok(Resolution {
                    device_key: device.device_key,
                    address,
                    gatt_signature,
                    matched: IdentityMatch::Reidentified {
                        previous_address: device.last_known_address,
                    },
                });
            }
        }

        let device_key = Uuid::new_v4().to_string();
        debug!(device_key = %device_key, address = %address, "New device");
        Ok(Resolution {
            device_key,
            address,
            gatt_signature,
            matched: IdentityMatch::New,
        })
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical address form: trimmed, upper-case
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// GATT signature of a service set
///
/// Hex SHA-256 over the sorted, de-duplicated, lower-cased service ids
/// joined with `,`. Order and duplicates in the input do not matter.
/// Returns `None` for an empty set.
pub fn gatt_signature<S: AsRef<str>>(service_ids: &[S]) -> Option<String> {
    signature_of(&normalize_services(service_ids))
}

fn normalize_services<S: AsRef<str>>(service_ids: &[S]) -> BTreeSet<String> {
    service_ids
        .iter()
        .map(|id| id.as_ref().trim().to_ascii_lowercase())
        .filter(|id| !id.is_empty())
        .collect()
}

fn signature_of(services: &BTreeSet<String>) -> Option<String> {
    if services.is_empty() {
        return None;
    }

    let joined = services.iter().map(String::as_str).collect::<Vec<_>>().join(",");
    let digest = Sha256::digest(joined.as_bytes());
    Some(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;

    /// In-memory device table
    #[derive(Default)]
    struct FakeDevices {
        devices: Mutex<Vec<Device>>,
    }

    impl FakeDevices {
        fn with(devices: Vec<Device>) -> Self {
            Self {
                devices: Mutex::new(devices),
            }
        }
    }

    #[async_trait]
    impl DeviceLookup for FakeDevices {
        async fn find_by_address(&self, address: &str) -> Result<Option<Device>> {
            let devices = self.devices.lock().unwrap();
            Ok(devices.iter().find(|d| d.last_known_address == address).cloned())
        }

        async fn find_by_signature(&self, signature: &str) -> Result<Option<Device>> {
            let devices = self.devices.lock().unwrap();
            Ok(devices
                .iter()
                .filter(|d| d.gatt_signature.as_deref() == Some(signature))
                .max_by_key(|d| d.last_seen_at)
                .cloned())
        }
    }

    fn device(key: &str, address: &str, services: &[&str], minutes_ago: i64) -> Device {
        let seen = Utc::now() - Duration::minutes(minutes_ago);
        Device {
            device_key: key.to_string(),
            name: None,
            last_known_address: address.to_string(),
            gatt_signature: gatt_signature(services),
            times_seen: 1,
            first_seen_at: seen,
            last_seen_at: seen,
        }
    }

    #[test]
    fn test_signature_ignores_order_case_and_duplicates() {
        let a = gatt_signature(&["180F", "180a", "180F"]);
        let b = gatt_signature(&["180a", "180f"]);
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(a.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_signature_differs_for_different_sets() {
        assert_ne!(gatt_signature(&["180f"]), gatt_signature(&["180f", "180a"]));
    }

    #[test]
    fn test_empty_service_set_has_no_signature() {
        let empty: [&str; 0] = [];
        assert_eq!(gatt_signature(&empty), None);
        assert_eq!(gatt_signature(&["", "  "]), None);
    }

    #[test]
    fn test_min_services() {
        let resolver = IdentityResolver::new().with_min_services(2);
        assert_eq!(resolver.signature_for(&["180f"]), None);
        assert!(resolver.signature_for(&["180f", "180a"]).is_some());
    }

    #[tokio::test]
    async fn test_address_match_wins() {
        let lookup = FakeDevices::with(vec![
            device("by-address", "AA:BB:CC:DD:EE:01", &["180f"], 10),
            device("by-signature", "AA:BB:CC:DD:EE:02", &["180a"], 1),
        ]);

        let resolution = IdentityResolver::new()
            .resolve(&lookup, "aa:bb:cc:dd:ee:01", &["180a"])
            .await
            .unwrap();

        assert_eq!(resolution.device_key, "by-address");
        assert_eq!(resolution.address, "AA:BB:CC:DD:EE:01");
        assert_eq!(resolution.matched, IdentityMatch::Address);
    }

    #[tokio::test]
    async fn test_rotated_address_reidentified_by_signature() {
        let lookup = FakeDevices::with(vec![device("watch", "AA:BB", &["X", "Y"], 5)]);

        let resolution = IdentityResolver::new()
            .resolve(&lookup, "CC:DD", &["Y", "X"])
            .await
            .unwrap();

        assert_eq!(resolution.device_key, "watch");
        assert_eq!(resolution.previous_address(), Some("AA:BB"));
        assert_eq!(resolution.gatt_signature, gatt_signature(&["x", "y"]));
    }

    #[tokio::test]
    async fn test_signature_match_prefers_most_recent() {
        let lookup = FakeDevices::with(vec![
            device("older", "01", &["X"], 60),
            device("newer", "02", &["X"], 1),
        ]);

        let resolution = IdentityResolver::new().resolve(&lookup, "03", &["X"]).await.unwrap();
        assert_eq!(resolution.device_key, "newer");
    }

    #[tokio::test]
    async fn test_no_services_never_signature_matched() {
        let lookup = FakeDevices::with(vec![device("other", "01", &[], 1)]);
        let empty: [&str; 0] = [];

        let resolution = IdentityResolver::new().resolve(&lookup, "02", &empty).await.unwrap();
        assert!(resolution.is_new());
        assert_eq!(resolution.gatt_signature, None);
        assert_ne!(resolution.device_key, "other");
    }

    #[tokio::test]
    async fn test_new_devices_get_distinct_keys() {
        let lookup = FakeDevices::default();
        let resolver = IdentityResolver::new();

        let a = resolver.resolve(&lookup, "01", &["X"]).await.unwrap();
        let b = resolver.resolve(&lookup, "02", &["Y"]).await.unwrap();
        assert!(a.is_new() && b.is_new());
        assert_ne!(a.device_key, b.device_key);
    }

    #[tokio::test]
    async fn test_empty_address_rejected() {
        let lookup = FakeDevices::default();
        let err = IdentityResolver::new().resolve(&lookup, "  ", &["X"]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
