//! Device inventory and access-control collaborator seams.
//!
//! The gateway core never loads inventory files itself. It resolves hostnames
//! through the [`Inventory`] trait and checks tag-based access through the
//! [`AccessPolicy`] trait; the host application decides where descriptors come
//! from. [`StaticInventory`] and [`TagPolicy`] are the in-memory
//! implementations used for embedding and tests.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Network operating system families the gateway understands.
///
/// The platform selects prompt patterns on the SSH transport and namespaces
/// parser registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    IosXe,
    IosXr,
    Nxos,
    Eos,
    Junos,
    Asa,
}

impl Platform {
    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::IosXe => "iosxe",
            Platform::IosXr => "iosxr",
            Platform::Nxos => "nxos",
            Platform::Eos => "eos",
            Platform::Junos => "junos",
            Platform::Asa => "asa",
        }
    }
}

/// Complete view of an inventory entry, credentials included.
///
/// Immutable once loaded; the core only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Logical name used in gateway calls; unique inventory key.
    pub hostname: String,
    /// DNS name or management IP.
    pub host: String,
    /// Optional TCP port override; SSH default (22) when absent.
    pub port: Option<u16>,
    pub platform: Platform,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Arbitrary RBAC tags gating which identities may target this device.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DeviceDescriptor {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(22)
    }
}

/// Credential-free view of a device, safe to serialize in API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DevicePublic {
    pub hostname: String,
    pub host: String,
    pub platform: Platform,
    pub tags: Vec<String>,
}

impl From<&DeviceDescriptor> for DevicePublic {
    fn from(descriptor: &DeviceDescriptor) -> Self {
        Self {
            hostname: descriptor.hostname.clone(),
            host: descriptor.host.clone(),
            platform: descriptor.platform,
            tags: descriptor.tags.clone(),
        }
    }
}

/// Requester identity attached to every gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Identity {
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Tags this identity is allowed to target.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Identity {
    pub fn new(username: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            username: username.into(),
            roles: Vec::new(),
            tags,
        }
    }
}

/// Hostname resolution collaborator.
pub trait Inventory: Send + Sync {
    /// Returns the descriptor for `hostname`, or `None` if unknown.
    fn resolve(&self, hostname: &str) -> Option<DeviceDescriptor>;

    /// All descriptors, for listing endpoints. Order is unspecified.
    fn all(&self) -> Vec<DeviceDescriptor>;
}

/// Tag-based access-control collaborator.
pub trait AccessPolicy: Send + Sync {
    /// Whether `identity` may target a device carrying `device_tags`.
    fn authorize(&self, identity: &Identity, device_tags: &[String]) -> bool;
}

/// Fixed in-memory inventory.
#[derive(Debug, Default)]
pub struct StaticInventory {
    devices: HashMap<String, DeviceDescriptor>,
}

impl StaticInventory {
    pub fn new(devices: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|d| (d.hostname.clone(), d))
                .collect(),
        }
    }
}

impl Inventory for StaticInventory {
    fn resolve(&self, hostname: &str) -> Option<DeviceDescriptor> {
        self.devices.get(hostname).cloned()
    }

    fn all(&self) -> Vec<DeviceDescriptor> {
        self.devices.values().cloned().collect()
    }
}

/// Default policy: the `admin` role sees everything, everyone else needs a
/// non-empty intersection between their tags and the device's tags.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagPolicy;

impl AccessPolicy for TagPolicy {
    fn authorize(&self, identity: &Identity, device_tags: &[String]) -> bool {
        if identity.roles.iter().any(|r| r == "admin") {
            return true;
        }
        device_tags.iter().any(|t| identity.tags.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab_device() -> DeviceDescriptor {
        DeviceDescriptor {
            hostname: "r1".to_string(),
            host: "10.0.0.1".to_string(),
            port: None,
            platform: Platform::Ios,
            username: "ops".to_string(),
            password: "secret".to_string(),
            tags: vec!["lab".to_string()],
        }
    }

    #[test]
    fn static_inventory_resolves_known_hosts_only() {
        let inventory = StaticInventory::new([lab_device()]);
        assert!(inventory.resolve("r1").is_some());
        assert!(inventory.resolve("r9").is_none());
    }

    #[test]
    fn tag_policy_requires_intersection() {
        let policy = TagPolicy;
        let alice = Identity::new("alice", vec!["lab".to_string()]);
        let bob = Identity::new("bob", vec!["prod".to_string()]);

        assert!(policy.authorize(&alice, &["lab".to_string()]));
        assert!(!policy.authorize(&bob, &["lab".to_string()]));
    }

    #[test]
    fn admin_role_bypasses_tags() {
        let policy = TagPolicy;
        let root = Identity {
            username: "root".to_string(),
            roles: vec!["admin".to_string()],
            tags: Vec::new(),
        };
        assert!(policy.authorize(&root, &["lab".to_string()]));
    }

    #[test]
    fn public_view_drops_credentials() {
        let public = DevicePublic::from(&lab_device());
        let json = serde_json::to_string(&public).expect("serialize public view");
        assert!(!json.contains("secret"));
        assert!(json.contains("\"platform\":\"ios\""));
    }

    #[test]
    fn descriptor_defaults_to_ssh_port() {
        assert_eq!(lab_device().port(), 22);
    }
}
