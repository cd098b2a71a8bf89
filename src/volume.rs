//! Orchestrator-facing volume types
//!
//! The driver's view of the surrounding orchestrator's value objects: the
//! volume configuration it prepares and annotates, the external
//! representation it streams back, and the attribute offers a storage pool
//! advertises.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Protocol & Access
// =============================================================================

/// Transport protocol a volume is consumed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    File,
    Block,
}

/// How many hosts may attach a volume concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessMode {
    ReadWriteOnce,
    ReadWriteMany,
}

// =============================================================================
// Volume Configuration
// =============================================================================

/// NFS access coordinates stamped onto a volume after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAccessInfo {
    pub nfs_server_ip: String,
    pub nfs_path: String,
}

/// The orchestrator's description of one logical volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfig {
    /// User-visible volume name.
    pub name: String,
    /// Name of the backing qtree (storage prefix included).
    pub internal_name: String,
    pub size_bytes: u64,
    pub protocol: Protocol,
    pub snapshot_policy: String,
    pub export_policy: String,
    pub snapshot_dir: String,
    pub unix_permissions: String,
    pub access_mode: AccessMode,
    pub access_info: VolumeAccessInfo,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            internal_name: String::new(),
            size_bytes: 0,
            protocol: Protocol::File,
            snapshot_policy: String::new(),
            export_policy: String::new(),
            snapshot_dir: String::new(),
            unix_permissions: String::new(),
            access_mode: AccessMode::ReadWriteMany,
            access_info: VolumeAccessInfo::default(),
        }
    }
}

/// A volume as reported back to the orchestrator, paired with the storage
/// pool (aggregate) it lives on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeExternal {
    pub config: VolumeConfig,
    pub pool: String,
}

/// A point-in-time snapshot of a volume. Qtrees cannot have snapshots, so
/// this driver only ever reports empty lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub created: String,
}

// =============================================================================
// Storage Pool Offers
// =============================================================================

/// Attribute keys a storage pool advertises to the orchestrator's matcher.
pub const BACKEND_TYPE: &str = "backendType";
pub const SNAPSHOTS: &str = "snapshots";
pub const CLONES: &str = "clones";
pub const ENCRYPTION: &str = "encryption";
pub const PROVISIONING_TYPE: &str = "provisioningType";

/// A capability offer advertised for one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Offer {
    Bool(bool),
    Strings(Vec<String>),
}

/// The orchestrator's record of one storage backend.
#[derive(Debug, Clone, Default)]
pub struct StorageBackend {
    pub name: String,
    pub pool_attributes: BTreeMap<&'static str, Offer>,
}
