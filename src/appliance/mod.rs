//! Appliance RPC port
//!
//! The driver talks to the NAS appliance through this trait. The transport
//! (wire protocol, sessions, retries, timeouts) lives behind the
//! implementation; the driver only needs the operations below and the two
//! error codes it must distinguish. All operations are idempotent on the
//! appliance side and safe for concurrent callers.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
pub(crate) mod mock;

pub type ApplianceResult<T> = std::result::Result<T, ApplianceError>;

// =============================================================================
// Errors
// =============================================================================

/// API error codes the driver changes behavior on. Everything else is
/// carried as a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    DuplicateEntry,
    VolumeDoesNotExist,
}

/// Error returned by the appliance client.
#[derive(Error, Debug, Clone)]
pub enum ApplianceError {
    /// The request never completed (connection refused, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The appliance processed the request and rejected it.
    #[error("{message}")]
    Api {
        code: Option<ApiErrorCode>,
        message: String,
    },
}

impl ApplianceError {
    pub fn api(message: impl Into<String>) -> Self {
        ApplianceError::Api {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApplianceError::Api {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn is_duplicate_entry(&self) -> bool {
        matches!(
            self,
            ApplianceError::Api {
                code: Some(ApiErrorCode::DuplicateEntry),
                ..
            }
        )
    }

    pub fn is_volume_missing(&self) -> bool {
        matches!(
            self,
            ApplianceError::Api {
                code: Some(ApiErrorCode::VolumeDoesNotExist),
                ..
            }
        )
    }
}

// =============================================================================
// Wire Values
// =============================================================================

/// Request to create a new Flexvol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexvolCreateRequest {
    pub name: String,
    pub aggregate: String,
    /// Appliance size string, e.g. `"1g"`.
    pub size: String,
    pub space_reserve: String,
    pub snapshot_policy: String,
    pub unix_permissions: String,
    pub export_policy: String,
    pub security_style: String,
    /// `None` leaves encryption to the appliance default.
    pub encrypt: Option<bool>,
}

/// Placement attributes a Flexvol must match to receive a new qtree.
///
/// `encryption` is a tri-state: `None` is a wildcard that matches any
/// volume, on either side of the comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlexvolAttributes {
    pub aggregate: String,
    pub space_reserve: String,
    pub snapshot_policy: String,
    pub snapshot_dir: bool,
    pub encryption: Option<bool>,
}

impl FlexvolAttributes {
    /// Attribute match against an existing Flexvol.
    pub fn matches(&self, info: &FlexvolInfo) -> bool {
        if info.aggregate != self.aggregate
            || info.space_reserve != self.space_reserve
            || info.snapshot_policy != self.snapshot_policy
            || info.snapshot_dir_access_enabled != self.snapshot_dir
        {
            return false;
        }
        match (self.encryption, info.encryption) {
            (None, _) | (_, None) => true,
            (Some(wanted), Some(actual)) => wanted == actual,
        }
    }
}

/// Flexvol attributes as reported by the appliance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexvolInfo {
    pub name: String,
    pub aggregate: String,
    pub space_reserve: String,
    pub snapshot_policy: String,
    pub snapshot_dir_access_enabled: bool,
    pub encryption: Option<bool>,
    pub snapshot_reserve_percent: u64,
    pub size_bytes: u64,
}

/// Qtree attributes as reported by the appliance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QtreeInfo {
    pub name: String,
    pub flexvol: String,
    pub unix_permissions: String,
    pub export_policy: String,
    pub security_style: String,
}

impl QtreeInfo {
    /// The appliance path addressing this qtree.
    pub fn path(&self) -> String {
        format!("/vol/{}/{}", self.flexvol, self.name)
    }
}

/// A tree quota rule bound to `(flexvol, target)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaEntry {
    pub flexvol: String,
    /// `""` for the Flexvol default entry, otherwise `/vol/<flexvol>/<qtree>`.
    pub target: String,
    pub qtree_type: String,
    /// Hard disk limit in KiB; `None` is unlimited (`"-"` on the wire).
    pub disk_limit_kb: Option<u64>,
}

impl QuotaEntry {
    /// The default entry required once on every managed Flexvol.
    pub fn default_for(flexvol: &str) -> Self {
        Self {
            flexvol: flexvol.to_string(),
            target: String::new(),
            qtree_type: "tree".to_string(),
            disk_limit_kb: None,
        }
    }

    /// A per-qtree entry with a hard limit derived from the requested size.
    pub fn tree_limit(flexvol: &str, qtree: &str, size_bytes: u64) -> Self {
        Self {
            flexvol: flexvol.to_string(),
            target: format!("/vol/{}/{}", flexvol, qtree),
            qtree_type: "tree".to_string(),
            disk_limit_kb: Some(size_bytes / 1024),
        }
    }

    /// The disk limit as the appliance expects it.
    pub fn disk_limit_field(&self) -> String {
        match self.disk_limit_kb {
            Some(kb) => kb.to_string(),
            None => "-".to_string(),
        }
    }
}

/// Per-Flexvol quota state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaStatus {
    On,
    Off,
    Mixed,
    Resizing,
    Corrupt,
    Other(String),
}

impl std::str::FromStr for QuotaStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "on" => QuotaStatus::On,
            "off" => QuotaStatus::Off,
            "mixed" => QuotaStatus::Mixed,
            "resizing" => QuotaStatus::Resizing,
            "corrupt" => QuotaStatus::Corrupt,
            other => QuotaStatus::Other(other.to_string()),
        })
    }
}

impl std::fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaStatus::On => write!(f, "on"),
            QuotaStatus::Off => write!(f, "off"),
            QuotaStatus::Mixed => write!(f, "mixed"),
            QuotaStatus::Resizing => write!(f, "resizing"),
            QuotaStatus::Corrupt => write!(f, "corrupt"),
            QuotaStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A Flexvol resize request: either an absolute size or a relative growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeChange {
    Absolute(u64),
    GrowBy(u64),
}

impl std::fmt::Display for SizeChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeChange::Absolute(bytes) => write!(f, "{}", bytes),
            SizeChange::GrowBy(bytes) => write!(f, "+{}", bytes),
        }
    }
}

/// A client-access rule within an export policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRule {
    pub client_match: String,
    pub protocols: Vec<String>,
    pub ro_rule: Vec<String>,
    pub rw_rule: Vec<String>,
    pub super_user: Vec<String>,
}

impl ExportRule {
    /// The baseline rule permitting NFS access from anywhere.
    pub fn nfs_default() -> Self {
        Self {
            client_match: "0.0.0.0/0".to_string(),
            protocols: vec!["nfs".to_string()],
            ro_rule: vec!["any".to_string()],
            rw_rule: vec!["any".to_string()],
            super_user: vec!["any".to_string()],
        }
    }
}

/// Optional appliance capabilities the driver probes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplianceFeature {
    VolumeEncryption,
}

// =============================================================================
// Appliance Client Port
// =============================================================================

/// Port for all appliance RPC operations the driver requires.
#[async_trait]
pub trait ApplianceClient: Send + Sync {
    // --- Flexvols ---

    async fn volume_create(&self, request: &FlexvolCreateRequest) -> ApplianceResult<()>;

    async fn volume_mount(&self, name: &str, junction_path: &str) -> ApplianceResult<()>;

    async fn volume_destroy(&self, name: &str, force: bool) -> ApplianceResult<()>;

    async fn volume_disable_snapshot_directory_access(&self, name: &str) -> ApplianceResult<()>;

    async fn volume_get(&self, name: &str) -> ApplianceResult<FlexvolInfo>;

    /// Names of all volumes whose names begin with `prefix`.
    async fn volume_list(&self, prefix: &str) -> ApplianceResult<Vec<String>>;

    /// Names of all volumes matching `prefix` and the placement attributes.
    async fn volume_list_by_attrs(
        &self,
        prefix: &str,
        attrs: &FlexvolAttributes,
    ) -> ApplianceResult<Vec<String>>;

    /// Full attributes of all volumes whose names begin with `prefix`.
    async fn volume_get_all(&self, prefix: &str) -> ApplianceResult<Vec<FlexvolInfo>>;

    async fn set_volume_size(&self, name: &str, size: SizeChange) -> ApplianceResult<()>;

    /// Refresh load-sharing mirrors of the SVM root volume so clients see
    /// new junctions. A no-op when no mirrors exist.
    async fn refresh_load_sharing_mirrors(&self) -> ApplianceResult<()>;

    // --- Qtrees ---

    async fn qtree_create(
        &self,
        name: &str,
        flexvol: &str,
        unix_permissions: &str,
        export_policy: &str,
        security_style: &str,
    ) -> ApplianceResult<()>;

    async fn qtree_rename(&self, path: &str, new_path: &str) -> ApplianceResult<()>;

    async fn qtree_destroy_async(&self, path: &str, force: bool) -> ApplianceResult<()>;

    /// Look for a qtree by name across all Flexvols matching
    /// `flexvol_prefix`; returns the containing Flexvol if found.
    async fn qtree_exists(
        &self,
        name: &str,
        flexvol_prefix: &str,
    ) -> ApplianceResult<Option<String>>;

    /// All qtrees whose names begin with `name_prefix` inside Flexvols
    /// matching `flexvol_prefix`.
    async fn qtree_list(
        &self,
        name_prefix: &str,
        flexvol_prefix: &str,
    ) -> ApplianceResult<Vec<QtreeInfo>>;

    async fn qtree_count(&self, flexvol: &str) -> ApplianceResult<usize>;

    async fn qtree_get(&self, name: &str, flexvol_prefix: &str) -> ApplianceResult<QtreeInfo>;

    async fn qtree_get_all(&self, flexvol_prefix: &str) -> ApplianceResult<Vec<QtreeInfo>>;

    // --- Quotas ---

    async fn quota_on(&self, flexvol: &str) -> ApplianceResult<()>;

    async fn quota_off(&self, flexvol: &str) -> ApplianceResult<()>;

    async fn quota_resize(&self, flexvol: &str) -> ApplianceResult<()>;

    async fn quota_status(&self, flexvol: &str) -> ApplianceResult<QuotaStatus>;

    async fn quota_set_entry(&self, entry: &QuotaEntry) -> ApplianceResult<()>;

    /// Quota entries for one Flexvol, or for every Flexvol matching a
    /// trailing-`*` pattern.
    async fn quota_entry_list(&self, volume_pattern: &str) -> ApplianceResult<Vec<QuotaEntry>>;

    async fn quota_entry_get(&self, target: &str) -> ApplianceResult<QuotaEntry>;

    // --- Export policies ---

    async fn export_policy_create(&self, policy: &str) -> ApplianceResult<()>;

    async fn export_rule_list(&self, policy: &str) -> ApplianceResult<Vec<ExportRule>>;

    async fn export_rule_create(&self, policy: &str, rule: &ExportRule) -> ApplianceResult<()>;

    // --- Capabilities ---

    fn supports_feature(&self, feature: ApplianceFeature) -> bool;
}

pub type ApplianceClientRef = Arc<dyn ApplianceClient>;
