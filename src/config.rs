//! Driver configuration
//!
//! The orchestrator hands the driver two documents: a common section shared
//! by every storage driver (storage prefix, debug flags) and a driver-specific
//! JSON document with appliance addressing and provisioning defaults. Only
//! the options this driver consumes are modeled here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Smallest volume the driver will provision, in bytes (20 MiB).
pub const MINIMUM_VOLUME_SIZE_BYTES: u64 = 20_971_520;

/// Provisioning defaults applied when the config leaves an option empty.
pub mod defaults {
    pub const SPACE_RESERVE: &str = "none";
    pub const SNAPSHOT_POLICY: &str = "none";
    pub const SNAPSHOT_DIR: &str = "false";
    pub const UNIX_PERMISSIONS: &str = "---rwxrwxrwx";
    pub const EXPORT_POLICY: &str = "default";
    pub const SECURITY_STYLE: &str = "unix";
    pub const ENCRYPTION: &str = "false";
}

// =============================================================================
// Common Configuration
// =============================================================================

/// Configuration shared by all storage drivers under one orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommonConfig {
    pub version: u32,
    pub storage_driver_name: String,
    /// Prefix prepended to every qtree name this driver manages.
    pub storage_prefix: Option<String>,
    /// Debug switches; `debug_trace_flags["method"]` enables method
    /// entry/exit tracing.
    pub debug_trace_flags: HashMap<String, bool>,
}

// =============================================================================
// Driver Configuration
// =============================================================================

/// Driver-specific configuration, parsed from the orchestrator's JSON
/// backend document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    // Appliance addressing and credentials
    #[serde(rename = "managementLIF")]
    pub management_lif: String,
    #[serde(rename = "dataLIF")]
    pub data_lif: String,
    pub svm: String,
    pub username: String,
    pub password: String,

    // Provisioning defaults, overridable per-volume via opts
    pub aggregate: String,
    pub space_reserve: String,
    pub snapshot_policy: String,
    pub snapshot_dir: String,
    pub encryption: String,
    pub unix_permissions: String,
    pub export_policy: String,
    pub security_style: String,

    // Housekeeping periods in seconds, as decimal strings; empty or invalid
    // values fall back to built-in defaults
    pub qtree_prune_flexvols_period: String,
    pub qtree_quota_resize_period: String,
}

impl DriverConfig {
    /// Parse a driver config from the orchestrator's JSON document.
    pub fn from_json(config_json: &str) -> Result<Self> {
        let config: DriverConfig = serde_json::from_str(config_json)?;
        Ok(config)
    }

    /// Fill unset provisioning options with driver defaults.
    pub fn apply_defaults(&mut self) {
        fill(&mut self.space_reserve, defaults::SPACE_RESERVE);
        fill(&mut self.snapshot_policy, defaults::SNAPSHOT_POLICY);
        fill(&mut self.snapshot_dir, defaults::SNAPSHOT_DIR);
        fill(&mut self.unix_permissions, defaults::UNIX_PERMISSIONS);
        fill(&mut self.export_policy, defaults::EXPORT_POLICY);
        fill(&mut self.security_style, defaults::SECURITY_STYLE);
        fill(&mut self.encryption, defaults::ENCRYPTION);
    }

    /// Reject configs that cannot address the appliance.
    pub fn check(&self) -> Result<()> {
        if self.data_lif.is_empty() {
            return Err(Error::Config("dataLIF must be specified".into()));
        }
        Ok(())
    }
}

fn fill(field: &mut String, default: &str) {
    if field.is_empty() {
        *field = default.to_string();
    }
}
