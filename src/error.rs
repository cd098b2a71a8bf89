//! Error types for the NAS qtree driver
//!
//! Validation failures carry precise messages for the caller; appliance RPC
//! failures are logged with context and surfaced upstream as generic
//! category errors so backend idioms don't leak out of the driver.

use thiserror::Error;

use crate::appliance::ApplianceError;

/// Unified error type for the driver
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("volume {name} already exists")]
    VolumeExists { name: String },

    #[error(
        "requested volume size ({requested} bytes) is too small; \
         the minimum volume size is {minimum} bytes"
    )]
    VolumeSizeTooSmall { requested: u64, minimum: u64 },

    #[error("volume {name} name exceeds the limit of {limit} characters")]
    VolumeNameTooLong { name: String, limit: usize },

    #[error("invalid boolean value for {option}: {value}")]
    InvalidBoolean { option: String, value: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("configuration error: {0}")]
    Config(String),

    #[error("error parsing configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    // =========================================================================
    // Generic Operation Categories
    // =========================================================================
    #[error("volume creation failed")]
    CreateFailed,

    #[error("volume deletion failed")]
    DeleteFailed,

    #[error("volume mount failed")]
    MountFailed,

    #[error("volume unmount failed")]
    UnmountFailed,

    #[error("volume list failed")]
    ListFailed,

    #[error("volume {name} not found")]
    VolumeNotFound { name: String },

    // =========================================================================
    // Quota Errors
    // =========================================================================
    #[error("quotas are corrupt on Flexvol {flexvol}")]
    QuotaCorrupt { flexvol: String },

    // =========================================================================
    // Appliance Errors
    // =========================================================================
    #[error(transparent)]
    Appliance(#[from] ApplianceError),

    // =========================================================================
    // Unsupported Operations
    // =========================================================================
    #[error("cloning qtree-backed volumes is not supported")]
    CloneNotSupported,
}

impl Error {
    /// Check if this error reports a missing volume
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::VolumeNotFound { .. })
    }

    /// Check if this error rejects the caller's input without touching state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::VolumeExists { .. }
                | Error::VolumeSizeTooSmall { .. }
                | Error::VolumeNameTooLong { .. }
                | Error::InvalidBoolean { .. }
        )
    }
}

/// Result type alias for the driver
pub type Result<T> = std::result::Result<T, Error>;
