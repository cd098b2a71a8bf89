//! NAS Qtree Driver - Pooled NFS Volume Provisioning
//!
//! A storage driver that multiplexes many small logical volumes onto a
//! managed pool of Flexvols on a clustered NAS appliance. Each logical
//! volume is a qtree (a lightweight sub-directory of a Flexvol) whose size
//! is enforced with a tree quota.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        NasQtreeDriver                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//! │  │ Provisioner │  │ Pool        │  │ Quota Engine         │  │
//! │  │ (Create /   │  │ (select or  │  │ (default + per-qtree │  │
//! │  │  Destroy)   │  │  mint       │  │  entries, off/on     │  │
//! │  │             │  │  Flexvols)  │  │  cycle, resize set)  │  │
//! │  └──────┬──────┘  └──────┬──────┘  └──────────┬───────────┘  │
//! │         └────────────────┴────────────────────┘              │
//! │                          │ provisioning mutex                │
//! │  ┌───────────────────────┴──────────────────────────────┐    │
//! │  │ Housekeeper (prune empty Flexvols, reap deleted      │    │
//! │  │ qtrees, resize pending quotas)                       │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! ├──────────────────────────────────────────────────────────────┤
//! │          ApplianceClient (RPC port)   Mounter (host port)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`driver`]: the driver itself and its component operations
//! - [`appliance`]: the appliance RPC port and its wire-value types
//! - [`host`]: the host mount/unmount port
//! - [`config`]: driver configuration
//! - [`naming`]: managed-artifact naming rules
//! - [`volume`]: orchestrator-facing volume types
//! - [`error`]: error types and handling

pub mod appliance;
pub mod config;
pub mod driver;
pub mod error;
pub mod host;
pub mod naming;
pub mod volume;

// Re-export commonly used types
pub use appliance::{
    ApiErrorCode, ApplianceClient, ApplianceClientRef, ApplianceError, ApplianceFeature,
    ApplianceResult, ExportRule, FlexvolAttributes, FlexvolCreateRequest, FlexvolInfo, QtreeInfo,
    QuotaEntry, QuotaStatus, SizeChange,
};

pub use config::{CommonConfig, DriverConfig, MINIMUM_VOLUME_SIZE_BYTES};

pub use driver::{NasQtreeDriver, Telemetry, DRIVER_NAME};

pub use error::{Error, Result};

pub use host::{Mounter, MounterRef};

pub use naming::{DriverContext, Entropy, EntropyRef, MAX_QTREE_NAME_LENGTH};

pub use volume::{
    AccessMode, Offer, Protocol, Snapshot, StorageBackend, VolumeAccessInfo, VolumeConfig,
    VolumeExternal,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
