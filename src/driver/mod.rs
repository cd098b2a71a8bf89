//! The qtree-pooled NAS storage driver
//!
//! One driver instance owns a pool of Flexvols on the appliance (recognized
//! by a well-known name prefix) and provisions each logical volume as a
//! qtree inside one of them, with a tree quota enforcing its size. A single
//! provisioning mutex serializes Create, Destroy, and the housekeeping
//! sweeps; the guarded value is the Quota Resize Set itself.

mod export;
mod external;
mod housekeeping;
mod pool;
mod provision;
mod quota;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::appliance::{ApplianceClientRef, ApplianceFeature};
use crate::config::{CommonConfig, DriverConfig};
use crate::error::{Error, Result};
use crate::host::MounterRef;
use crate::naming::{self, DriverContext, EntropyRef, OsEntropy};

use housekeeping::HousekeepingTask;

/// Name this driver registers under.
pub const DRIVER_NAME: &str = "nas-qtree-pool";

/// Hard cap on qtrees per managed Flexvol.
pub(crate) const MAX_QTREES_PER_FLEXVOL: usize = 200;

pub(crate) const DEFAULT_PRUNE_FLEXVOLS_PERIOD_SECS: u64 = 600;
pub(crate) const DEFAULT_RESIZE_QUOTAS_PERIOD_SECS: u64 = 60;

// =============================================================================
// Telemetry
// =============================================================================

/// Identity the driver reports through the orchestrator's telemetry channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub plugin: String,
    pub driver_context: String,
    pub version: String,
}

// =============================================================================
// Driver
// =============================================================================

/// NFS storage driver provisioning qtrees out of a managed Flexvol pool.
pub struct NasQtreeDriver {
    context: DriverContext,
    config: DriverConfig,
    storage_prefix: String,
    trace_methods: bool,

    api: ApplianceClientRef,
    mounter: MounterRef,
    entropy: EntropyRef,
    telemetry: Telemetry,

    flexvol_name_prefix: String,
    flexvol_export_policy: String,

    initialized: AtomicBool,
    /// Serializes provisioning and housekeeping; the guarded set holds the
    /// Flexvols with quota-entry additions not yet materialized by a resize.
    provisioning: Mutex<HashSet<String>>,
    quota_poll_interval: Duration,

    shutdown_tx: broadcast::Sender<()>,
    housekeeping: std::sync::Mutex<Vec<HousekeepingTask>>,
}

impl NasQtreeDriver {
    /// Build a driver from the orchestrator's configuration documents and
    /// the injected collaborator ports.
    pub fn new(
        context: DriverContext,
        config_json: &str,
        common_config: &CommonConfig,
        api: ApplianceClientRef,
        mounter: MounterRef,
    ) -> Result<Self> {
        let mut config = DriverConfig::from_json(config_json)?;
        config.apply_defaults();

        let storage_prefix = common_config.storage_prefix.clone().unwrap_or_default();
        let trace_methods = common_config
            .debug_trace_flags
            .get("method")
            .copied()
            .unwrap_or(false);

        let flexvol_name_prefix = naming::flexvol_name_prefix(context, &storage_prefix);
        let flexvol_export_policy = naming::flexvol_export_policy(context);

        debug!(
            flexvol_name_prefix = %flexvol_name_prefix,
            flexvol_export_policy = %flexvol_export_policy,
            "Qtree driver settings."
        );

        let telemetry = Telemetry {
            plugin: DRIVER_NAME.to_string(),
            driver_context: context.to_string(),
            version: crate::VERSION.to_string(),
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            context,
            config,
            storage_prefix,
            trace_methods,
            api,
            mounter,
            entropy: Arc::new(OsEntropy),
            telemetry,
            flexvol_name_prefix,
            flexvol_export_policy,
            initialized: AtomicBool::new(false),
            provisioning: Mutex::new(HashSet::new()),
            quota_poll_interval: Duration::from_secs(1),
            shutdown_tx,
            housekeeping: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Replace the entropy source. Production code keeps the OS default;
    /// tests inject a deterministic sequence.
    pub fn with_entropy(mut self, entropy: EntropyRef) -> Self {
        self.entropy = entropy;
        self
    }

    /// Adjust the quota enable/disable poll interval.
    pub(crate) fn with_quota_poll_interval(mut self, interval: Duration) -> Self {
        self.quota_poll_interval = interval;
        self
    }

    pub fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    pub fn context(&self) -> DriverContext {
        self.context
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn flexvol_name_prefix(&self) -> &str {
        &self.flexvol_name_prefix
    }

    pub(crate) fn storage_prefix(&self) -> &str {
        &self.storage_prefix
    }

    pub(crate) fn config(&self) -> &DriverConfig {
        &self.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bring the driver into service: validate against the appliance, repair
    /// the default-quota invariant on managed Flexvols, requeue pending
    /// quota resizes, and start the housekeeping tasks.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let _trace = self.trace("Initialize");

        self.validate().await?;

        self.ensure_default_quotas().await?;

        // Ensure all quotas are in force after a driver restart
        self.queue_all_flexvols_for_quota_resize().await;

        self.start_housekeeping_tasks().await;

        self.initialized.store(true, Ordering::SeqCst);
        info!(driver = DRIVER_NAME, "Driver initialized.");
        Ok(())
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Take the driver out of service: stop the housekeeping tasks, then run
    /// each sweep one last time.
    pub async fn terminate(&self) {
        let _trace = self.trace("Terminate");

        self.stop_housekeeping_tasks().await;

        self.prune_unused_flexvols().await;
        self.reap_deleted_qtrees().await;
        self.resize_quotas().await;

        self.initialized.store(false, Ordering::SeqCst);
    }

    /// Validate the driver configuration and execution environment.
    async fn validate(&self) -> Result<()> {
        let _trace = self.trace("validate");

        self.config.check()?;

        // Make sure we have an export policy for all the Flexvols we create
        self.ensure_default_export_policy()
            .await
            .map_err(|err| Error::Config(format!("error configuring export policy: {}", err)))?;

        Ok(())
    }

    /// Install the default tree-quota entry on any managed Flexvol missing
    /// one, so per-qtree entries can be added with a cheap resize later.
    async fn ensure_default_quotas(&self) -> Result<()> {
        let flexvols = self.api.volume_list(&self.flexvol_name_prefix).await?;

        for flexvol in flexvols {
            let entries = self.api.quota_entry_list(&flexvol).await?;
            if entries.iter().any(|entry| entry.target.is_empty()) {
                continue;
            }
            debug!(flexvol = %flexvol, "Managed Flexvol is missing its default quota entry.");
            self.add_default_quota_for_flexvol(&flexvol).await?;
        }

        Ok(())
    }

    /// Map a tri-state encryption option to its typed form, rejecting
    /// requests the appliance cannot honor.
    pub(crate) fn validate_encryption_attribute(&self, value: &str) -> Result<Option<bool>> {
        if value.is_empty() {
            return Ok(None);
        }
        let enable: bool = value.parse().map_err(|_| Error::InvalidBoolean {
            option: "encryption".into(),
            value: value.into(),
        })?;
        if enable && !self.api.supports_feature(ApplianceFeature::VolumeEncryption) {
            return Err(Error::Config(
                "encryption is not supported by this appliance".into(),
            ));
        }
        Ok(Some(enable))
    }

    pub(crate) fn trace(&self, method: &'static str) -> MethodTrace {
        MethodTrace::enter(self.trace_methods, method)
    }
}

// =============================================================================
// Method Tracing
// =============================================================================

/// Entry/exit trace guard for contract methods, active when the config sets
/// `debugTraceFlags["method"]`. Logs the exit on drop so early returns are
/// still paired.
pub(crate) struct MethodTrace {
    enabled: bool,
    method: &'static str,
}

impl MethodTrace {
    fn enter(enabled: bool, method: &'static str) -> Self {
        if enabled {
            debug!(method, driver = DRIVER_NAME, ">>>> {}", method);
        }
        Self { enabled, method }
    }
}

impl Drop for MethodTrace {
    fn drop(&mut self) {
        if self.enabled {
            debug!(method = self.method, driver = DRIVER_NAME, "<<<< {}", self.method);
        }
    }
}

// =============================================================================
// Test Harness
// =============================================================================
