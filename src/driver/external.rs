//! Orchestrator-facing surface
//!
//! Everything the surrounding orchestrator asks of a driver besides
//! provisioning: pool capability offers, volume-name mapping, access-info
//! followup, config persistence and redaction, and external volume
//! enumeration (single and streaming).

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;
use tracing::warn;

use crate::appliance::{ApplianceFeature, FlexvolInfo, QtreeInfo, QuotaEntry};
use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::volume::{
    self, AccessMode, Offer, Protocol, StorageBackend, VolumeConfig, VolumeExternal,
};

use super::NasQtreeDriver;

impl NasQtreeDriver {
    /// Fill in the orchestrator's record of this backend.
    pub fn get_storage_backend_specs(&self, backend: &mut StorageBackend) -> Result<()> {
        backend.name = format!("nasqtreepool_{}", self.config().data_lif);
        backend.pool_attributes = self.get_storage_pool_attributes();
        Ok(())
    }

    /// Capability offers for the pool this backend advertises.
    pub fn get_storage_pool_attributes(&self) -> BTreeMap<&'static str, Offer> {
        BTreeMap::from([
            (
                volume::BACKEND_TYPE,
                Offer::Strings(vec![self.name().to_string()]),
            ),
            (volume::SNAPSHOTS, Offer::Bool(false)),
            (volume::CLONES, Offer::Bool(false)),
            (
                volume::ENCRYPTION,
                Offer::Bool(self.api.supports_feature(ApplianceFeature::VolumeEncryption)),
            ),
            (
                volume::PROVISIONING_TYPE,
                Offer::Strings(vec!["thick".to_string(), "thin".to_string()]),
            ),
        ])
    }

    /// Flatten a volume config plus orchestrator attribute requests into the
    /// option map consumed by `create`.
    pub fn get_volume_opts(
        &self,
        vol_config: &VolumeConfig,
        requests: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut opts = requests.clone();
        if !vol_config.snapshot_policy.is_empty() {
            opts.insert("snapshotPolicy".to_string(), vol_config.snapshot_policy.clone());
        }
        if !vol_config.snapshot_dir.is_empty() {
            opts.insert("snapshotDir".to_string(), vol_config.snapshot_dir.clone());
        }
        if !vol_config.export_policy.is_empty() {
            opts.insert("exportPolicy".to_string(), vol_config.export_policy.clone());
        }
        if !vol_config.unix_permissions.is_empty() {
            opts.insert(
                "unixPermissions".to_string(),
                vol_config.unix_permissions.clone(),
            );
        }
        opts
    }

    /// The qtree name backing a user-visible volume name.
    pub fn get_internal_volume_name(&self, name: &str) -> String {
        format!("{}{}", self.storage_prefix(), name)
    }

    /// Stamp the internal name onto a volume config before creation.
    /// Returns whether a followup call is needed after creation.
    pub fn create_prepare(&self, vol_config: &mut VolumeConfig) -> bool {
        let _trace = self.trace("CreatePrepare");
        vol_config.internal_name = self.get_internal_volume_name(&vol_config.name);
        true
    }

    /// Record the NFS access coordinates for a freshly created volume.
    pub async fn create_followup(&self, vol_config: &mut VolumeConfig) -> Result<()> {
        let _trace = self.trace("CreateFollowup");

        // Determine which Flexvol contains the qtree
        let flexvol = self
            .api
            .qtree_exists(&vol_config.internal_name, &self.flexvol_name_prefix)
            .await?
            .ok_or_else(|| Error::VolumeNotFound {
                name: vol_config.internal_name.clone(),
            })?;

        vol_config.access_info.nfs_server_ip = self.config().data_lif.clone();
        vol_config.access_info.nfs_path =
            format!("/{}/{}", flexvol, vol_config.internal_name);

        Ok(())
    }

    pub fn get_protocol(&self) -> Protocol {
        Protocol::File
    }

    /// The config as persisted by the orchestrator's backend store.
    pub fn store_config(&self) -> DriverConfig {
        self.config().clone()
    }

    /// The config as shown to operators, with credentials redacted.
    pub fn get_external_config(&self) -> serde_json::Value {
        match serde_json::to_value(self.config()) {
            Ok(serde_json::Value::Object(mut fields)) => {
                for key in ["username", "password"] {
                    if fields.contains_key(key) {
                        fields.insert(
                            key.to_string(),
                            serde_json::Value::String("<REDACTED>".to_string()),
                        );
                    }
                }
                serde_json::Value::Object(fields)
            }
            _ => serde_json::Value::Null,
        }
    }

    /// All backend-side info about a single managed volume.
    pub async fn get_volume_external(&self, name: &str) -> Result<VolumeExternal> {
        let qtree = self.api.qtree_get(name, &self.flexvol_name_prefix).await?;
        let volume = self.api.volume_get(&qtree.flexvol).await?;
        let quota = self.api.quota_entry_get(&qtree.path()).await?;

        Ok(self.volume_external(&qtree, &volume, &quota))
    }

    /// Stream an external representation of every managed volume to
    /// `channel`, delivering failures as in-band records. The channel
    /// closes when this method returns.
    pub async fn get_volume_external_wrappers(
        &self,
        channel: mpsc::Sender<Result<VolumeExternal>>,
    ) {
        let _trace = self.trace("GetVolumeExternalWrappers");

        // Get all volumes matching the Flexvol prefix
        let volumes = match self.api.volume_get_all(&self.flexvol_name_prefix).await {
            Ok(volumes) => volumes,
            Err(err) => {
                let _ = channel.send(Err(err.into())).await;
                return;
            }
        };

        // Get all quotas in all Flexvols matching the Flexvol prefix
        let quotas = match self
            .api
            .quota_entry_list(&format!("{}*", self.flexvol_name_prefix))
            .await
        {
            Ok(quotas) => quotas,
            Err(err) => {
                let _ = channel.send(Err(err.into())).await;
                return;
            }
        };

        // Get all qtrees in all Flexvols matching the Flexvol prefix
        let qtrees = match self.api.qtree_get_all(&self.flexvol_name_prefix).await {
            Ok(qtrees) => qtrees,
            Err(err) => {
                let _ = channel.send(Err(err.into())).await;
                return;
            }
        };

        // Index volumes and quotas for correlation with qtrees
        let volume_map: BTreeMap<String, FlexvolInfo> = volumes
            .into_iter()
            .map(|volume| (volume.name.clone(), volume))
            .collect();
        let quota_map: BTreeMap<String, QuotaEntry> = quotas
            .into_iter()
            .map(|quota| (quota.target.clone(), quota))
            .collect();

        for qtree in qtrees {
            // Ignore Flexvol-level qtrees and anything outside the managed
            // namespace (including qtrees renamed for deletion)
            if qtree.name.is_empty() || !qtree.name.starts_with(self.storage_prefix()) {
                continue;
            }

            let Some(volume) = volume_map.get(&qtree.flexvol) else {
                warn!(qtree = %qtree.name, "Flexvol not found for qtree.");
                continue;
            };
            let Some(quota) = quota_map.get(&qtree.path()) else {
                warn!(qtree = %qtree.name, "Quota rule not found for qtree.");
                continue;
            };

            let external = self.volume_external(&qtree, volume, quota);
            if channel.send(Ok(external)).await.is_err() {
                // Receiver went away; nothing left to report to
                return;
            }
        }
    }

    /// Format backend-side volume info as the orchestrator's external
    /// representation.
    fn volume_external(
        &self,
        qtree: &QtreeInfo,
        volume: &FlexvolInfo,
        quota: &QuotaEntry,
    ) -> VolumeExternal {
        let name = qtree
            .name
            .strip_prefix(self.storage_prefix())
            .unwrap_or(&qtree.name)
            .to_string();

        let size_bytes = quota.disk_limit_kb.map(|kb| kb * 1024).unwrap_or(0);

        VolumeExternal {
            config: VolumeConfig {
                name,
                internal_name: qtree.name.clone(),
                size_bytes,
                protocol: Protocol::File,
                snapshot_policy: volume.snapshot_policy.clone(),
                export_policy: qtree.export_policy.clone(),
                snapshot_dir: volume.snapshot_dir_access_enabled.to_string(),
                unix_permissions: qtree.unix_permissions.clone(),
                access_mode: AccessMode::ReadWriteMany,
                access_info: Default::default(),
            },
            pool: volume.aggregate.clone(),
        }
    }
}
