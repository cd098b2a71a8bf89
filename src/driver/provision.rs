//! Volume provisioning operations
//!
//! Create and Destroy hold the provisioning mutex for their full duration so
//! a Flexvol selected for a new qtree can't be pruned out from under it and
//! a renamed-for-deletion qtree can't be reaped mid-protocol. Validation
//! failures surface precise messages; appliance failures are logged and
//! surfaced as generic category errors.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use crate::appliance::FlexvolAttributes;
use crate::config::MINIMUM_VOLUME_SIZE_BYTES;
use crate::error::{Error, Result};
use crate::naming::{self, MAX_QTREE_NAME_LENGTH};
use crate::volume::Snapshot;

use super::NasQtreeDriver;

/// Option lookup with a config-default fallback.
fn opt_or<'a>(opts: &'a HashMap<String, String>, key: &str, fallback: &'a str) -> &'a str {
    opts.get(key).map(String::as_str).unwrap_or(fallback)
}

impl NasQtreeDriver {
    /// Create a qtree-backed volume with the specified options.
    pub async fn create(
        &self,
        name: &str,
        size_bytes: u64,
        opts: &HashMap<String, String>,
    ) -> Result<()> {
        let _trace = self.trace("Create");

        // Ensure any Flexvol we create won't be pruned before we place a
        // qtree on it
        let mut resize_set = self.provisioning.lock().await;

        // Ensure volume doesn't already exist
        match self.api.qtree_exists(name, &self.flexvol_name_prefix).await {
            Ok(Some(flexvol)) => {
                debug!(qtree = name, flexvol = %flexvol, "Qtree already exists.");
                return Err(Error::VolumeExists { name: name.into() });
            }
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "Error checking for existing volume.");
                return Err(Error::CreateFailed);
            }
        }

        if size_bytes < MINIMUM_VOLUME_SIZE_BYTES {
            return Err(Error::VolumeSizeTooSmall {
                requested: size_bytes,
                minimum: MINIMUM_VOLUME_SIZE_BYTES,
            });
        }

        // Ensure qtree name isn't too long
        if name.len() > MAX_QTREE_NAME_LENGTH {
            return Err(Error::VolumeNameTooLong {
                name: name.into(),
                limit: MAX_QTREE_NAME_LENGTH,
            });
        }

        // Get Flexvol options with default fallback values
        let config = self.config();
        let aggregate = opt_or(opts, "aggregate", &config.aggregate);
        let space_reserve = opt_or(opts, "spaceReserve", &config.space_reserve);
        let snapshot_policy = opt_or(opts, "snapshotPolicy", &config.snapshot_policy);
        let snapshot_dir = opt_or(opts, "snapshotDir", &config.snapshot_dir);
        let encryption = opt_or(opts, "encryption", &config.encryption);

        let enable_snapshot_dir: bool =
            snapshot_dir.parse().map_err(|_| Error::InvalidBoolean {
                option: "snapshotDir".into(),
                value: snapshot_dir.into(),
            })?;

        let encrypt = self.validate_encryption_attribute(encryption)?;

        // Make sure we have a Flexvol for the new qtree
        let attrs = FlexvolAttributes {
            aggregate: aggregate.to_string(),
            space_reserve: space_reserve.to_string(),
            snapshot_policy: snapshot_policy.to_string(),
            snapshot_dir: enable_snapshot_dir,
            encryption: encrypt,
        };
        let flexvol = match self.ensure_flexvol_for_qtree(&attrs).await {
            Ok(flexvol) => flexvol,
            Err(err) => {
                error!(error = %err, "Flexvol location/creation failed.");
                return Err(Error::CreateFailed);
            }
        };

        // Grow or shrink the Flexvol as needed
        if let Err(err) = self.resize_flexvol_for_qtree(&flexvol, size_bytes).await {
            error!(error = %err, "Flexvol resize failed.");
            return Err(Error::CreateFailed);
        }

        // Get qtree options with default fallback values
        let unix_permissions = opt_or(opts, "unixPermissions", &config.unix_permissions);
        let export_policy = opt_or(opts, "exportPolicy", &config.export_policy);
        let security_style = opt_or(opts, "securityStyle", &config.security_style);

        // Create the qtree
        if let Err(err) = self
            .api
            .qtree_create(name, &flexvol, unix_permissions, export_policy, security_style)
            .await
        {
            error!(error = %err, "Qtree creation failed.");
            return Err(Error::CreateFailed);
        }

        // Add the quota
        if let Err(err) = self
            .add_quota_for_qtree(name, &flexvol, size_bytes, &mut resize_set)
            .await
        {
            error!(error = %err, "Qtree quota definition failed.");
            return Err(Error::CreateFailed);
        }

        Ok(())
    }

    /// Qtrees cannot be cloned.
    pub async fn create_clone(
        &self,
        _name: &str,
        _source: &str,
        _snapshot: &str,
        _opts: &HashMap<String, String>,
    ) -> Result<()> {
        let _trace = self.trace("CreateClone");
        Err(Error::CloneNotSupported)
    }

    /// Destroy the volume: rename the qtree out of the managed namespace,
    /// then ask the appliance to delete it in the background.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        let _trace = self.trace("Destroy");

        // Ensure the deleted-qtree reaping job doesn't interfere with this
        // workflow
        let _resize_set = self.provisioning.lock().await;

        let flexvol = match self.api.qtree_exists(name, &self.flexvol_name_prefix).await {
            Ok(Some(flexvol)) => flexvol,
            Ok(None) => {
                warn!(qtree = name, "Qtree not found.");
                return Ok(());
            }
            Err(err) => {
                error!(error = %err, "Error checking for existing qtree.");
                return Err(Error::DeleteFailed);
            }
        };

        // Rename the qtree so it doesn't show up in lists while the
        // appliance deletes it in the background
        let path = format!("/vol/{}/{}", flexvol, name);
        let deleted_name = naming::deleted_qtree_name(name, self.entropy.as_ref());
        let deleted_path = format!("/vol/{}/{}", flexvol, deleted_name);

        if let Err(err) = self.api.qtree_rename(&path, &deleted_path).await {
            error!(error = %err, "Qtree rename failed.");
            return Err(Error::DeleteFailed);
        }

        // Destroy the qtree in the background. If this fails, try to restore
        // the original qtree name.
        if let Err(err) = self.api.qtree_destroy_async(&deleted_path, true).await {
            error!(error = %err, "Qtree async delete failed.");
            if let Err(err) = self.api.qtree_rename(&deleted_path, &path).await {
                warn!(qtree = name, error = %err, "Could not restore qtree name.");
            }
            return Err(Error::DeleteFailed);
        }

        Ok(())
    }

    /// Mount the volume on the host at `mountpoint`.
    pub async fn attach(
        &self,
        name: &str,
        mountpoint: &str,
        opts: &HashMap<String, String>,
    ) -> Result<()> {
        let _trace = self.trace("Attach");

        // Find the containing Flexvol so we can build the export location
        let flexvol = match self.api.qtree_exists(name, &self.flexvol_name_prefix).await {
            Ok(Some(flexvol)) => flexvol,
            Ok(None) => {
                debug!(qtree = name, "Qtree not found.");
                return Err(Error::VolumeNotFound { name: name.into() });
            }
            Err(err) => {
                error!(error = %err, "Error checking for existing qtree.");
                return Err(Error::MountFailed);
            }
        };

        let export_path = format!("{}:/{}/{}", self.config().data_lif, flexvol, name);
        self.mounter.mount(&export_path, mountpoint, opts).await
    }

    /// Unmount the volume. Proceeds even if the qtree has already vanished.
    pub async fn detach(&self, name: &str, mountpoint: &str) -> Result<()> {
        let _trace = self.trace("Detach");

        match self.api.qtree_exists(name, &self.flexvol_name_prefix).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(qtree = name, "Qtree not found, attempting unmount anyway."),
            Err(err) => warn!(error = %err, "Error checking for existing qtree."),
        }

        self.mounter.unmount(mountpoint).await
    }

    /// Qtrees can't have snapshots, so the list is always empty.
    pub async fn snapshot_list(&self, _name: &str) -> Result<Vec<Snapshot>> {
        let _trace = self.trace("SnapshotList");
        Ok(Vec::new())
    }

    /// User-visible names of all volumes this driver manages.
    pub async fn list(&self) -> Result<Vec<String>> {
        let _trace = self.trace("List");

        let prefix = self.storage_prefix().to_string();
        let qtrees = match self.api.qtree_list(&prefix, &self.flexvol_name_prefix).await {
            Ok(qtrees) => qtrees,
            Err(err) => {
                error!(error = %err, "Qtree list failed.");
                return Err(Error::ListFailed);
            }
        };

        Ok(qtrees
            .into_iter()
            .map(|qtree| qtree.name[prefix.len()..].to_string())
            .collect())
    }

    /// Test for the existence of a volume.
    pub async fn get(&self, name: &str) -> Result<()> {
        let _trace = self.trace("Get");

        match self.api.qtree_exists(name, &self.flexvol_name_prefix).await {
            Ok(Some(flexvol)) => {
                debug!(qtree = name, flexvol = %flexvol, "Qtree found.");
                Ok(())
            }
            Ok(None) => {
                debug!(qtree = name, "Qtree not found.");
                Err(Error::VolumeNotFound { name: name.into() })
            }
            Err(err) => {
                error!(error = %err, "Error checking for existing qtree.");
                Err(Error::VolumeNotFound { name: name.into() })
            }
        }
    }
}
