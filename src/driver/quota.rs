//! Tree-quota lifecycle
//!
//! Every managed Flexvol carries a default tree-quota entry so that
//! per-qtree entries can be materialized later with a cheap quota resize
//! instead of a full reinitialization. Enable/disable drive the appliance
//! to the target state with a polling loop; a `corrupt` status is fatal for
//! the operation in flight and never auto-repaired.

use std::collections::HashSet;

use tracing::{debug, error};

use crate::appliance::{QuotaEntry, QuotaStatus};
use crate::error::{Error, Result};

use super::NasQtreeDriver;

impl NasQtreeDriver {
    /// Add the default quota rule to a Flexvol and cycle quotas off then on
    /// so the appliance materializes it.
    pub(crate) async fn add_default_quota_for_flexvol(&self, flexvol: &str) -> Result<()> {
        self.api
            .quota_set_entry(&QuotaEntry::default_for(flexvol))
            .await?;

        self.disable_quotas(flexvol, true).await?;
        self.enable_quotas(flexvol, true).await?;

        Ok(())
    }

    /// Add a tree quota with a hard disk limit for one qtree and flag its
    /// Flexvol for the next resize sweep. The entry takes effect only after
    /// a successful resize.
    pub(crate) async fn add_quota_for_qtree(
        &self,
        qtree: &str,
        flexvol: &str,
        size_bytes: u64,
        resize_set: &mut HashSet<String>,
    ) -> Result<()> {
        self.api
            .quota_set_entry(&QuotaEntry::tree_limit(flexvol, qtree, size_bytes))
            .await?;

        // Mark this Flexvol as needing a quota resize
        resize_set.insert(flexvol.to_string());

        Ok(())
    }

    /// Disable quotas on a Flexvol, optionally waiting until they are off.
    pub(crate) async fn disable_quotas(&self, flexvol: &str, wait: bool) -> Result<()> {
        let mut status = self.quota_status_checked(flexvol).await?;

        if status != QuotaStatus::Off {
            self.api.quota_off(flexvol).await?;
        }

        if wait {
            while status != QuotaStatus::Off {
                tokio::time::sleep(self.quota_poll_interval).await;
                status = self.quota_status_checked(flexvol).await?;
            }
        }

        Ok(())
    }

    /// Enable quotas on a Flexvol, optionally waiting until they are on.
    pub(crate) async fn enable_quotas(&self, flexvol: &str, wait: bool) -> Result<()> {
        let mut status = self.quota_status_checked(flexvol).await?;

        if status == QuotaStatus::Off {
            self.api.quota_on(flexvol).await?;
        }

        if wait {
            while status != QuotaStatus::On {
                tokio::time::sleep(self.quota_poll_interval).await;
                status = self.quota_status_checked(flexvol).await?;
            }
        }

        Ok(())
    }

    /// Read a Flexvol's quota status, treating `corrupt` as fatal.
    async fn quota_status_checked(&self, flexvol: &str) -> Result<QuotaStatus> {
        let status = self.api.quota_status(flexvol).await?;
        if status == QuotaStatus::Corrupt {
            return Err(Error::QuotaCorrupt {
                flexvol: flexvol.to_string(),
            });
        }
        Ok(status)
    }

    /// Flag every managed Flexvol for a quota resize. Called once at
    /// startup so resizes pending at the last shutdown still complete.
    pub(crate) async fn queue_all_flexvols_for_quota_resize(&self) {
        match self.api.volume_list(&self.flexvol_name_prefix).await {
            Ok(flexvols) => {
                let mut resize_set = self.provisioning.lock().await;
                resize_set.extend(flexvols);
            }
            Err(err) => error!(error = %err, "Error listing Flexvols."),
        }
    }

    /// Start a quota resize on every flagged Flexvol. Successful starts and
    /// vanished volumes leave the set; anything else is retried next sweep.
    pub(crate) async fn resize_quotas(&self) {
        // Ensure we don't forget any Flexvol that is involved in a qtree
        // provisioning workflow
        let mut resize_set = self.provisioning.lock().await;

        debug!("Housekeeping, resizing quotas.");

        let pending: Vec<String> = resize_set.iter().cloned().collect();
        for flexvol in pending {
            match self.api.quota_resize(&flexvol).await {
                Ok(()) => {
                    debug!(flexvol = %flexvol, "Started quota resize.");
                    resize_set.remove(&flexvol);
                }
                Err(err) if err.is_volume_missing() => {
                    // Volume gone, so no need to try again
                    debug!(flexvol = %flexvol, "Volume does not exist.");
                    resize_set.remove(&flexvol);
                }
                Err(err) => {
                    debug!(flexvol = %flexvol, error = %err, "Error resizing quotas.");
                }
            }
        }
    }

    /// Sum of all disk-limit quota rules on a Flexvol, in bytes.
    pub(crate) async fn total_hard_disk_limit_quota(&self, flexvol: &str) -> Result<u64> {
        let entries = self.api.quota_entry_list(flexvol).await?;

        let total_disk_limit_kb: u64 = entries
            .iter()
            .filter_map(|entry| entry.disk_limit_kb)
            .sum();

        Ok(total_disk_limit_kb * 1024)
    }
}
