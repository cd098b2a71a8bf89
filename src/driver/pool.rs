//! Flexvol pool management
//!
//! Each new qtree lands in a Flexvol whose attributes match the request
//! exactly and whose qtree fan-out is below the cap. When no such Flexvol
//! exists, one is minted with fixed bootstrap values; any step failing after
//! creation triggers a best-effort destroy of the partial Flexvol.

use tracing::{debug, warn};

use crate::appliance::{FlexvolAttributes, FlexvolCreateRequest, SizeChange};
use crate::error::Result;

use super::{NasQtreeDriver, MAX_QTREES_PER_FLEXVOL};

// Bootstrap values for new Flexvols; the per-qtree attributes arrive later
// with each qtree, and the size is corrected on every Create.
const FLEXVOL_BOOTSTRAP_SIZE: &str = "1g";
const FLEXVOL_UNIX_PERMISSIONS: &str = "0700";
const FLEXVOL_SECURITY_STYLE: &str = "unix";

impl NasQtreeDriver {
    /// Find a Flexvol to contain a new qtree, or mint one.
    pub(crate) async fn ensure_flexvol_for_qtree(
        &self,
        attrs: &FlexvolAttributes,
    ) -> Result<String> {
        if let Some(flexvol) = self.get_flexvol_for_qtree(attrs).await? {
            return Ok(flexvol);
        }
        self.create_flexvol_for_qtree(attrs).await
    }

    /// Return a managed Flexvol matching `attrs` with room for another
    /// qtree. No match is not an error; multiple matches pick at random.
    pub(crate) async fn get_flexvol_for_qtree(
        &self,
        attrs: &FlexvolAttributes,
    ) -> Result<Option<String>> {
        let candidates = self
            .api
            .volume_list_by_attrs(&self.flexvol_name_prefix, attrs)
            .await?;

        // Weed out the Flexvols already at the fan-out cap
        let mut eligible = Vec::new();
        for name in candidates {
            let count = self.api.qtree_count(&name).await?;
            if count < MAX_QTREES_PER_FLEXVOL {
                eligible.push(name);
            }
        }

        Ok(match eligible.len() {
            0 => None,
            1 => Some(eligible.remove(0)),
            n => Some(eligible.swap_remove(self.entropy.pick(n))),
        })
    }

    /// Create, mount, and quota-prepare a new Flexvol for qtrees. Once this
    /// returns the Flexvol exists, is mounted, and has a default tree quota.
    pub(crate) async fn create_flexvol_for_qtree(
        &self,
        attrs: &FlexvolAttributes,
    ) -> Result<String> {
        let flexvol = format!("{}{}", self.flexvol_name_prefix, self.entropy.random_string(10));

        debug!(
            name = %flexvol,
            aggregate = %attrs.aggregate,
            size = FLEXVOL_BOOTSTRAP_SIZE,
            space_reserve = %attrs.space_reserve,
            snapshot_policy = %attrs.snapshot_policy,
            snapshot_dir = attrs.snapshot_dir,
            export_policy = %self.flexvol_export_policy,
            encryption = ?attrs.encryption,
            "Creating Flexvol for qtrees."
        );

        let request = FlexvolCreateRequest {
            name: flexvol.clone(),
            aggregate: attrs.aggregate.clone(),
            size: FLEXVOL_BOOTSTRAP_SIZE.to_string(),
            space_reserve: attrs.space_reserve.clone(),
            snapshot_policy: attrs.snapshot_policy.clone(),
            unix_permissions: FLEXVOL_UNIX_PERMISSIONS.to_string(),
            export_policy: self.flexvol_export_policy.clone(),
            security_style: FLEXVOL_SECURITY_STYLE.to_string(),
            encrypt: attrs.encryption,
        };
        self.api.volume_create(&request).await?;

        // Disable '.snapshot' as needed
        if !attrs.snapshot_dir {
            if let Err(err) = self
                .api
                .volume_disable_snapshot_directory_access(&flexvol)
                .await
            {
                self.rollback_flexvol(&flexvol).await;
                return Err(err.into());
            }
        }

        // Mount the volume at its own junction
        if let Err(err) = self.api.volume_mount(&flexvol, &format!("/{}", flexvol)).await {
            self.rollback_flexvol(&flexvol).await;
            return Err(err.into());
        }

        // If LS mirrors are present on the SVM root volume, update them so
        // clients can see the new junction
        if let Err(err) = self.api.refresh_load_sharing_mirrors().await {
            warn!(error = %err, "Could not refresh load-sharing mirrors.");
        }

        // Create the default quota rule so we can use quota-resize for new
        // qtrees
        if let Err(err) = self.add_default_quota_for_flexvol(&flexvol).await {
            self.rollback_flexvol(&flexvol).await;
            return Err(err);
        }

        Ok(flexvol)
    }

    /// Best-effort destroy of a partially bootstrapped Flexvol.
    async fn rollback_flexvol(&self, flexvol: &str) {
        if let Err(err) = self.api.volume_destroy(flexvol, true).await {
            warn!(flexvol = %flexvol, error = %err, "Could not destroy partial Flexvol.");
        }
    }

    /// Compute the Flexvol size that accommodates all existing disk-limit
    /// quotas plus a new qtree, scaled by the snapshot reserve.
    pub(crate) async fn optimal_size_for_flexvol(
        &self,
        flexvol: &str,
        new_qtree_size_bytes: u64,
    ) -> Result<u64> {
        let info = self.api.volume_get(flexvol).await?;
        let snap_reserve_multiplier = 1.0 + (info.snapshot_reserve_percent as f64 / 100.0);

        let total_disk_limit_bytes = self.total_hard_disk_limit_quota(flexvol).await?;

        let usable_bytes = (new_qtree_size_bytes + total_disk_limit_bytes) as f64;
        let flexvol_size_bytes = (usable_bytes * snap_reserve_multiplier) as u64;

        debug!(
            flexvol = %flexvol,
            snap_reserve_multiplier,
            total_disk_limit_bytes,
            new_qtree_size_bytes,
            flexvol_size_bytes,
            "Calculated optimal size for Flexvol with new qtree."
        );

        Ok(flexvol_size_bytes)
    }

    /// Resize a Flexvol to fit one more qtree: preferred path is the
    /// absolute optimal size, fallback is relative growth.
    pub(crate) async fn resize_flexvol_for_qtree(
        &self,
        flexvol: &str,
        new_qtree_size_bytes: u64,
    ) -> Result<()> {
        match self.optimal_size_for_flexvol(flexvol, new_qtree_size_bytes).await {
            Ok(optimal_size_bytes) => {
                self.api
                    .set_volume_size(flexvol, SizeChange::Absolute(optimal_size_bytes))
                    .await?;
            }
            Err(err) => {
                warn!(error = %err, "Could not calculate optimal Flexvol size.");

                // Lacking the optimal size, just grow the Flexvol to contain
                // the new qtree
                self.api
                    .set_volume_size(flexvol, SizeChange::GrowBy(new_qtree_size_bytes))
                    .await?;
            }
        }
        Ok(())
    }
}
