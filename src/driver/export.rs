//! Export-policy bootstrap
//!
//! All managed Flexvols share one export policy with a well-known name. If
//! the policy already exists the driver assumes it created it earlier;
//! otherwise it is created and given a baseline rule permitting NFS access,
//! without which clients could not mount any qtree.

use tracing::debug;

use crate::appliance::ExportRule;
use crate::error::{Error, Result};

use super::NasQtreeDriver;

impl NasQtreeDriver {
    /// Idempotently create the shared export policy and make sure it has at
    /// least one rule. Called once during validation.
    pub(crate) async fn ensure_default_export_policy(&self) -> Result<()> {
        match self.api.export_policy_create(&self.flexvol_export_policy).await {
            Ok(()) => {}
            Err(err) if err.is_duplicate_entry() => {
                debug!(
                    export_policy = %self.flexvol_export_policy,
                    "Export policy already exists."
                );
            }
            Err(err) => {
                return Err(Error::Config(format!(
                    "error creating export policy {}: {}",
                    self.flexvol_export_policy, err
                )));
            }
        }

        self.ensure_default_export_policy_rule().await
    }

    /// Guarantee the policy has at least one rule; an existing rule set is
    /// left untouched.
    async fn ensure_default_export_policy_rule(&self) -> Result<()> {
        let rules = self.api.export_rule_list(&self.flexvol_export_policy).await?;

        if rules.is_empty() {
            self.api
                .export_rule_create(&self.flexvol_export_policy, &ExportRule::nfs_default())
                .await?;
        } else {
            debug!(
                export_policy = %self.flexvol_export_policy,
                "Export policy has at least one rule."
            );
        }

        Ok(())
    }
}
