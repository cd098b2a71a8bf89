//! Background housekeeping
//!
//! Two periodic sweepers keep the pool tidy: pruning destroys managed
//! Flexvols left with no qtrees, and the resize sweep materializes pending
//! quota entries. Reaping finishes deletions that were interrupted between
//! the rename and the async destroy. Each sweep also runs once
//! synchronously at startup, and once more during Terminate after the
//! tickers have stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::naming::DELETED_QTREE_NAME_PREFIX;

use super::{
    NasQtreeDriver, DEFAULT_PRUNE_FLEXVOLS_PERIOD_SECS, DEFAULT_RESIZE_QUOTAS_PERIOD_SECS,
};

pub(crate) struct HousekeepingTask {
    pub name: &'static str,
    pub handle: JoinHandle<()>,
}

/// Parse a configured sweep period, falling back to the default on empty,
/// unparsable, or zero values.
fn parse_period_secs(value: &str, default_secs: u64, task: &str) -> u64 {
    if value.is_empty() {
        return default_secs;
    }
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => secs,
        Ok(_) => {
            warn!(task, interval = value, "Invalid zero interval.");
            default_secs
        }
        Err(err) => {
            warn!(task, interval = value, error = %err, "Invalid interval.");
            default_secs
        }
    }
}

impl NasQtreeDriver {
    /// Run each sweep once, then start the two periodic tickers.
    pub(crate) async fn start_housekeeping_tasks(self: &Arc<Self>) {
        let prune_period_secs = parse_period_secs(
            &self.config().qtree_prune_flexvols_period,
            DEFAULT_PRUNE_FLEXVOLS_PERIOD_SECS,
            "prune",
        );
        debug!(interval_secs = prune_period_secs, "Configured Flexvol pruning period.");

        let resize_period_secs = parse_period_secs(
            &self.config().qtree_quota_resize_period,
            DEFAULT_RESIZE_QUOTAS_PERIOD_SECS,
            "resize",
        );
        debug!(interval_secs = resize_period_secs, "Configured quota resize period.");

        // Keep the system devoid of Flexvols with no qtrees
        self.prune_unused_flexvols().await;
        self.reap_deleted_qtrees().await;

        let mut tasks = Vec::new();

        let driver = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tasks.push(HousekeepingTask {
            name: "prune",
            handle: tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(prune_period_secs));
                // The first tick completes immediately; the startup pass
                // already ran
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            driver.prune_unused_flexvols().await;
                            driver.reap_deleted_qtrees().await;
                        }
                    }
                }
            }),
        });

        // Keep the quotas current
        self.resize_quotas().await;

        let driver = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tasks.push(HousekeepingTask {
            name: "resize",
            handle: tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(resize_period_secs));
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            driver.resize_quotas().await;
                        }
                    }
                }
            }),
        });

        *self.housekeeping.lock().unwrap() = tasks;
    }

    /// Stop both tickers and wait for them to exit.
    pub(crate) async fn stop_housekeeping_tasks(&self) {
        let tasks: Vec<HousekeepingTask> = {
            let mut housekeeping = self.housekeeping.lock().unwrap();
            housekeeping.drain(..).collect()
        };
        if tasks.is_empty() {
            return;
        }

        let _ = self.shutdown_tx.send(());
        for task in tasks {
            if task.handle.await.is_err() {
                warn!(task = task.name, "Housekeeping task panicked.");
            } else {
                debug!(task = task.name, "Stopped housekeeping task.");
            }
        }
    }

    /// Destroy every managed Flexvol that no longer holds any qtree.
    pub(crate) async fn prune_unused_flexvols(&self) {
        // Ensure we don't prune any Flexvol that is involved in a qtree
        // provisioning workflow
        let _resize_set = self.provisioning.lock().await;

        debug!("Housekeeping, checking for managed Flexvols with no qtrees.");

        let flexvols = match self.api.volume_list(&self.flexvol_name_prefix).await {
            Ok(flexvols) => flexvols,
            Err(err) => {
                error!(error = %err, "Error listing Flexvols.");
                return;
            }
        };

        for flexvol in flexvols {
            match self.api.qtree_count(&flexvol).await {
                Ok(0) => {
                    debug!(flexvol = %flexvol, "Housekeeping, deleting managed Flexvol with no qtrees.");
                    if let Err(err) = self.api.volume_destroy(&flexvol, true).await {
                        warn!(flexvol = %flexvol, error = %err, "Could not delete Flexvol.");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(flexvol = %flexvol, error = %err, "Error counting qtrees.");
                }
            }
        }
    }

    /// Re-issue the async destroy for any qtree still carrying the deleted
    /// prefix. Only needed when a rename succeeded but the destroy call
    /// failed or never happened due to a process interruption.
    pub(crate) async fn reap_deleted_qtrees(&self) {
        // Ensure we don't reap any qtree that is involved in a qtree delete
        // workflow
        let _resize_set = self.provisioning.lock().await;

        debug!("Housekeeping, checking for deleted qtrees.");

        let prefix = format!("{}{}", DELETED_QTREE_NAME_PREFIX, self.storage_prefix());
        let qtrees = match self.api.qtree_list(&prefix, &self.flexvol_name_prefix).await {
            Ok(qtrees) => qtrees,
            Err(err) => {
                error!(error = %err, "Error listing deleted qtrees.");
                return;
            }
        };

        for qtree in qtrees {
            let path = qtree.path();
            debug!(qtree = %path, "Housekeeping, reaping deleted qtree.");
            if let Err(err) = self.api.qtree_destroy_async(&path, true).await {
                warn!(qtree = %path, error = %err, "Could not reap deleted qtree.");
            }
        }
    }
}
