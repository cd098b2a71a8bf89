//! Host mount port
//!
//! Attach and Detach hand the NFS export path to this collaborator; how the
//! host actually mounts it (mount syscall, helper binary, CSI node plugin)
//! is not the driver's concern.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Port for mounting NFS exports on the host.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `export_path` (`<ip>:/<flexvol>/<qtree>`) at `mountpoint`.
    async fn mount(
        &self,
        export_path: &str,
        mountpoint: &str,
        options: &HashMap<String, String>,
    ) -> Result<()>;

    /// Unmount whatever is mounted at `mountpoint`.
    async fn unmount(&self, mountpoint: &str) -> Result<()>;
}

pub type MounterRef = Arc<dyn Mounter>;

/// Mounter that records calls instead of touching the host.
#[cfg(test)]
pub(crate) struct RecordingMounter {
    mounts: std::sync::Mutex<Vec<(String, String)>>,
    unmounts: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingMounter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            mounts: std::sync::Mutex::new(Vec::new()),
            unmounts: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn mounts(&self) -> Vec<(String, String)> {
        self.mounts.lock().unwrap().clone()
    }

    pub(crate) fn unmounts(&self) -> Vec<String> {
        self.unmounts.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Mounter for RecordingMounter {
    async fn mount(
        &self,
        export_path: &str,
        mountpoint: &str,
        _options: &HashMap<String, String>,
    ) -> Result<()> {
        self.mounts
            .lock()
            .unwrap()
            .push((export_path.to_string(), mountpoint.to_string()));
        Ok(())
    }

    async fn unmount(&self, mountpoint: &str) -> Result<()> {
        self.unmounts.lock().unwrap().push(mountpoint.to_string());
        Ok(())
    }
}
