//! In-memory appliance used by the driver tests
//!
//! Holds the whole appliance state (Flexvols, qtrees, quota entries, export
//! policies) behind an async lock, with knobs for injecting failures and
//! recorders for asserting which destructive calls were issued.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ApiErrorCode, ApplianceClient, ApplianceError, ApplianceFeature, ApplianceResult, ExportRule,
    FlexvolAttributes, FlexvolCreateRequest, FlexvolInfo, QtreeInfo, QuotaEntry, QuotaStatus,
    SizeChange,
};

#[derive(Debug, Clone)]
pub(crate) struct MockFlexvol {
    pub info: FlexvolInfo,
    pub qtrees: BTreeMap<String, QtreeInfo>,
    pub quotas: BTreeMap<String, QuotaEntry>,
    pub quota_status: QuotaStatus,
}

impl MockFlexvol {
    fn new(info: FlexvolInfo) -> Self {
        Self {
            info,
            qtrees: BTreeMap::new(),
            quotas: BTreeMap::new(),
            quota_status: QuotaStatus::Off,
        }
    }
}

#[derive(Default)]
struct MockState {
    flexvols: BTreeMap<String, MockFlexvol>,
    export_policies: BTreeMap<String, Vec<ExportRule>>,

    // Failure injection
    fail_volume_mount: Option<ApplianceError>,
    fail_volume_get: Option<ApplianceError>,
    fail_volume_get_all: Option<ApplianceError>,
    fail_qtree_rename: Option<ApplianceError>,
    fail_qtree_destroy_async: Option<ApplianceError>,
    fail_quota_set_entry: Option<ApplianceError>,
    fail_quota_resize: Option<ApplianceError>,
    /// Accept destroy-async requests without removing the qtree, modeling a
    /// slow background delete on the appliance.
    defer_destroy_async: bool,
    /// Reported snapshot reserve for newly created Flexvols.
    snapshot_reserve_percent: u64,

    // Call recording
    qtree_destroy_async_calls: Vec<String>,
    quota_resize_calls: Vec<String>,
    volume_destroy_calls: Vec<String>,
    mirror_refresh_calls: usize,
}

pub(crate) struct MockAppliance {
    state: RwLock<MockState>,
    supports_encryption: AtomicBool,
}

impl MockAppliance {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(MockState::default()),
            supports_encryption: AtomicBool::new(true),
        })
    }

    fn parse_qtree_path(path: &str) -> ApplianceResult<(String, String)> {
        let mut parts = path.trim_start_matches("/vol/").splitn(2, '/');
        match (parts.next(), parts.next()) {
            (Some(flexvol), Some(qtree)) if !flexvol.is_empty() && !qtree.is_empty() => {
                Ok((flexvol.to_string(), qtree.to_string()))
            }
            _ => Err(ApplianceError::api(format!("invalid qtree path: {}", path))),
        }
    }

    fn parse_size(size: &str) -> u64 {
        if let Some(gib) = size.strip_suffix('g') {
            return gib.parse::<u64>().unwrap_or(0) << 30;
        }
        size.parse().unwrap_or(0)
    }

    // --- Test setup ---

    pub async fn add_flexvol(&self, info: FlexvolInfo) {
        let mut state = self.state.write().await;
        let name = info.name.clone();
        state.flexvols.insert(name, MockFlexvol::new(info));
    }

    pub async fn add_qtree(&self, flexvol: &str, qtree: QtreeInfo) {
        let mut state = self.state.write().await;
        let vol = state.flexvols.get_mut(flexvol).expect("flexvol exists");
        vol.qtrees.insert(qtree.name.clone(), qtree);
    }

    pub async fn add_quota_entry(&self, entry: QuotaEntry) {
        let mut state = self.state.write().await;
        let vol = state
            .flexvols
            .get_mut(&entry.flexvol)
            .expect("flexvol exists");
        vol.quotas.insert(entry.target.clone(), entry);
    }

    pub async fn set_quota_status(&self, flexvol: &str, status: QuotaStatus) {
        let mut state = self.state.write().await;
        let vol = state.flexvols.get_mut(flexvol).expect("flexvol exists");
        vol.quota_status = status;
    }

    pub async fn set_snapshot_reserve_percent(&self, percent: u64) {
        self.state.write().await.snapshot_reserve_percent = percent;
    }

    pub fn set_supports_encryption(&self, supported: bool) {
        self.supports_encryption.store(supported, Ordering::SeqCst);
    }

    pub async fn set_fail_volume_mount(&self, err: Option<ApplianceError>) {
        self.state.write().await.fail_volume_mount = err;
    }

    pub async fn set_fail_volume_get(&self, err: Option<ApplianceError>) {
        self.state.write().await.fail_volume_get = err;
    }

    pub async fn set_fail_volume_get_all(&self, err: Option<ApplianceError>) {
        self.state.write().await.fail_volume_get_all = err;
    }

    pub async fn set_fail_qtree_rename(&self, err: Option<ApplianceError>) {
        self.state.write().await.fail_qtree_rename = err;
    }

    pub async fn set_fail_qtree_destroy_async(&self, err: Option<ApplianceError>) {
        self.state.write().await.fail_qtree_destroy_async = err;
    }

    pub async fn set_fail_quota_set_entry(&self, err: Option<ApplianceError>) {
        self.state.write().await.fail_quota_set_entry = err;
    }

    pub async fn set_fail_quota_resize(&self, err: Option<ApplianceError>) {
        self.state.write().await.fail_quota_resize = err;
    }

    pub async fn set_defer_destroy_async(&self, defer: bool) {
        self.state.write().await.defer_destroy_async = defer;
    }

    // --- Test inspection ---

    pub async fn flexvol_names(&self) -> Vec<String> {
        self.state.read().await.flexvols.keys().cloned().collect()
    }

    pub async fn qtree_names(&self, flexvol: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .flexvols
            .get(flexvol)
            .map(|vol| vol.qtrees.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn flexvol_size(&self, flexvol: &str) -> Option<u64> {
        let state = self.state.read().await;
        state.flexvols.get(flexvol).map(|vol| vol.info.size_bytes)
    }

    pub async fn quota_entry(&self, flexvol: &str, target: &str) -> Option<QuotaEntry> {
        let state = self.state.read().await;
        state
            .flexvols
            .get(flexvol)
            .and_then(|vol| vol.quotas.get(target).cloned())
    }

    pub async fn quota_status_of(&self, flexvol: &str) -> Option<QuotaStatus> {
        let state = self.state.read().await;
        state
            .flexvols
            .get(flexvol)
            .map(|vol| vol.quota_status.clone())
    }

    pub async fn export_rules(&self, policy: &str) -> Option<Vec<ExportRule>> {
        self.state.read().await.export_policies.get(policy).cloned()
    }

    pub async fn destroy_async_calls(&self) -> Vec<String> {
        self.state.read().await.qtree_destroy_async_calls.clone()
    }

    pub async fn quota_resize_calls(&self) -> Vec<String> {
        self.state.read().await.quota_resize_calls.clone()
    }

    pub async fn volume_destroy_calls(&self) -> Vec<String> {
        self.state.read().await.volume_destroy_calls.clone()
    }

    pub async fn mirror_refresh_calls(&self) -> usize {
        self.state.read().await.mirror_refresh_calls
    }
}

#[async_trait]
impl ApplianceClient for MockAppliance {
    async fn volume_create(&self, request: &FlexvolCreateRequest) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        if state.flexvols.contains_key(&request.name) {
            return Err(ApplianceError::with_code(
                ApiErrorCode::DuplicateEntry,
                format!("volume {} already exists", request.name),
            ));
        }
        let info = FlexvolInfo {
            name: request.name.clone(),
            aggregate: request.aggregate.clone(),
            space_reserve: request.space_reserve.clone(),
            snapshot_policy: request.snapshot_policy.clone(),
            snapshot_dir_access_enabled: true,
            encryption: request.encrypt,
            snapshot_reserve_percent: state.snapshot_reserve_percent,
            size_bytes: Self::parse_size(&request.size),
        };
        state.flexvols.insert(request.name.clone(), MockFlexvol::new(info));
        Ok(())
    }

    async fn volume_mount(&self, name: &str, _junction_path: &str) -> ApplianceResult<()> {
        let state = self.state.read().await;
        if let Some(err) = &state.fail_volume_mount {
            return Err(err.clone());
        }
        if !state.flexvols.contains_key(name) {
            return Err(ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", name),
            ));
        }
        Ok(())
    }

    async fn volume_destroy(&self, name: &str, _force: bool) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        state.volume_destroy_calls.push(name.to_string());
        if state.flexvols.remove(name).is_none() {
            return Err(ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", name),
            ));
        }
        Ok(())
    }

    async fn volume_disable_snapshot_directory_access(&self, name: &str) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        match state.flexvols.get_mut(name) {
            Some(vol) => {
                vol.info.snapshot_dir_access_enabled = false;
                Ok(())
            }
            None => Err(ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", name),
            )),
        }
    }

    async fn volume_get(&self, name: &str) -> ApplianceResult<FlexvolInfo> {
        let state = self.state.read().await;
        if let Some(err) = &state.fail_volume_get {
            return Err(err.clone());
        }
        state
            .flexvols
            .get(name)
            .map(|vol| vol.info.clone())
            .ok_or_else(|| {
                ApplianceError::with_code(
                    ApiErrorCode::VolumeDoesNotExist,
                    format!("volume {} does not exist", name),
                )
            })
    }

    async fn volume_list(&self, prefix: &str) -> ApplianceResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .flexvols
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn volume_list_by_attrs(
        &self,
        prefix: &str,
        attrs: &FlexvolAttributes,
    ) -> ApplianceResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .flexvols
            .values()
            .filter(|vol| vol.info.name.starts_with(prefix) && attrs.matches(&vol.info))
            .map(|vol| vol.info.name.clone())
            .collect())
    }

    async fn volume_get_all(&self, prefix: &str) -> ApplianceResult<Vec<FlexvolInfo>> {
        let state = self.state.read().await;
        if let Some(err) = &state.fail_volume_get_all {
            return Err(err.clone());
        }
        Ok(state
            .flexvols
            .values()
            .filter(|vol| vol.info.name.starts_with(prefix))
            .map(|vol| vol.info.clone())
            .collect())
    }

    async fn set_volume_size(&self, name: &str, size: SizeChange) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        match state.flexvols.get_mut(name) {
            Some(vol) => {
                vol.info.size_bytes = match size {
                    SizeChange::Absolute(bytes) => bytes,
                    SizeChange::GrowBy(bytes) => vol.info.size_bytes + bytes,
                };
                Ok(())
            }
            None => Err(ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", name),
            )),
        }
    }

    async fn refresh_load_sharing_mirrors(&self) -> ApplianceResult<()> {
        self.state.write().await.mirror_refresh_calls += 1;
        Ok(())
    }

    async fn qtree_create(
        &self,
        name: &str,
        flexvol: &str,
        unix_permissions: &str,
        export_policy: &str,
        security_style: &str,
    ) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        match state.flexvols.get_mut(flexvol) {
            Some(vol) => {
                vol.qtrees.insert(
                    name.to_string(),
                    QtreeInfo {
                        name: name.to_string(),
                        flexvol: flexvol.to_string(),
                        unix_permissions: unix_permissions.to_string(),
                        export_policy: export_policy.to_string(),
                        security_style: security_style.to_string(),
                    },
                );
                Ok(())
            }
            None => Err(ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", flexvol),
            )),
        }
    }

    async fn qtree_rename(&self, path: &str, new_path: &str) -> ApplianceResult<()> {
        let (flexvol, qtree) = Self::parse_qtree_path(path)?;
        let (new_flexvol, new_qtree) = Self::parse_qtree_path(new_path)?;
        if flexvol != new_flexvol {
            return Err(ApplianceError::api("cannot rename across volumes"));
        }

        let mut state = self.state.write().await;
        if let Some(err) = &state.fail_qtree_rename {
            return Err(err.clone());
        }
        let vol = state.flexvols.get_mut(&flexvol).ok_or_else(|| {
            ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", flexvol),
            )
        })?;
        let mut info = vol
            .qtrees
            .remove(&qtree)
            .ok_or_else(|| ApplianceError::api(format!("qtree {} does not exist", qtree)))?;
        info.name = new_qtree.clone();
        vol.qtrees.insert(new_qtree, info);
        Ok(())
    }

    async fn qtree_destroy_async(&self, path: &str, _force: bool) -> ApplianceResult<()> {
        let (flexvol, qtree) = Self::parse_qtree_path(path)?;
        let mut state = self.state.write().await;
        state.qtree_destroy_async_calls.push(path.to_string());
        if let Some(err) = &state.fail_qtree_destroy_async {
            return Err(err.clone());
        }
        if state.defer_destroy_async {
            return Ok(());
        }
        if let Some(vol) = state.flexvols.get_mut(&flexvol) {
            vol.qtrees.remove(&qtree);
            vol.quotas.remove(&format!("/vol/{}/{}", flexvol, qtree));
        }
        Ok(())
    }

    async fn qtree_exists(
        &self,
        name: &str,
        flexvol_prefix: &str,
    ) -> ApplianceResult<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .flexvols
            .values()
            .find(|vol| vol.info.name.starts_with(flexvol_prefix) && vol.qtrees.contains_key(name))
            .map(|vol| vol.info.name.clone()))
    }

    async fn qtree_list(
        &self,
        name_prefix: &str,
        flexvol_prefix: &str,
    ) -> ApplianceResult<Vec<QtreeInfo>> {
        let state = self.state.read().await;
        Ok(state
            .flexvols
            .values()
            .filter(|vol| vol.info.name.starts_with(flexvol_prefix))
            .flat_map(|vol| vol.qtrees.values())
            .filter(|qtree| qtree.name.starts_with(name_prefix))
            .cloned()
            .collect())
    }

    async fn qtree_count(&self, flexvol: &str) -> ApplianceResult<usize> {
        let state = self.state.read().await;
        state
            .flexvols
            .get(flexvol)
            .map(|vol| vol.qtrees.len())
            .ok_or_else(|| {
                ApplianceError::with_code(
                    ApiErrorCode::VolumeDoesNotExist,
                    format!("volume {} does not exist", flexvol),
                )
            })
    }

    async fn qtree_get(&self, name: &str, flexvol_prefix: &str) -> ApplianceResult<QtreeInfo> {
        let state = self.state.read().await;
        state
            .flexvols
            .values()
            .filter(|vol| vol.info.name.starts_with(flexvol_prefix))
            .find_map(|vol| vol.qtrees.get(name).cloned())
            .ok_or_else(|| ApplianceError::api(format!("qtree {} does not exist", name)))
    }

    async fn qtree_get_all(&self, flexvol_prefix: &str) -> ApplianceResult<Vec<QtreeInfo>> {
        self.qtree_list("", flexvol_prefix).await
    }

    async fn quota_on(&self, flexvol: &str) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        match state.flexvols.get_mut(flexvol) {
            Some(vol) => {
                if vol.quota_status != QuotaStatus::Corrupt {
                    vol.quota_status = QuotaStatus::On;
                }
                Ok(())
            }
            None => Err(ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", flexvol),
            )),
        }
    }

    async fn quota_off(&self, flexvol: &str) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        match state.flexvols.get_mut(flexvol) {
            Some(vol) => {
                if vol.quota_status != QuotaStatus::Corrupt {
                    vol.quota_status = QuotaStatus::Off;
                }
                Ok(())
            }
            None => Err(ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", flexvol),
            )),
        }
    }

    async fn quota_resize(&self, flexvol: &str) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        state.quota_resize_calls.push(flexvol.to_string());
        if let Some(err) = &state.fail_quota_resize {
            return Err(err.clone());
        }
        if !state.flexvols.contains_key(flexvol) {
            return Err(ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", flexvol),
            ));
        }
        Ok(())
    }

    async fn quota_status(&self, flexvol: &str) -> ApplianceResult<QuotaStatus> {
        let state = self.state.read().await;
        state
            .flexvols
            .get(flexvol)
            .map(|vol| vol.quota_status.clone())
            .ok_or_else(|| {
                ApplianceError::with_code(
                    ApiErrorCode::VolumeDoesNotExist,
                    format!("volume {} does not exist", flexvol),
                )
            })
    }

    async fn quota_set_entry(&self, entry: &QuotaEntry) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        if let Some(err) = &state.fail_quota_set_entry {
            return Err(err.clone());
        }
        match state.flexvols.get_mut(&entry.flexvol) {
            Some(vol) => {
                vol.quotas.insert(entry.target.clone(), entry.clone());
                Ok(())
            }
            None => Err(ApplianceError::with_code(
                ApiErrorCode::VolumeDoesNotExist,
                format!("volume {} does not exist", entry.flexvol),
            )),
        }
    }

    async fn quota_entry_list(&self, volume_pattern: &str) -> ApplianceResult<Vec<QuotaEntry>> {
        let state = self.state.read().await;
        let entries = match volume_pattern.strip_suffix('*') {
            Some(prefix) => state
                .flexvols
                .values()
                .filter(|vol| vol.info.name.starts_with(prefix))
                .flat_map(|vol| vol.quotas.values().cloned())
                .collect(),
            None => state
                .flexvols
                .get(volume_pattern)
                .map(|vol| vol.quotas.values().cloned().collect())
                .unwrap_or_default(),
        };
        Ok(entries)
    }

    async fn quota_entry_get(&self, target: &str) -> ApplianceResult<QuotaEntry> {
        let state = self.state.read().await;
        state
            .flexvols
            .values()
            .find_map(|vol| vol.quotas.get(target).cloned())
            .ok_or_else(|| ApplianceError::api(format!("no quota entry for {}", target)))
    }

    async fn export_policy_create(&self, policy: &str) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        if state.export_policies.contains_key(policy) {
            return Err(ApplianceError::with_code(
                ApiErrorCode::DuplicateEntry,
                format!("export policy {} already exists", policy),
            ));
        }
        state.export_policies.insert(policy.to_string(), Vec::new());
        Ok(())
    }

    async fn export_rule_list(&self, policy: &str) -> ApplianceResult<Vec<ExportRule>> {
        let state = self.state.read().await;
        state
            .export_policies
            .get(policy)
            .cloned()
            .ok_or_else(|| ApplianceError::api(format!("export policy {} does not exist", policy)))
    }

    async fn export_rule_create(&self, policy: &str, rule: &ExportRule) -> ApplianceResult<()> {
        let mut state = self.state.write().await;
        match state.export_policies.get_mut(policy) {
            Some(rules) => {
                rules.push(rule.clone());
                Ok(())
            }
            None => Err(ApplianceError::api(format!(
                "export policy {} does not exist",
                policy
            ))),
        }
    }

    fn supports_feature(&self, feature: ApplianceFeature) -> bool {
        match feature {
            ApplianceFeature::VolumeEncryption => self.supports_encryption.load(Ordering::SeqCst),
        }
    }
}
