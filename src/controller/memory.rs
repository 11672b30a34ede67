//! Simulated Storage Controller
//!
//! In-memory implementation of [`ControllerApi`] used by tests and by the
//! binary when no real controller is reachable. Models the controller
//! behaviour the driver depends on: LUN size rounding, a LUN resize
//! ceiling, aggregate capacity, mapping ids and the error codes the driver
//! special-cases. Faults can be injected per verb and target.

use crate::controller::api::{
    codes, AggregateSpace, ApiError, ApiResponse, AttemptResult, Feature, FlexvolAttributes,
    LunCreateResult, LunCreateSpec, LunGeometry, LunInfo, LunMapping, SnapshotInfo,
    VolumeCreateSpec,
};
use crate::domain::ports::ControllerApi;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Verbs that change controller state
const MUTATING_VERBS: &[&str] = &[
    "volume_create",
    "volume_set_size",
    "volume_rename",
    "volume_destroy",
    "volume_clone_create",
    "volume_clone_split_start",
    "lun_create",
    "lun_set_attribute",
    "lun_destroy",
    "lun_rename",
    "lun_resize",
    "lun_map",
    "lun_unmap",
    "igroup_create",
    "igroup_add",
    "snapshot_create",
    "snapshot_restore",
    "snapshot_delete",
];

// =============================================================================
// Configuration
// =============================================================================

/// Behaviour knobs of the simulated controller
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Bytes the controller adds to every LUN before rounding
    pub lun_overhead_bytes: u64,
    /// LUN sizes are rounded up to a multiple of this
    pub lun_granularity_bytes: u64,
    /// Volume sizes are rounded up to a multiple of this on resize
    pub volume_granularity_bytes: u64,
    /// LUNs may grow up to this multiple of their created size
    pub max_resize_factor: u64,
    pub iscsi_node_name: String,
    /// iSCSI data LIFs
    pub data_lifs: Vec<String>,
    pub features: HashSet<Feature>,
    pub tiering_policy: String,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            lun_overhead_bytes: 0,
            lun_granularity_bytes: 1,
            volume_granularity_bytes: 1,
            max_resize_factor: 10,
            iscsi_node_name: "iqn.1992-08.com.netapp:sn.simulated".to_string(),
            data_lifs: vec!["10.0.0.10".to_string()],
            features: HashSet::new(),
            tiering_policy: "none".to_string(),
        }
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone)]
struct VolumeState {
    attributes: FlexvolAttributes,
    snapshots: Vec<SnapshotInfo>,
}

#[derive(Debug, Clone)]
struct LunState {
    info: LunInfo,
    attributes: BTreeMap<String, String>,
    mappings: Vec<LunMapping>,
    max_resize_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
struct AggregateState {
    size_bytes: Option<u64>,
    used_bytes: u64,
}

#[derive(Debug, Clone)]
struct Fault {
    verb: String,
    target: Option<String>,
    error: ApiError,
    persistent: bool,
}

#[derive(Debug, Default)]
struct State {
    volumes: BTreeMap<String, VolumeState>,
    luns: BTreeMap<String, LunState>,
    igroups: BTreeMap<String, BTreeSet<String>>,
    aggregates: BTreeMap<String, AggregateState>,
    faults: Vec<Fault>,
    calls: Vec<(String, String)>,
    next_serial: u64,
}

impl State {
    fn adjust_aggregate(&mut self, aggregate: &str, old_size: u64, new_size: u64) {
        if let Some(aggr) = self.aggregates.get_mut(aggregate) {
            aggr.used_bytes = aggr.used_bytes.saturating_sub(old_size) + new_size;
        }
    }

    fn next_serial(&mut self) -> String {
        self.next_serial += 1;
        format!("sim{:08x}", self.next_serial)
    }

    fn next_lun_id(&self, igroup: &str) -> u32 {
        let used: BTreeSet<u32> = self
            .luns
            .values()
            .flat_map(|lun| lun.mappings.iter())
            .filter(|m| m.igroup == igroup)
            .map(|m| m.lun_id)
            .collect();
        (0..).find(|id| !used.contains(id)).unwrap_or(0)
    }
}

fn round_up(value: u64, granularity: u64) -> u64 {
    if granularity <= 1 {
        return value;
    }
    value.div_ceil(granularity) * granularity
}

/// Containing volume of a `/vol/<volume>/<lun>` path
fn volume_of(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/vol/")?;
    let (volume, lun) = rest.split_once('/')?;
    (!volume.is_empty() && !lun.is_empty()).then_some(volume)
}

fn failed<T>(code: &str, reason: impl Into<String>) -> AttemptResult<T> {
    Ok(ApiResponse::failed(code, reason))
}

fn injected<T>(error: ApiError) -> AttemptResult<T> {
    match error {
        ApiError::Transport(_) => Err(error),
        ApiError::Status { code, reason } => Ok(ApiResponse::failed(code, reason)),
        ApiError::EmptyResult => Ok(ApiResponse {
            status: crate::controller::api::ApiStatus::passed(),
            value: None,
        }),
    }
}

// =============================================================================
// Simulated Controller
// =============================================================================

/// In-memory storage controller
pub struct SimulatedController {
    config: SimulatedConfig,
    state: Mutex<State>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl SimulatedController {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Add an aggregate; `size_bytes` of `None` models a controller that
    /// does not report aggregate size
    pub fn with_aggregate(self, name: &str, size_bytes: Option<u64>) -> Self {
        self.add_aggregate(name, size_bytes);
        self
    }

    pub fn add_aggregate(&self, name: &str, size_bytes: Option<u64>) {
        self.state.lock().aggregates.insert(
            name.to_string(),
            AggregateState {
                size_bytes,
                used_bytes: 0,
            },
        );
    }

    /// Override the used space of an aggregate
    pub fn set_aggregate_used(&self, name: &str, used_bytes: u64) {
        if let Some(aggr) = self.state.lock().aggregates.get_mut(name) {
            aggr.used_bytes = used_bytes;
        }
    }

    /// Seed a volume, bypassing validation
    pub fn insert_volume(&self, attributes: FlexvolAttributes) {
        self.state.lock().volumes.insert(
            attributes.name.clone(),
            VolumeState {
                attributes,
                snapshots: Vec::new(),
            },
        );
    }

    /// Seed a LUN, bypassing validation
    pub fn insert_lun(&self, info: LunInfo) {
        let max_resize_bytes = info
            .size_bytes
            .unwrap_or(0)
            .saturating_mul(self.config.max_resize_factor);
        self.state.lock().luns.insert(
            info.path.clone(),
            LunState {
                info,
                attributes: BTreeMap::new(),
                mappings: Vec::new(),
                max_resize_bytes,
            },
        );
    }

    /// Seed an igroup mapping for a LUN, bypassing validation
    pub fn insert_mapping(&self, path: &str, igroup: &str, lun_id: u32) {
        let mut state = self.state.lock();
        state.igroups.entry(igroup.to_string()).or_default();
        if let Some(lun) = state.luns.get_mut(path) {
            lun.mappings.push(LunMapping {
                igroup: igroup.to_string(),
                lun_id,
            });
            lun.info.mapped = Some(true);
        }
    }

    /// Fail the next call of `verb` (on `target`, if given) with `error`
    pub fn fail_next(&self, verb: &str, target: Option<&str>, error: ApiError) {
        self.push_fault(verb, target, error, false);
    }

    /// Fail every call of `verb` (on `target`, if given) with `error`
    pub fn fail_always(&self, verb: &str, target: Option<&str>, error: ApiError) {
        self.push_fault(verb, target, error, true);
    }

    fn push_fault(&self, verb: &str, target: Option<&str>, error: ApiError, persistent: bool) {
        self.state.lock().faults.push(Fault {
            verb: verb.to_string(),
            target: target.map(str::to_string),
            error,
            persistent,
        });
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn volume(&self, name: &str) -> Option<FlexvolAttributes> {
        self.state
            .lock()
            .volumes
            .get(name)
            .map(|v| v.attributes.clone())
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.state.lock().volumes.keys().cloned().collect()
    }

    pub fn lun(&self, path: &str) -> Option<LunInfo> {
        self.state.lock().luns.get(path).map(|l| l.info.clone())
    }

    pub fn lun_attribute(&self, path: &str, name: &str) -> Option<String> {
        self.state
            .lock()
            .luns
            .get(path)
            .and_then(|l| l.attributes.get(name).cloned())
    }

    pub fn lun_mappings(&self, path: &str) -> Vec<LunMapping> {
        self.state
            .lock()
            .luns
            .get(path)
            .map(|l| l.mappings.clone())
            .unwrap_or_default()
    }

    pub fn igroup_initiators(&self, name: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .igroups
            .get(name)
            .map(|i| i.iter().cloned().collect())
    }

    /// Every call received, as (verb, target)
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.lock().calls.clone()
    }

    /// Number of calls received for one verb
    pub fn call_count(&self, verb: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(v, _)| v == verb)
            .count()
    }

    /// Number of state-changing calls received, successful or not
    pub fn mutation_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(v, _)| MUTATING_VERBS.contains(&v.as_str()))
            .count()
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Record a call and return the fault injected for it, if any
    fn begin(&self, verb: &str, target: &str) -> Option<ApiError> {
        let mut state = self.state.lock();
        state.calls.push((verb.to_string(), target.to_string()));
        let index = state.faults.iter().position(|f| {
            f.verb == verb && f.target.as_deref().map(|t| t == target).unwrap_or(true)
        })?;
        let fault = if state.faults[index].persistent {
            state.faults[index].clone()
        } else {
            state.faults.remove(index)
        };
        debug!("Injecting fault into {} on {}: {}", verb, target, fault.error);
        Some(fault.error)
    }

    fn lun_actual_size(&self, requested: u64) -> u64 {
        round_up(
            requested + self.config.lun_overhead_bytes,
            self.config.lun_granularity_bytes,
        )
    }
}

#[async_trait]
impl ControllerApi for SimulatedController {
    async fn volume_exists(&self, name: &str) -> AttemptResult<bool> {
        if let Some(error) = self.begin("volume_exists", name) {
            return injected(error);
        }
        Ok(ApiResponse::ok(self.state.lock().volumes.contains_key(name)))
    }

    async fn volume_get(&self, name: &str) -> AttemptResult<Option<FlexvolAttributes>> {
        if let Some(error) = self.begin("volume_get", name) {
            return injected(error);
        }
        Ok(ApiResponse::ok(self.volume(name)))
    }

    async fn volume_get_all(&self, prefix: &str) -> AttemptResult<Vec<FlexvolAttributes>> {
        if let Some(error) = self.begin("volume_get_all", prefix) {
            return injected(error);
        }
        let state = self.state.lock();
        Ok(ApiResponse::ok(
            state
                .volumes
                .values()
                .filter(|v| v.attributes.name.starts_with(prefix))
                .map(|v| v.attributes.clone())
                .collect(),
        ))
    }

    async fn volume_create(&self, spec: &VolumeCreateSpec) -> AttemptResult<()> {
        if let Some(error) = self.begin("volume_create", &spec.name) {
            return injected(error);
        }
        let mut state = self.state.lock();
        if state.volumes.contains_key(&spec.name) {
            return failed(codes::EAPIERROR, format!("Duplicate volume name {}", spec.name));
        }
        let aggregate = match state.aggregates.get(&spec.aggregate) {
            Some(aggr) => *aggr,
            None => {
                return failed(
                    codes::EOBJECTNOTFOUND,
                    format!("aggregate {} not found", spec.aggregate),
                )
            }
        };
        if let Some(size) = aggregate.size_bytes {
            if aggregate.used_bytes + spec.size_bytes > size {
                return failed(codes::ENOSPC, "insufficient space");
            }
        }

        state.adjust_aggregate(&spec.aggregate, 0, spec.size_bytes);
        state.volumes.insert(
            spec.name.clone(),
            VolumeState {
                attributes: FlexvolAttributes {
                    name: spec.name.clone(),
                    aggregate: spec.aggregate.clone(),
                    volume_type: Some("rw".to_string()),
                    size_bytes: spec.size_bytes,
                    space_reserve: spec.space_reserve.clone(),
                    snapshot_policy: spec.snapshot_policy.clone(),
                    snapshot_reserve_percent: spec.snapshot_reserve,
                    encrypted: spec.encrypt,
                    tiering_policy: spec.tiering_policy.clone(),
                    export_policy: spec.export_policy.clone(),
                    security_style: spec.security_style.clone(),
                    unix_permissions: spec.unix_permissions.clone(),
                    has_id_attributes: true,
                },
                snapshots: Vec::new(),
            },
        );
        Ok(ApiResponse::ok(()))
    }

    async fn volume_size(&self, name: &str) -> AttemptResult<u64> {
        if let Some(error) = self.begin("volume_size", name) {
            return injected(error);
        }
        match self.volume(name) {
            Some(v) => Ok(ApiResponse::ok(v.size_bytes)),
            None => failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", name)),
        }
    }

    async fn volume_set_size(&self, name: &str, size_bytes: u64) -> AttemptResult<()> {
        if let Some(error) = self.begin("volume_set_size", name) {
            return injected(error);
        }
        let new_size = round_up(size_bytes, self.config.volume_granularity_bytes);
        let mut state = self.state.lock();
        let (aggregate, old_size) = match state.volumes.get_mut(name) {
            Some(v) => {
                let old = v.attributes.size_bytes;
                v.attributes.size_bytes = new_size;
                (v.attributes.aggregate.clone(), old)
            }
            None => {
                return failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", name))
            }
        };
        state.adjust_aggregate(&aggregate, old_size, new_size);
        Ok(ApiResponse::ok(()))
    }

    async fn volume_rename(&self, name: &str, new_name: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("volume_rename", name) {
            return injected(error);
        }
        let mut state = self.state.lock();
        if state.volumes.contains_key(new_name) {
            return failed(codes::EAPIERROR, format!("Duplicate volume name {}", new_name));
        }
        let mut volume = match state.volumes.remove(name) {
            Some(v) => v,
            None => {
                return failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", name))
            }
        };
        volume.attributes.name = new_name.to_string();
        for snapshot in &mut volume.snapshots {
            snapshot.volume = new_name.to_string();
        }
        state.volumes.insert(new_name.to_string(), volume);

        let old_prefix = format!("/vol/{}/", name);
        let moved: Vec<String> = state
            .luns
            .keys()
            .filter(|p| p.starts_with(&old_prefix))
            .cloned()
            .collect();
        for path in moved {
            if let Some(mut lun) = state.luns.remove(&path) {
                let new_path = format!("/vol/{}/{}", new_name, &path[old_prefix.len()..]);
                lun.info.path = new_path.clone();
                lun.info.volume = new_name.to_string();
                state.luns.insert(new_path, lun);
            }
        }
        Ok(ApiResponse::ok(()))
    }

    async fn volume_destroy(&self, name: &str, _force: bool) -> AttemptResult<()> {
        if let Some(error) = self.begin("volume_destroy", name) {
            return injected(error);
        }
        let mut state = self.state.lock();
        let volume = match state.volumes.remove(name) {
            Some(v) => v,
            None => {
                return failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", name))
            }
        };
        state.adjust_aggregate(&volume.attributes.aggregate, volume.attributes.size_bytes, 0);
        let prefix = format!("/vol/{}/", name);
        state.luns.retain(|path, _| !path.starts_with(&prefix));
        Ok(ApiResponse::ok(()))
    }

    async fn volume_clone_create(
        &self,
        name: &str,
        source: &str,
        snapshot: &str,
    ) -> AttemptResult<()> {
        if let Some(error) = self.begin("volume_clone_create", name) {
            return injected(error);
        }
        let mut state = self.state.lock();
        if state.volumes.contains_key(name) {
            return failed(codes::EAPIERROR, format!("Duplicate volume name {}", name));
        }
        let parent = match state.volumes.get(source) {
            Some(v) => v.clone(),
            None => {
                return failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", source))
            }
        };
        if !parent.snapshots.iter().any(|s| s.name == snapshot) {
            return failed(codes::EOBJECTNOTFOUND, format!("snapshot {} not found", snapshot));
        }

        let mut attributes = parent.attributes.clone();
        attributes.name = name.to_string();
        state.volumes.insert(
            name.to_string(),
            VolumeState {
                attributes,
                snapshots: Vec::new(),
            },
        );

        let source_prefix = format!("/vol/{}/", source);
        let luns: Vec<LunState> = state
            .luns
            .iter()
            .filter(|(path, _)| path.starts_with(&source_prefix))
            .map(|(_, lun)| lun.clone())
            .collect();
        for mut lun in luns {
            let path = format!("/vol/{}/{}", name, &lun.info.path[source_prefix.len()..]);
            lun.info.path = path.clone();
            lun.info.volume = name.to_string();
            lun.info.mapped = Some(false);
            lun.info.serial = state.next_serial();
            lun.mappings.clear();
            state.luns.insert(path, lun);
        }
        Ok(ApiResponse::ok(()))
    }

    async fn volume_clone_split_start(&self, name: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("volume_clone_split_start", name) {
            return injected(error);
        }
        if !self.state.lock().volumes.contains_key(name) {
            return failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", name));
        }
        Ok(ApiResponse::ok(()))
    }

    async fn lun_create(&self, spec: &LunCreateSpec) -> AttemptResult<LunCreateResult> {
        if let Some(error) = self.begin("lun_create", &spec.path) {
            return injected(error);
        }
        let volume = match volume_of(&spec.path) {
            Some(v) => v.to_string(),
            None => return failed(codes::EAPIERROR, format!("invalid LUN path {}", spec.path)),
        };
        let actual = self.lun_actual_size(spec.size_bytes);
        let mut state = self.state.lock();
        if !state.volumes.contains_key(&volume) {
            return failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", volume));
        }
        if state.luns.contains_key(&spec.path) {
            return failed(codes::EAPIERROR, format!("LUN {} already exists", spec.path));
        }
        let serial = state.next_serial();
        state.luns.insert(
            spec.path.clone(),
            LunState {
                info: LunInfo {
                    path: spec.path.clone(),
                    volume,
                    size_bytes: Some(actual),
                    online: Some(true),
                    mapped: Some(false),
                    os_type: spec.os_type.clone(),
                    serial,
                },
                attributes: BTreeMap::new(),
                mappings: Vec::new(),
                max_resize_bytes: actual.saturating_mul(self.config.max_resize_factor),
            },
        );
        Ok(ApiResponse::ok(LunCreateResult {
            actual_size_bytes: actual,
        }))
    }

    async fn lun_get_all(&self, pattern: &str) -> AttemptResult<Vec<LunInfo>> {
        if let Some(error) = self.begin("lun_get_all", pattern) {
            return injected(error);
        }
        let pattern = match glob::Pattern::new(pattern) {
            Ok(p) => p,
            Err(e) => return failed(codes::EAPIERROR, format!("invalid pattern: {}", e)),
        };
        let state = self.state.lock();
        Ok(ApiResponse::ok(
            state
                .luns
                .values()
                .filter(|l| pattern.matches(&l.info.path))
                .map(|l| l.info.clone())
                .collect(),
        ))
    }

    async fn lun_set_attribute(&self, path: &str, name: &str, value: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("lun_set_attribute", path) {
            return injected(error);
        }
        match self.state.lock().luns.get_mut(path) {
            Some(lun) => {
                lun.attributes.insert(name.to_string(), value.to_string());
                Ok(ApiResponse::ok(()))
            }
            None => failed(codes::EOBJECTNOTFOUND, format!("LUN {} not found", path)),
        }
    }

    async fn lun_get_attribute(&self, path: &str, name: &str) -> AttemptResult<Option<String>> {
        if let Some(error) = self.begin("lun_get_attribute", path) {
            return injected(error);
        }
        match self.state.lock().luns.get(path) {
            Some(lun) => Ok(ApiResponse::ok(lun.attributes.get(name).cloned())),
            None => failed(codes::EOBJECTNOTFOUND, format!("LUN {} not found", path)),
        }
    }

    async fn lun_destroy(&self, path: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("lun_destroy", path) {
            return injected(error);
        }
        match self.state.lock().luns.remove(path) {
            Some(_) => Ok(ApiResponse::ok(())),
            None => failed(codes::EOBJECTNOTFOUND, format!("LUN {} not found", path)),
        }
    }

    async fn lun_rename(&self, path: &str, new_path: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("lun_rename", path) {
            return injected(error);
        }
        let mut state = self.state.lock();
        if volume_of(path) != volume_of(new_path) {
            return failed(codes::EAPIERROR, "LUNs cannot be moved between volumes");
        }
        if state.luns.contains_key(new_path) {
            return failed(codes::EAPIERROR, format!("LUN {} already exists", new_path));
        }
        match state.luns.remove(path) {
            Some(mut lun) => {
                lun.info.path = new_path.to_string();
                state.luns.insert(new_path.to_string(), lun);
                Ok(ApiResponse::ok(()))
            }
            None => failed(codes::EOBJECTNOTFOUND, format!("LUN {} not found", path)),
        }
    }

    async fn lun_resize(&self, path: &str, size_bytes: u64) -> AttemptResult<u64> {
        if let Some(error) = self.begin("lun_resize", path) {
            return injected(error);
        }
        let actual = self.lun_actual_size(size_bytes);
        let mut state = self.state.lock();
        match state.luns.get_mut(path) {
            Some(lun) if actual > lun.max_resize_bytes => failed(
                codes::EAPIERROR,
                format!("size {} exceeds maximum LUN size {}", actual, lun.max_resize_bytes),
            ),
            Some(lun) => {
                lun.info.size_bytes = Some(actual);
                Ok(ApiResponse::ok(actual))
            }
            None => failed(codes::EOBJECTNOTFOUND, format!("LUN {} not found", path)),
        }
    }

    async fn lun_get_geometry(&self, path: &str) -> AttemptResult<LunGeometry> {
        if let Some(error) = self.begin("lun_get_geometry", path) {
            return injected(error);
        }
        match self.state.lock().luns.get(path) {
            Some(lun) => Ok(ApiResponse::ok(LunGeometry {
                max_resize_size_bytes: lun.max_resize_bytes,
            })),
            None => failed(codes::EOBJECTNOTFOUND, format!("LUN {} not found", path)),
        }
    }

    async fn lun_map_list_info(&self, path: &str) -> AttemptResult<Vec<LunMapping>> {
        if let Some(error) = self.begin("lun_map_list_info", path) {
            return injected(error);
        }
        match self.state.lock().luns.get(path) {
            Some(lun) => Ok(ApiResponse::ok(lun.mappings.clone())),
            None => failed(codes::EOBJECTNOTFOUND, format!("LUN {} not found", path)),
        }
    }

    async fn lun_map(&self, igroup: &str, path: &str, lun_id: Option<u32>) -> AttemptResult<u32> {
        if let Some(error) = self.begin("lun_map", path) {
            return injected(error);
        }
        let mut state = self.state.lock();
        if !state.igroups.contains_key(igroup) {
            return failed(codes::EOBJECTNOTFOUND, format!("igroup {} not found", igroup));
        }
        let id = lun_id.unwrap_or_else(|| state.next_lun_id(igroup));
        match state.luns.get_mut(path) {
            Some(lun) if lun.mappings.iter().any(|m| m.igroup == igroup) => failed(
                codes::EVDISK_ERROR_INITGROUP_HAS_VDISK,
                format!("LUN {} already mapped to {}", path, igroup),
            ),
            Some(lun) => {
                lun.mappings.push(LunMapping {
                    igroup: igroup.to_string(),
                    lun_id: id,
                });
                lun.info.mapped = Some(true);
                Ok(ApiResponse::ok(id))
            }
            None => failed(codes::EOBJECTNOTFOUND, format!("LUN {} not found", path)),
        }
    }

    async fn lun_unmap(&self, igroup: &str, path: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("lun_unmap", path) {
            return injected(error);
        }
        match self.state.lock().luns.get_mut(path) {
            Some(lun) => {
                lun.mappings.retain(|m| m.igroup != igroup);
                lun.info.mapped = Some(!lun.mappings.is_empty());
                Ok(ApiResponse::ok(()))
            }
            None => failed(codes::EOBJECTNOTFOUND, format!("LUN {} not found", path)),
        }
    }

    async fn igroup_create(&self, name: &str, _os_type: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("igroup_create", name) {
            return injected(error);
        }
        let mut state = self.state.lock();
        if state.igroups.contains_key(name) {
            return failed(
                codes::EVDISK_ERROR_INITGROUP_EXISTS,
                format!("igroup {} already exists", name),
            );
        }
        state.igroups.insert(name.to_string(), BTreeSet::new());
        Ok(ApiResponse::ok(()))
    }

    async fn igroup_add(&self, name: &str, initiator: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("igroup_add", name) {
            return injected(error);
        }
        match self.state.lock().igroups.get_mut(name) {
            Some(initiators) if initiators.contains(initiator) => failed(
                codes::EVDISK_ERROR_INITGROUP_HAS_NODE,
                format!("initiator {} already in {}", initiator, name),
            ),
            Some(initiators) => {
                initiators.insert(initiator.to_string());
                Ok(ApiResponse::ok(()))
            }
            None => failed(codes::EOBJECTNOTFOUND, format!("igroup {} not found", name)),
        }
    }

    async fn iscsi_node_name(&self) -> AttemptResult<String> {
        if let Some(error) = self.begin("iscsi_node_name", "") {
            return injected(error);
        }
        Ok(ApiResponse::ok(self.config.iscsi_node_name.clone()))
    }

    async fn net_interface_get_data_lifs(&self, protocol: &str) -> AttemptResult<Vec<String>> {
        if let Some(error) = self.begin("net_interface_get_data_lifs", protocol) {
            return injected(error);
        }
        let lifs = if protocol == "iscsi" {
            self.config.data_lifs.clone()
        } else {
            Vec::new()
        };
        Ok(ApiResponse::ok(lifs))
    }

    async fn aggr_space_get(&self, aggregate: &str) -> AttemptResult<Option<AggregateSpace>> {
        if let Some(error) = self.begin("aggr_space_get", aggregate) {
            return injected(error);
        }
        let state = self.state.lock();
        Ok(ApiResponse::ok(state.aggregates.get(aggregate).map(|a| {
            AggregateSpace {
                size_bytes: a.size_bytes,
                used_including_snapshot_reserve_bytes: a.used_bytes,
                snapshot_reserve_bytes: 0,
            }
        })))
    }

    async fn snapshot_create(&self, volume: &str, name: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("snapshot_create", volume) {
            return injected(error);
        }
        match self.state.lock().volumes.get_mut(volume) {
            Some(v) if v.snapshots.iter().any(|s| s.name == name) => {
                failed(codes::EAPIERROR, format!("snapshot {} already exists", name))
            }
            Some(v) => {
                v.snapshots.push(SnapshotInfo {
                    name: name.to_string(),
                    volume: volume.to_string(),
                    created_at: chrono::Utc::now(),
                });
                Ok(ApiResponse::ok(()))
            }
            None => failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", volume)),
        }
    }

    async fn snapshot_list(&self, volume: &str) -> AttemptResult<Vec<SnapshotInfo>> {
        if let Some(error) = self.begin("snapshot_list", volume) {
            return injected(error);
        }
        match self.state.lock().volumes.get(volume) {
            Some(v) => Ok(ApiResponse::ok(v.snapshots.clone())),
            None => failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", volume)),
        }
    }

    async fn snapshot_restore(&self, volume: &str, name: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("snapshot_restore", volume) {
            return injected(error);
        }
        match self.state.lock().volumes.get(volume) {
            Some(v) if v.snapshots.iter().any(|s| s.name == name) => Ok(ApiResponse::ok(())),
            Some(_) => failed(codes::EOBJECTNOTFOUND, format!("snapshot {} not found", name)),
            None => failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", volume)),
        }
    }

    async fn snapshot_delete(&self, volume: &str, name: &str) -> AttemptResult<()> {
        if let Some(error) = self.begin("snapshot_delete", volume) {
            return injected(error);
        }
        match self.state.lock().volumes.get_mut(volume) {
            Some(v) => {
                let before = v.snapshots.len();
                v.snapshots.retain(|s| s.name != name);
                if v.snapshots.len() == before {
                    failed(codes::EOBJECTNOTFOUND, format!("snapshot {} not found", name))
                } else {
                    Ok(ApiResponse::ok(()))
                }
            }
            None => failed(codes::EVOLUMEDOESNOTEXIST, format!("volume {} does not exist", volume)),
        }
    }

    fn supports_feature(&self, feature: Feature) -> bool {
        self.config.features.contains(&feature)
    }

    fn tiering_policy_value(&self) -> String {
        self.config.tiering_policy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::api::extract;
    use assert_matches::assert_matches;

    const GI: u64 = 1024 * 1024 * 1024;

    fn create_spec(name: &str, aggregate: &str, size_bytes: u64) -> VolumeCreateSpec {
        VolumeCreateSpec {
            name: name.into(),
            aggregate: aggregate.into(),
            size_bytes,
            space_reserve: "none".into(),
            snapshot_policy: "none".into(),
            unix_permissions: "---rwxrwxrwx".into(),
            export_policy: "default".into(),
            security_style: "unix".into(),
            tiering_policy: String::new(),
            encrypt: false,
            snapshot_reserve: Some(0),
        }
    }

    #[tokio::test]
    async fn test_volume_create_respects_capacity() {
        let controller = SimulatedController::default().with_aggregate("aggr1", Some(2 * GI));
        extract(controller.volume_create(&create_spec("v1", "aggr1", GI)).await).unwrap();

        let err = extract(controller.volume_create(&create_spec("v2", "aggr1", 2 * GI)).await)
            .unwrap_err();
        assert!(err.has_code(codes::ENOSPC));

        let space = extract(controller.aggr_space_get("aggr1").await).unwrap().unwrap();
        assert_eq!(space.used_including_snapshot_reserve_bytes, GI);
    }

    #[tokio::test]
    async fn test_lun_create_rounds_up() {
        let controller = SimulatedController::new(SimulatedConfig {
            lun_granularity_bytes: 4096,
            ..Default::default()
        })
        .with_aggregate("aggr1", None);
        extract(controller.volume_create(&create_spec("v1", "aggr1", GI)).await).unwrap();

        let result = extract(
            controller
                .lun_create(&LunCreateSpec {
                    path: "/vol/v1/lun0".into(),
                    size_bytes: 1000,
                    os_type: "linux".into(),
                    space_reserved: false,
                    space_allocated: true,
                })
                .await,
        )
        .unwrap();
        assert_eq!(result.actual_size_bytes, 4096);
    }

    #[tokio::test]
    async fn test_destroy_missing_volume_reports_code() {
        let controller = SimulatedController::default();
        let err = extract(controller.volume_destroy("ghost", true).await).unwrap_err();
        assert!(err.is_volume_not_found());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let controller = SimulatedController::default().with_aggregate("aggr1", None);
        controller.fail_next(
            "volume_create",
            Some("v1"),
            ApiError::Transport("connection reset".into()),
        );

        assert_matches!(
            controller.volume_create(&create_spec("v1", "aggr1", GI)).await,
            Err(ApiError::Transport(_))
        );
        extract(controller.volume_create(&create_spec("v1", "aggr1", GI)).await).unwrap();
        assert_eq!(controller.call_count("volume_create"), 2);
        assert_eq!(controller.mutation_count(), 2);
    }

    #[tokio::test]
    async fn test_lun_get_all_matches_glob() {
        let controller = SimulatedController::default().with_aggregate("aggr1", None);
        for name in ["trident_a", "trident_b", "other_c"] {
            extract(controller.volume_create(&create_spec(name, "aggr1", GI)).await).unwrap();
            extract(
                controller
                    .lun_create(&LunCreateSpec {
                        path: format!("/vol/{}/lun0", name),
                        size_bytes: GI,
                        os_type: "linux".into(),
                        space_reserved: false,
                        space_allocated: false,
                    })
                    .await,
            )
            .unwrap();
        }

        let luns = extract(controller.lun_get_all("/vol/trident_*/lun0").await).unwrap();
        let paths: Vec<_> = luns.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["/vol/trident_a/lun0", "/vol/trident_b/lun0"]);
    }

    #[tokio::test]
    async fn test_seeded_huge_lun_geometry_saturates() {
        let controller = SimulatedController::default();
        controller.insert_lun(LunInfo {
            path: "/vol/huge/lun0".into(),
            volume: "huge".into(),
            size_bytes: Some(u64::MAX / 2),
            online: Some(true),
            mapped: Some(false),
            os_type: "linux".into(),
            serial: "serial0".into(),
        });

        let geometry = extract(controller.lun_get_geometry("/vol/huge/lun0").await).unwrap();
        assert_eq!(geometry.max_resize_size_bytes, u64::MAX);
    }

    #[tokio::test]
    async fn test_lun_map_assigns_ids_and_rejects_duplicates() {
        let controller = SimulatedController::default().with_aggregate("aggr1", None);
        extract(controller.igroup_create("trident", "linux").await).unwrap();
        for name in ["v1", "v2"] {
            extract(controller.volume_create(&create_spec(name, "aggr1", GI)).await).unwrap();
            extract(
                controller
                    .lun_create(&LunCreateSpec {
                        path: format!("/vol/{}/lun0", name),
                        size_bytes: GI,
                        os_type: "linux".into(),
                        space_reserved: false,
                        space_allocated: false,
                    })
                    .await,
            )
            .unwrap();
        }

        assert_eq!(extract(controller.lun_map("trident", "/vol/v1/lun0", None).await).unwrap(), 0);
        assert_eq!(extract(controller.lun_map("trident", "/vol/v2/lun0", None).await).unwrap(), 1);

        let err = extract(controller.lun_map("trident", "/vol/v1/lun0", None).await).unwrap_err();
        assert!(err.has_code(codes::EVDISK_ERROR_INITGROUP_HAS_VDISK));
    }
}
