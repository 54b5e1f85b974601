//! Task configuration translation
//!
//! The application layer speaks two configuration shapes: the periodic fetch
//! config and the generic task config. Both are normalized into one immutable
//! [`TaskRecord`] with host enumerations already resolved.

use crate::host::{BatteryStatus, HostNetworkType, StorageRequest};
use crate::settings::BridgeSettings;
use serde::{Deserialize, Serialize};

/// Work id of the empty task identifier.
pub const EMPTY_TASK_WORK_ID: u32 = 1_171_293_699;

/// Derive the host's numeric work id from a caller task id.
///
/// 31-multiplier string hash over UTF-16 code units in wrapping 32-bit
/// arithmetic, absolute value taken. Must stay stable across releases: hosts
/// persist work by this id.
pub fn work_id_for(task_id: &str) -> u32 {
    if task_id.is_empty() {
        return EMPTY_TASK_WORK_ID;
    }

    task_id
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(i32::from(unit))
        })
        .unsigned_abs()
}

// ============================================================================
// CALLER-FACING SHAPES
// ============================================================================

/// Network requirement as the application layer encodes it (0, 1, 2).
///
/// Unrecognized codes decode as [`NetworkType::Any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, uniffi::Enum)]
#[serde(from = "i32", into = "i32")]
pub enum NetworkType {
    Any,
    Mobile,
    Wifi,
}

impl From<i32> for NetworkType {
    fn from(code: i32) -> Self {
        match code {
            1 => NetworkType::Mobile,
            2 => NetworkType::Wifi,
            _ => NetworkType::Any,
        }
    }
}

impl From<NetworkType> for i32 {
    fn from(network: NetworkType) -> Self {
        match network {
            NetworkType::Any => 0,
            NetworkType::Mobile => 1,
            NetworkType::Wifi => 2,
        }
    }
}

impl NetworkType {
    pub fn to_host(self) -> HostNetworkType {
        match self {
            NetworkType::Any => HostNetworkType::Any,
            NetworkType::Mobile => HostNetworkType::Mobile,
            NetworkType::Wifi => HostNetworkType::Wifi,
        }
    }
}

/// Device constraints shared by both configuration shapes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct TaskConstraints {
    pub required_network_type: Option<NetworkType>,
    pub requires_battery_not_low: Option<bool>,
    pub requires_storage_not_low: Option<bool>,
    pub requires_charging: Option<bool>,
    pub requires_device_idle: Option<bool>,
}

/// Periodic fetch configuration (`BackgroundFetchConfig` in the JS API)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundFetchConfig {
    /// Minimum interval between fetch events, in minutes
    pub minimum_fetch_interval: Option<u32>,
    #[serde(flatten)]
    pub constraints: TaskConstraints,
}

/// Named task configuration (`TaskConfig` in the JS API)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub task_id: String,
    /// Minimum interval in milliseconds
    pub delay: Option<u64>,
    /// Keep firing, or run once
    pub periodic: Option<bool>,
    #[serde(flatten)]
    pub constraints: TaskConstraints,
}

impl TaskConfig {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            delay: None,
            periodic: None,
            constraints: TaskConstraints::default(),
        }
    }
}

// ============================================================================
// INTERNAL RECORD
// ============================================================================

/// Constraints resolved to host enumerations; `None` leaves the host default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConstraints {
    pub network_type: Option<HostNetworkType>,
    pub battery_status: Option<BatteryStatus>,
    pub storage_request: Option<StorageRequest>,
    pub requires_charging: Option<bool>,
    pub requires_device_idle: Option<bool>,
}

impl From<&TaskConstraints> for HostConstraints {
    fn from(constraints: &TaskConstraints) -> Self {
        Self {
            network_type: constraints.required_network_type.map(NetworkType::to_host),
            battery_status: constraints.requires_battery_not_low.map(battery_status_for),
            storage_request: constraints.requires_storage_not_low.map(storage_request_for),
            requires_charging: constraints.requires_charging,
            requires_device_idle: constraints.requires_device_idle,
        }
    }
}

// The host's "LOW" level is the one the JS contract documents as the
// battery/storage-not-low requirement.
fn battery_status_for(requires_not_low: bool) -> BatteryStatus {
    if requires_not_low {
        BatteryStatus::Low
    } else {
        BatteryStatus::LowOrOkay
    }
}

fn storage_request_for(requires_not_low: bool) -> StorageRequest {
    if requires_not_low {
        StorageRequest::Low
    } else {
        StorageRequest::LowOrOkay
    }
}

/// Normalized configuration of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task_id: String,
    pub work_id: u32,
    /// Minutes; only meaningful for the fetch task
    pub minimum_fetch_interval: u32,
    /// Milliseconds; only meaningful for named tasks
    pub delay_ms: u64,
    pub periodic: bool,
    pub is_fetch_task: bool,
    pub constraints: HostConstraints,
}

impl TaskRecord {
    /// Record for the reserved periodic fetch task
    pub fn for_fetch(config: &BackgroundFetchConfig, settings: &BridgeSettings) -> Self {
        let task_id = settings.fetch_task_id.clone();
        Self {
            work_id: work_id_for(&task_id),
            task_id,
            minimum_fetch_interval: config
                .minimum_fetch_interval
                .unwrap_or(settings.default_fetch_interval_min),
            delay_ms: 0,
            periodic: true,
            is_fetch_task: true,
            constraints: HostConstraints::from(&config.constraints),
        }
    }

    /// Record for a caller-named task
    pub fn for_task(config: &TaskConfig, settings: &BridgeSettings) -> Self {
        Self {
            task_id: config.task_id.clone(),
            work_id: work_id_for(&config.task_id),
            minimum_fetch_interval: settings.default_fetch_interval_min,
            delay_ms: config.delay.unwrap_or(0),
            periodic: config.periodic.unwrap_or(false),
            is_fetch_task: false,
            constraints: HostConstraints::from(&config.constraints),
        }
    }

    /// Requested repeat cycle before the host floor is applied (milliseconds)
    pub fn requested_cycle_ms(&self) -> u64 {
        if self.is_fetch_task {
            u64::from(self.minimum_fetch_interval) * 60 * 1000
        } else {
            self.delay_ms
        }
    }

    /// Whether the host should keep re-running the work
    pub fn repeats(&self) -> bool {
        self.periodic || self.is_fetch_task
    }
}
