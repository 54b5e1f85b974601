//! Host collaborator interfaces
//!
//! The bridge never schedules anything itself. Work descriptors are handed to
//! the host work scheduler, fetch deliveries arrive through the host's common
//! event service, and outbound events go to the application's device event
//! emitter. Each of these is a trait so the native layer (or a test fake) can
//! supply it.

use crate::BackgroundFetchStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Work descriptor parameter carrying the caller's task identifier.
pub const TASK_ID_PARAM: &str = "taskId";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Failure reported by a host service (`BusinessError` on the native side).
#[derive(Debug, Clone, PartialEq, Eq, Error, uniffi::Error)]
pub enum HostError {
    #[error("code {code}: {message}")]
    Failed { code: i32, message: String },
}

impl HostError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        HostError::Failed {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            HostError::Failed { code, .. } => *code,
        }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for HostError {
    fn from(err: uniffi::UnexpectedUniFFICallbackError) -> Self {
        HostError::new(-1, err.reason)
    }
}

// ============================================================================
// WORK DESCRIPTOR
// ============================================================================

/// Network condition understood by the host scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, uniffi::Enum)]
pub enum HostNetworkType {
    Any,
    Mobile,
    Wifi,
    Bluetooth,
    WifiP2p,
    Ethernet,
}

/// Battery condition understood by the host scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, uniffi::Enum)]
pub enum BatteryStatus {
    Low,
    Okay,
    LowOrOkay,
}

/// Storage condition understood by the host scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, uniffi::Enum)]
pub enum StorageRequest {
    Low,
    Okay,
    LowOrOkay,
}

/// Host application identity placed on every work descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct HostContext {
    pub bundle_name: String,
}

/// Work descriptor handed to the host scheduler.
///
/// Optional fields left as `None` keep the host's own defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct WorkInfo {
    pub work_id: u32,
    pub bundle_name: String,
    pub ability_name: String,
    pub repeat_cycle_time: Option<u64>,
    pub is_repeat: Option<bool>,
    pub repeat_count: Option<u32>,
    pub is_charging: Option<bool>,
    pub is_deep_idle: Option<bool>,
    pub network_type: Option<HostNetworkType>,
    pub battery_status: Option<BatteryStatus>,
    pub storage_request: Option<StorageRequest>,
    pub parameters: HashMap<String, String>,
}

impl WorkInfo {
    /// Caller task id recorded in the descriptor parameters
    pub fn task_id(&self) -> Option<&str> {
        self.parameters.get(TASK_ID_PARAM).map(String::as_str)
    }

    pub fn is_task(&self, task_id: &str) -> bool {
        self.task_id() == Some(task_id)
    }
}

// ============================================================================
// WORK SCHEDULER
// ============================================================================

/// Host work scheduler.
///
/// Works are keyed by numeric work id; the caller's string id travels in
/// [`WorkInfo::parameters`].
#[async_trait]
pub trait WorkScheduler: Send + Sync {
    /// Register a work descriptor with the host
    async fn start_work(&self, work: WorkInfo) -> Result<(), HostError>;

    /// Stop a registered work item
    async fn stop_work(&self, work: WorkInfo, need_cancel: bool) -> Result<(), HostError>;

    /// Current host view of one work item
    async fn get_work_status(&self, work_id: u32) -> Result<WorkInfo, HostError>;

    /// All work items the host holds for this application
    async fn obtain_all_works(&self) -> Result<Vec<WorkInfo>, HostError>;

    /// Background execution permission state.
    ///
    /// Hosts without a permission query keep the default.
    async fn background_status(&self) -> Result<BackgroundFetchStatus, HostError> {
        Ok(BackgroundFetchStatus::Available)
    }
}

// ============================================================================
// COMMON EVENTS
// ============================================================================

/// One delivery on a common event channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct CommonEventData {
    pub event: String,
    pub code: i32,
    /// JSON document; its `parameters` carry the originating `taskId`
    pub data: String,
}

/// Receiving end handed to the host on subscribe.
///
/// The host pushes deliveries (or subscription errors) into it from any
/// thread; they are drained by the event relay on the runtime.
#[derive(uniffi::Object)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Result<CommonEventData, HostError>>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Result<CommonEventData, HostError>>) -> Self {
        Self { tx }
    }
}

#[uniffi::export]
impl EventSink {
    /// Deliver an event to the relay
    pub fn deliver(&self, data: CommonEventData) {
        if self.tx.send(Ok(data)).is_err() {
            tracing::debug!("Event relay gone, dropping delivery");
        }
    }

    /// Report a subscription error
    pub fn fail(&self, code: i32, message: String) {
        if self.tx.send(Err(HostError::new(code, message))).is_err() {
            tracing::debug!("Event relay gone, dropping subscription error");
        }
    }
}

/// Host common event service
#[uniffi::export(with_foreign)]
pub trait CommonEventHub: Send + Sync {
    /// Create a subscriber for the given event names, returning its handle
    fn create_subscriber_sync(&self, events: Vec<String>) -> Result<u64, HostError>;

    /// Start delivering the subscriber's events into `sink`
    fn subscribe(&self, subscriber: u64, sink: Arc<EventSink>) -> Result<(), HostError>;
}

/// Device event emitter of the embedding application
#[uniffi::export(with_foreign)]
pub trait DeviceEventEmitter: Send + Sync {
    fn emit_device_event(&self, name: String, payload: String);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(task_id: &str) -> WorkInfo {
        WorkInfo {
            work_id: 1,
            bundle_name: "com.example.app".to_string(),
            ability_name: "Ability".to_string(),
            repeat_cycle_time: None,
            is_repeat: None,
            repeat_count: None,
            is_charging: None,
            is_deep_idle: None,
            network_type: None,
            battery_status: None,
            storage_request: None,
            parameters: HashMap::from([(TASK_ID_PARAM.to_string(), task_id.to_string())]),
        }
    }

    #[test]
    fn test_work_info_task_id() {
        let info = work("sync");
        assert_eq!(info.task_id(), Some("sync"));
        assert!(info.is_task("sync"));
        assert!(!info.is_task("other"));
    }

    #[test]
    fn test_work_info_without_task_id() {
        let mut info = work("sync");
        info.parameters.clear();
        assert_eq!(info.task_id(), None);
    }

    #[test]
    fn test_host_error_code() {
        let err = HostError::new(9700004, "work not found");
        assert_eq!(err.code(), 9700004);
        assert_eq!(err.to_string(), "code 9700004: work not found");
    }

    #[tokio::test]
    async fn test_event_sink_forwards_deliveries() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        sink.deliver(CommonEventData {
            event: "fetch".to_string(),
            code: 0,
            data: "{}".to_string(),
        });
        sink.fail(401, "denied".to_string());

        assert!(matches!(rx.recv().await, Some(Ok(data)) if data.event == "fetch"));
        assert!(matches!(rx.recv().await, Some(Err(err)) if err.code() == 401));
    }

    #[test]
    fn test_event_sink_tolerates_closed_relay() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = EventSink::new(tx);
        sink.fail(1, "ignored".to_string());
    }
}
