//! In-memory host fakes for tests.
//!
//! Compiled for unit tests and, through the `test-utils` feature, for
//! dependent crates.

use crate::fetch::{work_id_for, BackgroundFetchService, FetchEvent};
use crate::host::{
    CommonEventData, CommonEventHub, DeviceEventEmitter, EventSink, HostContext, HostError,
    WorkInfo, WorkScheduler, TASK_ID_PARAM,
};
use crate::mobile_bridge::HostWorkScheduler;
use crate::settings::{BridgeSettings, DEFAULT_ABILITY_NAME};
use crate::{BackgroundFetchError, BackgroundFetchStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub const TEST_BUNDLE: &str = "com.example.app";

/// Work descriptor as the host would report it for `task_id`
pub fn outstanding_work(task_id: &str) -> WorkInfo {
    WorkInfo {
        work_id: work_id_for(task_id),
        bundle_name: TEST_BUNDLE.to_string(),
        ability_name: DEFAULT_ABILITY_NAME.to_string(),
        repeat_cycle_time: Some(1_200_000),
        is_repeat: Some(true),
        repeat_count: None,
        is_charging: None,
        is_deep_idle: None,
        network_type: None,
        battery_status: None,
        storage_request: None,
        parameters: HashMap::from([(TASK_ID_PARAM.to_string(), task_id.to_string())]),
    }
}

/// A `fetch` common event for `task_id`, with the doubly-encoded parameters
/// the host produces
pub fn fetch_event_data(task_id: &str) -> CommonEventData {
    let parameters = serde_json::json!({ "taskId": task_id }).to_string();
    CommonEventData {
        event: "fetch".to_string(),
        code: 0,
        data: serde_json::json!({ "parameters": parameters }).to_string(),
    }
}

// ============================================================================
// WORK SCHEDULER
// ============================================================================

/// Host call as seen by [`FakeWorkScheduler`], keyed by caller task id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    StartWork(String),
    StopWork(String),
    GetWorkStatus(u32),
    ObtainAllWorks,
    BackgroundStatus,
}

fn task_key(work: &WorkInfo) -> String {
    work.task_id().unwrap_or_default().to_string()
}

/// Work scheduler holding works in registration order
#[derive(Default)]
pub struct FakeWorkScheduler {
    works: Mutex<Vec<WorkInfo>>,
    calls: Mutex<Vec<HostCall>>,
    failures: Mutex<HashMap<&'static str, HostError>>,
    status: Mutex<Option<BackgroundFetchStatus>>,
}

impl FakeWorkScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outstanding works
    pub fn seed(&self, works: Vec<WorkInfo>) {
        *self.works.lock() = works;
    }

    pub fn works(&self) -> Vec<WorkInfo> {
        self.works.lock().clone()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn started_task_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                HostCall::StartWork(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stopped_task_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                HostCall::StopWork(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Make every later call of `op` (host API name) fail with `err`
    pub fn fail_on(&self, op: &'static str, err: HostError) {
        self.failures.lock().insert(op, err);
    }

    pub fn set_status(&self, status: BackgroundFetchStatus) {
        *self.status.lock() = Some(status);
    }

    fn check(&self, op: &'static str, call: HostCall) -> Result<(), HostError> {
        self.calls.lock().push(call);
        match self.failures.lock().get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn start(&self, work: WorkInfo) -> Result<(), HostError> {
        self.check("startWork", HostCall::StartWork(task_key(&work)))?;
        let mut works = self.works.lock();
        match works.iter_mut().find(|w| w.work_id == work.work_id) {
            Some(existing) => *existing = work,
            None => works.push(work),
        }
        Ok(())
    }

    fn stop(&self, work: WorkInfo) -> Result<(), HostError> {
        self.check("stopWork", HostCall::StopWork(task_key(&work)))?;
        self.works.lock().retain(|w| w.work_id != work.work_id);
        Ok(())
    }

    fn status_of(&self, work_id: u32) -> Result<WorkInfo, HostError> {
        self.check("getWorkStatus", HostCall::GetWorkStatus(work_id))?;
        self.works
            .lock()
            .iter()
            .find(|w| w.work_id == work_id)
            .cloned()
            .ok_or_else(|| HostError::new(9700004, "check workInfo failed"))
    }

    fn all(&self) -> Result<Vec<WorkInfo>, HostError> {
        self.check("obtainAllWorks", HostCall::ObtainAllWorks)?;
        Ok(self.works())
    }

    fn permission(&self) -> Result<BackgroundFetchStatus, HostError> {
        self.check("backgroundStatus", HostCall::BackgroundStatus)?;
        Ok((*self.status.lock()).unwrap_or(BackgroundFetchStatus::Available))
    }
}

#[async_trait]
impl WorkScheduler for FakeWorkScheduler {
    async fn start_work(&self, work: WorkInfo) -> Result<(), HostError> {
        self.start(work)
    }

    async fn stop_work(&self, work: WorkInfo, _need_cancel: bool) -> Result<(), HostError> {
        self.stop(work)
    }

    async fn get_work_status(&self, work_id: u32) -> Result<WorkInfo, HostError> {
        self.status_of(work_id)
    }

    async fn obtain_all_works(&self) -> Result<Vec<WorkInfo>, HostError> {
        self.all()
    }

    async fn background_status(&self) -> Result<BackgroundFetchStatus, HostError> {
        self.permission()
    }
}

impl HostWorkScheduler for FakeWorkScheduler {
    fn start_work(&self, work: WorkInfo) -> Result<(), HostError> {
        self.start(work)
    }

    fn stop_work(&self, work: WorkInfo, _need_cancel: bool) -> Result<(), HostError> {
        self.stop(work)
    }

    fn get_work_status(&self, work_id: u32) -> Result<WorkInfo, HostError> {
        self.status_of(work_id)
    }

    fn obtain_all_works(&self) -> Result<Vec<WorkInfo>, HostError> {
        self.all()
    }

    fn background_status(&self) -> Result<BackgroundFetchStatus, HostError> {
        self.permission()
    }
}

// ============================================================================
// COMMON EVENTS
// ============================================================================

#[derive(Default)]
pub struct FakeEventHub {
    fail_create: bool,
    created: Mutex<Vec<String>>,
    subscribe_calls: Mutex<usize>,
    sink: Mutex<Option<Arc<EventSink>>>,
}

impl FakeEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub whose subscriber creation always fails
    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub fn subscribe_calls(&self) -> usize {
        *self.subscribe_calls.lock()
    }

    /// Event names subscribers were created for
    pub fn created_events(&self) -> Vec<String> {
        self.created.lock().clone()
    }

    /// Push a delivery to the subscribed sink, if any
    pub fn deliver(&self, data: CommonEventData) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.deliver(data);
        }
    }

    /// Push a subscription error to the subscribed sink, if any
    pub fn fail(&self, code: i32, message: &str) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.fail(code, message.to_string());
        }
    }
}

impl CommonEventHub for FakeEventHub {
    fn create_subscriber_sync(&self, events: Vec<String>) -> Result<u64, HostError> {
        if self.fail_create {
            return Err(HostError::new(1500007, "create subscriber failed"));
        }
        let mut created = self.created.lock();
        created.extend(events);
        Ok(created.len() as u64)
    }

    fn subscribe(&self, _subscriber: u64, sink: Arc<EventSink>) -> Result<(), HostError> {
        *self.subscribe_calls.lock() += 1;
        *self.sink.lock() = Some(sink);
        Ok(())
    }
}

/// Device event emitter that keeps every emission
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw `(name, payload)` emissions in order
    pub fn emitted(&self) -> Vec<(String, String)> {
        self.events.lock().clone()
    }

    /// Decoded `fetch` events in order
    pub fn fetch_events(&self) -> Vec<FetchEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(name, _)| name == "fetch")
            .filter_map(|(_, payload)| serde_json::from_str(payload).ok())
            .collect()
    }
}

impl DeviceEventEmitter for RecordingEmitter {
    fn emit_device_event(&self, name: String, payload: String) {
        self.events.lock().push((name, payload));
    }
}

// ============================================================================
// SERVICE HARNESS
// ============================================================================

/// A service wired to fresh fakes
pub struct Harness {
    pub service: BackgroundFetchService,
    pub scheduler: Arc<FakeWorkScheduler>,
    pub hub: Arc<FakeEventHub>,
    pub emitter: Arc<RecordingEmitter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(BridgeSettings::default())
    }

    pub fn with_settings(settings: BridgeSettings) -> Self {
        Self::try_with_settings(settings).expect("harness settings must be valid")
    }

    pub fn try_with_settings(settings: BridgeSettings) -> Result<Self, BackgroundFetchError> {
        let scheduler = Arc::new(FakeWorkScheduler::new());
        let hub = Arc::new(FakeEventHub::new());
        let emitter = Arc::new(RecordingEmitter::new());
        let service = BackgroundFetchService::new(
            settings,
            HostContext {
                bundle_name: TEST_BUNDLE.to_string(),
            },
            scheduler.clone(),
            hub.clone(),
            emitter.clone(),
        )?;

        Ok(Self {
            service,
            scheduler,
            hub,
            emitter,
        })
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
