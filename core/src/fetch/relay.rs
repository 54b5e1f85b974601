//! Fetch event relay
//!
//! Subscribes once to the host's fetch event channel, maps each delivery to
//! its originating task id, emits the `fetch` device event and arms a
//! per-task timeout. If the application does not `finish` the task before the
//! timeout, a second `fetch` event with `timeout: true` is emitted.

use crate::host::{CommonEventData, CommonEventHub, DeviceEventEmitter, EventSink, HostError};
use crate::settings::BridgeSettings;
use crate::BackgroundFetchError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Device event name the application layer listens on
pub const FETCH_EVENT_NAME: &str = "fetch";

/// Outbound device event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchEvent {
    pub task_id: String,
    pub timeout: bool,
}

impl FetchEvent {
    pub fn delivered(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            timeout: false,
        }
    }

    pub fn timed_out(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            timeout: true,
        }
    }
}

#[derive(Deserialize)]
struct EventEnvelope {
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct EventParameters {
    #[serde(rename = "taskId")]
    task_id: String,
}

/// Recover the task id from a common event `data` document.
///
/// The host sends `parameters` as a JSON-encoded string; an inline object is
/// accepted as well.
pub fn parse_task_id(data: &str) -> Result<String, BackgroundFetchError> {
    let envelope: EventEnvelope = serde_json::from_str(data).map_err(malformed)?;
    let parameters: EventParameters = match envelope.parameters {
        serde_json::Value::String(encoded) => serde_json::from_str(&encoded),
        inline => serde_json::from_value(inline),
    }
    .map_err(malformed)?;

    Ok(parameters.task_id)
}

fn malformed(err: serde_json::Error) -> BackgroundFetchError {
    BackgroundFetchError::MalformedEvent(err.to_string())
}

struct PendingTimeout {
    generation: u64,
    handle: JoinHandle<()>,
}

type Delivery = Result<CommonEventData, HostError>;

pub struct FetchEventRelay {
    settings: Arc<BridgeSettings>,
    hub: Arc<dyn CommonEventHub>,
    emitter: Arc<dyn DeviceEventEmitter>,
    /// `None` when the host refused to create a subscriber; never retried
    subscriber: Option<u64>,
    pump: Mutex<Option<JoinHandle<()>>>,
    timeouts: Mutex<HashMap<String, PendingTimeout>>,
    next_generation: AtomicU64,
}

impl FetchEventRelay {
    /// Create the relay and its host subscriber.
    ///
    /// Subscriber creation failures are logged; the relay then stays without
    /// a subscriber for its whole lifetime.
    pub fn new(
        settings: Arc<BridgeSettings>,
        hub: Arc<dyn CommonEventHub>,
        emitter: Arc<dyn DeviceEventEmitter>,
    ) -> Self {
        let subscriber = match hub.create_subscriber_sync(vec![settings.event_name.clone()]) {
            Ok(subscriber) => Some(subscriber),
            Err(err) => {
                tracing::error!(
                    code = err.code(),
                    "createSubscriberSync failed: {}",
                    err
                );
                None
            }
        };

        Self {
            settings,
            hub,
            emitter,
            subscriber,
            pump: Mutex::new(None),
            timeouts: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.pump.lock().is_some()
    }

    /// Subscribe to the fetch channel unless already subscribed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure_subscribed(self: &Arc<Self>) -> Result<(), BackgroundFetchError> {
        let subscriber = self
            .subscriber
            .ok_or(BackgroundFetchError::SubscriberUnavailable)?;

        let mut pump = self.pump.lock();
        if pump.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.hub
            .subscribe(subscriber, Arc::new(EventSink::new(tx)))
            .map_err(BackgroundFetchError::host("subscribe"))?;

        *pump = Some(tokio::spawn(Self::pump_events(Arc::downgrade(self), rx)));
        tracing::info!(
            subscriber,
            event = %self.settings.event_name,
            "Subscribed to fetch events"
        );
        Ok(())
    }

    async fn pump_events(relay: Weak<Self>, mut rx: mpsc::UnboundedReceiver<Delivery>) {
        while let Some(delivery) = rx.recv().await {
            let Some(relay) = relay.upgrade() else {
                break;
            };

            match delivery {
                Ok(data) => {
                    if let Err(err) = relay.handle_event(&data) {
                        tracing::warn!("Dropping fetch event: {}", err);
                    }
                }
                Err(err) => {
                    tracing::error!(code = err.code(), "Fetch subscription failed: {}", err);
                }
            }
        }
        tracing::debug!("Fetch event pump finished");
    }

    /// Relay one delivery: emit the fetch event and arm its timeout.
    pub fn handle_event(self: &Arc<Self>, data: &CommonEventData) -> Result<(), BackgroundFetchError> {
        if data.event != self.settings.event_name {
            tracing::debug!(event = %data.event, "Ignoring unrelated common event");
            return Ok(());
        }

        let task_id = parse_task_id(&data.data)?;
        tracing::info!(task_id = %task_id, "Fetch event received");

        self.emit(FetchEvent::delivered(task_id.clone()));
        self.arm_timeout(task_id);
        Ok(())
    }

    fn arm_timeout(self: &Arc<Self>, task_id: String) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = self.settings.fetch_timeout();
        let relay = Arc::downgrade(self);
        let id = task_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(relay) = relay.upgrade() {
                relay.expire(&id, generation);
            }
        });

        let previous = self
            .timeouts
            .lock()
            .insert(task_id, PendingTimeout { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    fn expire(&self, task_id: &str, generation: u64) {
        let fired = {
            let mut timeouts = self.timeouts.lock();
            match timeouts.get(task_id) {
                Some(pending) if pending.generation == generation => {
                    timeouts.remove(task_id);
                    true
                }
                _ => false,
            }
        };

        if fired {
            tracing::warn!(task_id, "Fetch task not finished before timeout");
            self.emit(FetchEvent::timed_out(task_id));
        }
    }

    /// Disarm the timeout of `task_id`, returning whether one was pending
    pub fn cancel_timeout(&self, task_id: &str) -> bool {
        match self.timeouts.lock().remove(task_id) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_pending_timeout(&self, task_id: &str) -> bool {
        self.timeouts.lock().contains_key(task_id)
    }

    pub fn pending_timeouts(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timeouts.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn emit(&self, event: FetchEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => self
                .emitter
                .emit_device_event(FETCH_EVENT_NAME.to_string(), payload),
            Err(err) => tracing::error!("Failed to encode fetch event: {}", err),
        }
    }

    /// Abort every pending timeout
    pub fn cancel_all_timeouts(&self) {
        for (_, pending) in self.timeouts.lock().drain() {
            pending.handle.abort();
        }
    }

    /// Abort every pending timeout and stop the event pump
    pub fn shutdown(&self) {
        self.cancel_all_timeouts();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

impl Drop for FetchEventRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}
