//! Task registry
//!
//! Process-lifetime bookkeeping: the current record per task id, when each id
//! was last configured (for the dedupe window) and the ordered list of tasks
//! currently scheduled with the host. Nothing here is persisted; after a
//! restart the host's own stored work descriptors are authoritative.

use crate::fetch::config::TaskRecord;
use crate::settings::BridgeSettings;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Registry shared by the service, the scheduler adapter and the event relay.
pub type SharedRegistry = Arc<Mutex<TaskRegistry>>;

#[derive(Debug)]
pub struct TaskRegistry {
    records: HashMap<String, TaskRecord>,
    last_configured: HashMap<String, Instant>,
    active: Vec<String>,
    dedupe_window: Duration,
    max_active: usize,
    reserved_task_id: String,
}

impl TaskRegistry {
    pub fn new(settings: &BridgeSettings) -> Self {
        Self {
            records: HashMap::new(),
            last_configured: HashMap::new(),
            active: Vec::new(),
            dedupe_window: settings.dedupe_window(),
            max_active: settings.max_works,
            reserved_task_id: settings.fetch_task_id.clone(),
        }
    }

    pub fn shared(settings: &BridgeSettings) -> SharedRegistry {
        Arc::new(Mutex::new(Self::new(settings)))
    }

    /// Stamp `task_id` as configured at `now`.
    ///
    /// Returns `false` without touching anything when the previous stamp is
    /// younger than the dedupe window.
    pub fn try_touch(&mut self, task_id: &str, now: Instant) -> bool {
        if let Some(last) = self.last_configured.get(task_id) {
            if now.saturating_duration_since(*last) < self.dedupe_window {
                return false;
            }
        }

        self.last_configured.insert(task_id.to_string(), now);
        true
    }

    pub fn lookup(&self, task_id: &str) -> Option<&TaskRecord> {
        self.records.get(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.records.contains_key(task_id)
    }

    /// Store a record, returning the one it replaces
    pub fn insert(&mut self, record: TaskRecord) -> Option<TaskRecord> {
        self.records.insert(record.task_id.clone(), record)
    }

    pub fn remove(&mut self, task_id: &str) -> Option<TaskRecord> {
        self.records.remove(task_id)
    }

    /// Append `task_id` to the active list.
    ///
    /// At capacity the oldest non-reserved id is dropped to make room, its
    /// record forgotten, and the id returned. Already-active ids keep their
    /// position.
    pub fn activate(&mut self, task_id: &str) -> Option<String> {
        if self.is_active(task_id) {
            return None;
        }

        let mut evicted = None;
        if self.active.len() >= self.max_active {
            if let Some(index) = self
                .active
                .iter()
                .position(|id| *id != self.reserved_task_id)
            {
                let id = self.active.remove(index);
                self.records.remove(&id);
                evicted = Some(id);
            }
        }

        self.active.push(task_id.to_string());
        evicted
    }

    pub fn deactivate(&mut self, task_id: &str) -> bool {
        match self.active.iter().position(|id| id == task_id) {
            Some(index) => {
                self.active.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.active.iter().any(|id| id == task_id)
    }

    pub fn active_tasks(&self) -> &[String] {
        &self.active
    }

    pub fn last_configured(&self, task_id: &str) -> Option<Instant> {
        self.last_configured.get(task_id).copied()
    }

    /// Forget everything; used once the host reports no outstanding work.
    pub fn clear(&mut self) {
        self.records.clear();
        self.last_configured.clear();
        self.active.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
