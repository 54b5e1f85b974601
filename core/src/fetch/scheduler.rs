//! Scheduler adapter
//!
//! Turns task records into host work descriptors and drives the host work
//! scheduler: capacity eviction, replace-by-cancel-then-start, and the
//! one-time fetch event subscription after the first successful start.

use crate::fetch::config::TaskRecord;
use crate::fetch::registry::SharedRegistry;
use crate::fetch::relay::FetchEventRelay;
use crate::host::{HostContext, WorkInfo, WorkScheduler, TASK_ID_PARAM};
use crate::settings::BridgeSettings;
use crate::{BackgroundFetchError, BackgroundFetchStatus};
use std::collections::HashMap;
use std::sync::Arc;

/// Raise `cycle_ms` to the host floor; values at or above it pass through.
pub fn floor_repeat_cycle(cycle_ms: u64, floor_ms: u64) -> u64 {
    cycle_ms.max(floor_ms)
}

pub struct SchedulerAdapter {
    host: Arc<dyn WorkScheduler>,
    registry: SharedRegistry,
    relay: Arc<FetchEventRelay>,
    settings: Arc<BridgeSettings>,
    context: HostContext,
}

impl SchedulerAdapter {
    pub fn new(
        host: Arc<dyn WorkScheduler>,
        registry: SharedRegistry,
        relay: Arc<FetchEventRelay>,
        settings: Arc<BridgeSettings>,
        context: HostContext,
    ) -> Self {
        Self {
            host,
            registry,
            relay,
            settings,
            context,
        }
    }

    /// Build the host work descriptor for `record`
    pub fn build_work_info(&self, record: &TaskRecord) -> WorkInfo {
        let is_repeat = record.repeats();
        let constraints = &record.constraints;

        WorkInfo {
            work_id: record.work_id,
            bundle_name: self.context.bundle_name.clone(),
            ability_name: self.settings.ability_name.clone(),
            repeat_cycle_time: Some(floor_repeat_cycle(
                record.requested_cycle_ms(),
                self.settings.min_repeat_cycle_ms,
            )),
            is_repeat: Some(is_repeat),
            repeat_count: (!is_repeat).then_some(1),
            is_charging: constraints.requires_charging,
            is_deep_idle: constraints.requires_device_idle,
            network_type: constraints.network_type,
            battery_status: constraints.battery_status,
            storage_request: constraints.storage_request,
            parameters: HashMap::from([(TASK_ID_PARAM.to_string(), record.task_id.clone())]),
        }
    }

    pub async fn outstanding_works(&self) -> Result<Vec<WorkInfo>, BackgroundFetchError> {
        self.host
            .obtain_all_works()
            .await
            .map_err(BackgroundFetchError::host("obtainAllWorks"))
    }

    pub async fn work_status(&self, work_id: u32) -> Result<WorkInfo, BackgroundFetchError> {
        self.host
            .get_work_status(work_id)
            .await
            .map_err(BackgroundFetchError::host("getWorkStatus"))
    }

    pub async fn background_status(&self) -> Result<BackgroundFetchStatus, BackgroundFetchError> {
        self.host
            .background_status()
            .await
            .map_err(BackgroundFetchError::host("backgroundStatus"))
    }

    /// Register `record` with the host, making room first.
    ///
    /// An outstanding work item for the same task is cancelled and replaced.
    /// Otherwise, at host capacity, the first outstanding item that is not
    /// the reserved fetch task is evicted.
    pub async fn register(&self, record: &TaskRecord) -> Result<(), BackgroundFetchError> {
        let works = self.outstanding_works().await?;

        if let Some(existing) = works.iter().find(|work| work.is_task(&record.task_id)) {
            tracing::debug!(task_id = %record.task_id, "Replacing outstanding work");
            self.cancel(existing).await?;
        } else if works.len() >= self.settings.max_works {
            let victim = works
                .iter()
                .find(|work| !work.is_task(&self.settings.fetch_task_id))
                .ok_or(BackgroundFetchError::CapacityExhausted(works.len()))?;
            tracing::warn!(
                evicted = victim.task_id().unwrap_or_default(),
                task_id = %record.task_id,
                "Host work capacity reached, evicting"
            );
            self.evict(victim).await?;
        }

        self.schedule(record).await
    }

    /// Start `record` on the host without capacity checks
    pub async fn schedule(&self, record: &TaskRecord) -> Result<(), BackgroundFetchError> {
        let work = self.build_work_info(record);
        tracing::info!(
            task_id = %record.task_id,
            work_id = work.work_id,
            repeat_cycle_ms = work.repeat_cycle_time,
            is_repeat = work.is_repeat,
            "Scheduling work"
        );

        self.host
            .start_work(work)
            .await
            .map_err(BackgroundFetchError::host("startWork"))?;

        let displaced = self.registry.lock().activate(&record.task_id);
        if let Some(displaced) = displaced {
            tracing::warn!(
                task_id = %displaced,
                "Active list out of step with host works, dropped oldest entry and its record"
            );
        }

        if let Err(err) = self.relay.ensure_subscribed() {
            tracing::error!("Fetch events will not be delivered: {}", err);
        }
        Ok(())
    }

    /// Stop a host work item and forget its record
    pub async fn cancel(&self, work: &WorkInfo) -> Result<(), BackgroundFetchError> {
        self.host
            .stop_work(work.clone(), true)
            .await
            .map_err(BackgroundFetchError::host("stopWork"))?;

        if let Some(task_id) = work.task_id() {
            self.registry.lock().remove(task_id);
        }
        tracing::info!(work_id = work.work_id, "Work stopped");
        Ok(())
    }

    async fn evict(&self, work: &WorkInfo) -> Result<(), BackgroundFetchError> {
        self.cancel(work).await?;
        if let Some(task_id) = work.task_id() {
            self.registry.lock().deactivate(task_id);
        }
        Ok(())
    }
}
