//! Background fetch service
//!
//! The object the application layer talks to. Owns the registry, the
//! scheduler adapter and the event relay for its whole lifetime; construction
//! creates the host event subscriber, [`BackgroundFetchService::shutdown`]
//! tears everything down.

use crate::fetch::config::{BackgroundFetchConfig, TaskConfig, TaskRecord};
use crate::fetch::registry::{SharedRegistry, TaskRegistry};
use crate::fetch::relay::FetchEventRelay;
use crate::fetch::scheduler::SchedulerAdapter;
use crate::host::{CommonEventHub, DeviceEventEmitter, HostContext, WorkScheduler};
use crate::settings::BridgeSettings;
use crate::{BackgroundFetchError, BackgroundFetchStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

pub struct BackgroundFetchService {
    settings: Arc<BridgeSettings>,
    registry: SharedRegistry,
    adapter: SchedulerAdapter,
    relay: Arc<FetchEventRelay>,
    /// Fetch record `start` registers; replaced by every accepted `configure`
    fetch_record: Mutex<TaskRecord>,
}

impl BackgroundFetchService {
    pub fn new(
        settings: BridgeSettings,
        context: HostContext,
        scheduler: Arc<dyn WorkScheduler>,
        events: Arc<dyn CommonEventHub>,
        emitter: Arc<dyn DeviceEventEmitter>,
    ) -> Result<Self, BackgroundFetchError> {
        settings.validate()?;

        let settings = Arc::new(settings);
        let registry = TaskRegistry::shared(&settings);
        let relay = Arc::new(FetchEventRelay::new(settings.clone(), events, emitter));
        let adapter = SchedulerAdapter::new(
            scheduler,
            registry.clone(),
            relay.clone(),
            settings.clone(),
            context,
        );
        let fetch_record = Mutex::new(TaskRecord::for_fetch(
            &BackgroundFetchConfig::default(),
            &settings,
        ));

        Ok(Self {
            settings,
            registry,
            adapter,
            relay,
            fetch_record,
        })
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Establish or replace the periodic fetch task.
    ///
    /// Returns `None` when the call landed inside the dedupe window and was
    /// dropped without touching the host.
    pub async fn configure(
        &self,
        config: BackgroundFetchConfig,
    ) -> Result<Option<BackgroundFetchStatus>, BackgroundFetchError> {
        let record = TaskRecord::for_fetch(&config, &self.settings);
        if !self.touch(&record.task_id) {
            return Ok(None);
        }

        *self.fetch_record.lock() = record.clone();

        let existing = self.registry.lock().lookup(&record.task_id).cloned();
        let Some(existing) = existing else {
            return self.start().await.map(Some);
        };

        match self.adapter.work_status(existing.work_id).await {
            Ok(work) => self.adapter.cancel(&work).await?,
            Err(err) => {
                tracing::warn!(task_id = %record.task_id, "Host lost the fetch work: {}", err);
                self.registry.lock().remove(&record.task_id);
            }
        }
        self.adapter.register(&record).await?;
        self.registry.lock().insert(record);

        Ok(Some(self.status().await))
    }

    /// Establish or replace a caller-named task.
    ///
    /// Returns `false` when the call was dropped by the dedupe window.
    pub async fn schedule_task(&self, config: TaskConfig) -> Result<bool, BackgroundFetchError> {
        let record = TaskRecord::for_task(&config, &self.settings);
        if !self.touch(&record.task_id) {
            return Ok(false);
        }

        let existing = self.registry.lock().lookup(&record.task_id).cloned();
        if let Some(existing) = existing {
            match self.adapter.work_status(existing.work_id).await {
                Ok(work) => self.adapter.cancel(&work).await?,
                Err(err) => {
                    tracing::warn!(task_id = %record.task_id, "No host work to replace: {}", err)
                }
            }
        }

        self.adapter.register(&record).await?;
        self.registry.lock().insert(record);
        Ok(true)
    }

    /// Register the fetch task unless it already is
    pub async fn start(&self) -> Result<BackgroundFetchStatus, BackgroundFetchError> {
        let registered = self.registry.lock().contains(&self.settings.fetch_task_id);
        if registered {
            tracing::info!(
                task_id = %self.settings.fetch_task_id,
                "Fetch task already registered"
            );
            return Ok(self.status().await);
        }

        let record = self.fetch_record.lock().clone();
        self.adapter.register(&record).await?;
        self.registry.lock().insert(record);

        Ok(self.status().await)
    }

    /// Cancel a task (default: the fetch task).
    ///
    /// When the host holds no work at all, local bookkeeping is reset to
    /// match it.
    pub async fn stop(&self, task_id: Option<&str>) -> Result<bool, BackgroundFetchError> {
        let task_id = self.resolve_task_id(task_id).to_string();
        let works = self.adapter.outstanding_works().await?;

        if works.is_empty() {
            tracing::info!("Host holds no work, clearing task registry");
            self.registry.lock().clear();
            self.relay.cancel_all_timeouts();
            return Ok(true);
        }

        if let Some(work) = works.iter().find(|work| work.is_task(&task_id)) {
            self.adapter.cancel(work).await?;
            self.registry.lock().deactivate(&task_id);
            self.relay.cancel_timeout(&task_id);
        } else {
            tracing::debug!(task_id = %task_id, "No outstanding work to stop");
        }

        Ok(true)
    }

    /// Background fetch availability.
    ///
    /// Hosts that do not expose a permission query report `Available`.
    pub async fn status(&self) -> BackgroundFetchStatus {
        match self.adapter.background_status().await {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!("Status query failed, assuming available: {}", err);
                BackgroundFetchStatus::Available
            }
        }
    }

    /// Acknowledge completion of a delivered fetch (default: the fetch task).
    ///
    /// Disarms its timeout, registered or not; one-shot tasks also leave the
    /// active list.
    pub fn finish(&self, task_id: Option<&str>) {
        let task_id = self.resolve_task_id(task_id);
        self.relay.cancel_timeout(task_id);

        let is_fetch_task = match self.registry.lock().lookup(task_id) {
            Some(record) => record.is_fetch_task,
            None => {
                tracing::debug!(task_id, "finish for unregistered task");
                return;
            }
        };

        if !is_fetch_task {
            self.registry.lock().deactivate(task_id);
        }
        tracing::debug!(task_id, "Task finished");
    }

    /// Required by the application's event emitter contract
    pub fn add_listener(&self) {}

    /// Required by the application's event emitter contract
    pub fn remove_listeners(&self) {}

    pub fn lookup(&self, task_id: &str) -> Option<TaskRecord> {
        self.registry.lock().lookup(task_id).cloned()
    }

    pub fn active_tasks(&self) -> Vec<String> {
        self.registry.lock().active_tasks().to_vec()
    }

    pub fn has_pending_timeout(&self, task_id: &str) -> bool {
        self.relay.has_pending_timeout(task_id)
    }

    pub fn relay(&self) -> &Arc<FetchEventRelay> {
        &self.relay
    }

    /// Disarm timers, stop the event pump and forget all tasks
    pub fn shutdown(&self) {
        self.relay.shutdown();
        self.registry.lock().clear();
        tracing::info!("Background fetch service shut down");
    }

    fn touch(&self, task_id: &str) -> bool {
        let accepted = self.registry.lock().try_touch(task_id, Instant::now());
        if !accepted {
            tracing::debug!(task_id, "Configured again within dedupe window, ignoring");
        }
        accepted
    }

    fn resolve_task_id<'a>(&'a self, task_id: Option<&'a str>) -> &'a str {
        task_id
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.settings.fetch_task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::relay::FetchEvent;
    use crate::fetch::config::TaskConstraints;
    use crate::host::HostError;
    use crate::test_support::{fetch_event_data, outstanding_work, Harness, HostCall};
    use std::time::Duration;

    const FETCH_ID: &str = "react-native-background-fetch";

    fn one_shot(id: &str, delay: u64) -> TaskConfig {
        TaskConfig {
            delay: Some(delay),
            periodic: Some(false),
            ..TaskConfig::new(id)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_with_defaults_registers_fetch_task() {
        let h = Harness::new();

        let status = h.service.configure(BackgroundFetchConfig::default()).await.unwrap();

        assert_eq!(status, Some(BackgroundFetchStatus::Available));
        let record = h.service.lookup(FETCH_ID).unwrap();
        assert_eq!(record.minimum_fetch_interval, 20);
        let work = &h.scheduler.works()[0];
        assert_eq!(work.repeat_cycle_time, Some(20 * 60 * 1000));
        assert_eq!(work.is_repeat, Some(true));
        assert_eq!(h.service.active_tasks(), vec![FETCH_ID.to_string()]);
        assert_eq!(h.hub.subscribe_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_twice_within_window_is_noop() {
        let h = Harness::new();
        h.service.configure(BackgroundFetchConfig::default()).await.unwrap();
        let calls_before = h.scheduler.calls().len();

        let second = h
            .service
            .configure(BackgroundFetchConfig {
                minimum_fetch_interval: Some(60),
                ..BackgroundFetchConfig::default()
            })
            .await
            .unwrap();

        assert_eq!(second, None);
        assert_eq!(h.scheduler.calls().len(), calls_before);
        assert_eq!(h.service.lookup(FETCH_ID).unwrap().minimum_fetch_interval, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_after_window_replaces_registration() {
        let h = Harness::new();
        h.service.configure(BackgroundFetchConfig::default()).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        let status = h
            .service
            .configure(BackgroundFetchConfig {
                minimum_fetch_interval: Some(60),
                ..BackgroundFetchConfig::default()
            })
            .await
            .unwrap();

        assert_eq!(status, Some(BackgroundFetchStatus::Available));
        assert_eq!(h.scheduler.stopped_task_ids(), vec![FETCH_ID.to_string()]);
        assert_eq!(h.scheduler.works().len(), 1);
        assert_eq!(h.scheduler.works()[0].repeat_cycle_time, Some(3_600_000));
        assert_eq!(h.service.lookup(FETCH_ID).unwrap().minimum_fetch_interval, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_recovers_lost_fetch_work() {
        let h = Harness::new();
        h.service.configure(BackgroundFetchConfig::default()).await.unwrap();
        h.scheduler.seed(vec![outstanding_work("other")]);
        tokio::time::advance(Duration::from_secs(2)).await;

        let status = h.service.configure(BackgroundFetchConfig::default()).await.unwrap();

        assert_eq!(status, Some(BackgroundFetchStatus::Available));
        assert!(h.scheduler.works().iter().any(|w| w.is_task(FETCH_ID)));
        assert!(h.scheduler.works().iter().any(|w| w.is_task("other")));
        assert!(h.service.lookup(FETCH_ID).is_some());
        assert_eq!(h.service.start().await.unwrap(), BackgroundFetchStatus::Available);
        assert_eq!(
            h.scheduler.started_task_ids(),
            vec![FETCH_ID.to_string(), FETCH_ID.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let h = Harness::new();

        h.service.start().await.unwrap();
        h.service.start().await.unwrap();

        assert_eq!(h.scheduler.started_task_ids(), vec![FETCH_ID.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_one_shot_task_floor_applied() {
        let h = Harness::new();

        assert!(h.service.schedule_task(one_shot("sync", 5_000)).await.unwrap());

        let work = &h.scheduler.works()[0];
        assert_eq!(work.repeat_cycle_time, Some(1_200_000));
        assert_eq!(work.repeat_count, Some(1));
        assert_eq!(work.is_repeat, Some(false));
        assert!(h.service.lookup("sync").is_some());
        assert_eq!(h.service.active_tasks(), vec!["sync".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_task_dedupe() {
        let h = Harness::new();
        assert!(h.service.schedule_task(one_shot("sync", 0)).await.unwrap());
        assert!(!h.service.schedule_task(one_shot("sync", 0)).await.unwrap());
        assert_eq!(h.scheduler.started_task_ids().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_task_cancels_then_starts() {
        let h = Harness::new();
        h.service.schedule_task(one_shot("sync", 0)).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        let periodic = TaskConfig {
            periodic: Some(true),
            delay: Some(3_600_000),
            constraints: TaskConstraints {
                requires_charging: Some(true),
                ..TaskConstraints::default()
            },
            ..TaskConfig::new("sync")
        };
        h.service.schedule_task(periodic).await.unwrap();

        assert_eq!(h.scheduler.stopped_task_ids(), vec!["sync".to_string()]);
        assert_eq!(h.scheduler.works().len(), 1);
        let work = &h.scheduler.works()[0];
        assert_eq!(work.is_repeat, Some(true));
        assert_eq!(work.is_charging, Some(true));
        assert!(h.service.lookup("sync").unwrap().periodic);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_tolerates_missing_host_status() {
        let h = Harness::new();
        h.service.schedule_task(one_shot("sync", 0)).await.unwrap();
        h.scheduler.seed(Vec::new());
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(h.service.schedule_task(one_shot("sync", 0)).await.unwrap());
        assert_eq!(h.scheduler.works().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_eviction_spares_fetch_task() {
        let h = Harness::new();
        h.service.configure(BackgroundFetchConfig::default()).await.unwrap();
        for i in 0..9 {
            h.service.schedule_task(one_shot(&format!("task-{i}"), 0)).await.unwrap();
        }
        assert_eq!(h.scheduler.works().len(), 10);

        h.service.schedule_task(one_shot("overflow", 0)).await.unwrap();

        assert_eq!(h.scheduler.stopped_task_ids(), vec!["task-0".to_string()]);
        assert_eq!(h.scheduler.works().len(), 10);
        assert!(h.service.lookup(FETCH_ID).is_some());
        assert!(h.service.lookup("task-0").is_none());
        assert!(h.service.lookup("overflow").is_some());
        assert!(!h.service.active_tasks().contains(&"task-0".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_defaults_to_fetch_task() {
        let h = Harness::new();
        h.service.configure(BackgroundFetchConfig::default()).await.unwrap();
        h.service.schedule_task(one_shot("sync", 0)).await.unwrap();

        assert!(h.service.stop(None).await.unwrap());

        assert_eq!(h.scheduler.stopped_task_ids(), vec![FETCH_ID.to_string()]);
        assert!(h.service.lookup(FETCH_ID).is_none());
        assert_eq!(h.service.active_tasks(), vec!["sync".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_named_task() {
        let h = Harness::new();
        h.service.schedule_task(one_shot("sync", 0)).await.unwrap();
        h.service.schedule_task(one_shot("upload", 0)).await.unwrap();

        h.service.stop(Some("sync")).await.unwrap();

        assert_eq!(h.scheduler.stopped_task_ids(), vec!["sync".to_string()]);
        assert_eq!(h.service.active_tasks(), vec!["upload".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_empty_host_clears_everything() {
        let h = Harness::new();
        h.service.configure(BackgroundFetchConfig::default()).await.unwrap();
        h.service.schedule_task(one_shot("sync", 0)).await.unwrap();
        h.scheduler.seed(Vec::new());

        assert!(h.service.stop(Some("sync")).await.unwrap());

        assert!(h.service.lookup(FETCH_ID).is_none());
        assert!(h.service.lookup("sync").is_none());
        assert!(h.service.active_tasks().is_empty());
        // timestamps are gone too: an immediate reconfigure is not deduped
        assert!(h.service.schedule_task(one_shot("sync", 0)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_surfaces_host_failure() {
        let h = Harness::new();
        h.scheduler
            .fail_on("obtainAllWorks", HostError::new(9700003, "system service failed"));

        let result = h.service.stop(None).await;
        assert!(matches!(
            result,
            Err(BackgroundFetchError::Host { op: "obtainAllWorks", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_uses_host_permission_state() {
        let h = Harness::new();
        assert_eq!(h.service.status().await, BackgroundFetchStatus::Available);

        h.scheduler.set_status(BackgroundFetchStatus::Denied);
        assert_eq!(h.service.status().await, BackgroundFetchStatus::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_one_shot_leaves_active_list() {
        let h = Harness::new();
        h.service.schedule_task(one_shot("sync", 5_000)).await.unwrap();
        h.service.relay().handle_event(&fetch_event_data("sync")).unwrap();
        assert!(h.service.has_pending_timeout("sync"));

        h.service.finish(Some("sync"));

        assert!(!h.service.has_pending_timeout("sync"));
        assert!(h.service.active_tasks().is_empty());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.emitter.fetch_events(), vec![FetchEvent::delivered("sync")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_fetch_task_stays_active() {
        let h = Harness::new();
        h.service.configure(BackgroundFetchConfig::default()).await.unwrap();
        h.service.relay().handle_event(&fetch_event_data(FETCH_ID)).unwrap();

        h.service.finish(None);

        assert!(!h.service.has_pending_timeout(FETCH_ID));
        assert_eq!(h.service.active_tasks(), vec![FETCH_ID.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_unknown_task_only_disarms_timer() {
        let h = Harness::new();
        h.service.schedule_task(one_shot("sync", 0)).await.unwrap();
        h.service.relay().handle_event(&fetch_event_data("ghost")).unwrap();

        h.service.finish(Some("ghost"));

        assert!(!h.service.has_pending_timeout("ghost"));
        assert_eq!(h.service.active_tasks(), vec!["sync".to_string()]);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.emitter.fetch_events(), vec![FetchEvent::delivered("ghost")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disarms_pending_timeout() {
        let h = Harness::new();
        h.service.schedule_task(one_shot("sync", 0)).await.unwrap();
        h.service.schedule_task(one_shot("other", 0)).await.unwrap();
        h.service.relay().handle_event(&fetch_event_data("sync")).unwrap();

        h.service.stop(Some("sync")).await.unwrap();

        assert!(h.service.lookup("sync").is_none());
        assert!(!h.service.has_pending_timeout("sync"));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.emitter.fetch_events(), vec![FetchEvent::delivered("sync")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_empty_host_disarms_all_timeouts() {
        let h = Harness::new();
        h.service.schedule_task(one_shot("sync", 0)).await.unwrap();
        h.service.relay().handle_event(&fetch_event_data("sync")).unwrap();
        h.service.relay().handle_event(&fetch_event_data("upload")).unwrap();
        h.scheduler.seed(Vec::new());

        h.service.stop(None).await.unwrap();

        assert!(h.service.relay().pending_timeouts().is_empty());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(h.emitter.fetch_events().iter().all(|event| !event.timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_one_task_keeps_other_timeouts() {
        let h = Harness::new();
        h.service.schedule_task(one_shot("a", 0)).await.unwrap();
        h.service.schedule_task(one_shot("b", 0)).await.unwrap();
        h.service.relay().handle_event(&fetch_event_data("a")).unwrap();
        h.service.relay().handle_event(&fetch_event_data("b")).unwrap();

        h.service.finish(Some("b"));
        tokio::time::sleep(Duration::from_millis(60_001)).await;

        let timeouts: Vec<_> = h
            .emitter
            .fetch_events()
            .into_iter()
            .filter(|event| event.timeout)
            .collect();
        assert_eq!(timeouts, vec![FetchEvent::timed_out("a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_errors_do_not_leave_partial_state() {
        let h = Harness::new();
        h.scheduler
            .fail_on("startWork", HostError::new(9700001, "memory operation failed"));

        let result = h.service.schedule_task(one_shot("sync", 0)).await;

        assert!(result.is_err());
        assert!(h.service.lookup("sync").is_none());
        assert!(h.service.active_tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_state() {
        let h = Harness::new();
        h.service.schedule_task(one_shot("sync", 0)).await.unwrap();
        h.service.relay().handle_event(&fetch_event_data("sync")).unwrap();

        h.service.shutdown();

        assert!(h.service.lookup("sync").is_none());
        assert!(!h.service.has_pending_timeout("sync"));
        assert!(!h.service.relay().is_subscribed());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = Harness::try_with_settings(BridgeSettings {
            max_works: 0,
            ..BridgeSettings::default()
        });
        assert!(matches!(result, Err(BackgroundFetchError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_hooks_are_noops() {
        let h = Harness::new();
        h.service.add_listener();
        h.service.remove_listeners();
        assert!(h.scheduler.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unknown_task_leaves_others() {
        let h = Harness::new();
        h.scheduler.seed(vec![outstanding_work("sync")]);

        h.service.stop(Some("absent")).await.unwrap();

        assert!(h.scheduler.stopped_task_ids().is_empty());
        assert!(h
            .scheduler
            .calls()
            .iter()
            .all(|call| !matches!(call, HostCall::StopWork(_))));
    }
}
