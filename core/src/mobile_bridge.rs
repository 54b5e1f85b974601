// Mobile bridge: UniFFI surface of the background fetch service
//
// The native host implements the collaborator traits in its own language and
// calls into `BackgroundFetchModule`. Host callbacks arrive on arbitrary
// threads that are not inside a tokio context, so the module owns a runtime
// and every async operation runs on it.

use crate::fetch::{BackgroundFetchConfig, BackgroundFetchService, TaskConfig};
use crate::host::{CommonEventHub, DeviceEventEmitter, HostContext, HostError, WorkInfo, WorkScheduler};
use crate::settings::BridgeSettings;
use crate::{init_logging, BackgroundFetchError, BackgroundFetchStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

// ============================================================================
// FOREIGN HOST SCHEDULER
// ============================================================================

/// Host work scheduler as the native layer implements it.
///
/// Calls may block; they are always made off the runtime's worker threads.
#[uniffi::export(with_foreign)]
pub trait HostWorkScheduler: Send + Sync {
    fn start_work(&self, work: WorkInfo) -> Result<(), HostError>;
    fn stop_work(&self, work: WorkInfo, need_cancel: bool) -> Result<(), HostError>;
    fn get_work_status(&self, work_id: u32) -> Result<WorkInfo, HostError>;
    fn obtain_all_works(&self) -> Result<Vec<WorkInfo>, HostError>;
    /// Return `Available` when the host has no permission query
    fn background_status(&self) -> Result<BackgroundFetchStatus, HostError>;
}

/// Adapts a blocking [`HostWorkScheduler`] to the async [`WorkScheduler`]
pub struct ForeignWorkScheduler {
    host: Arc<dyn HostWorkScheduler>,
}

impl ForeignWorkScheduler {
    pub fn new(host: Arc<dyn HostWorkScheduler>) -> Self {
        Self { host }
    }

    async fn call<T, F>(&self, f: F) -> Result<T, HostError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HostWorkScheduler) -> Result<T, HostError> + Send + 'static,
    {
        let host = self.host.clone();
        tokio::task::spawn_blocking(move || f(host.as_ref()))
            .await
            .map_err(|err| HostError::new(-1, format!("host call aborted: {}", err)))?
    }
}

#[async_trait]
impl WorkScheduler for ForeignWorkScheduler {
    async fn start_work(&self, work: WorkInfo) -> Result<(), HostError> {
        self.call(move |host| host.start_work(work)).await
    }

    async fn stop_work(&self, work: WorkInfo, need_cancel: bool) -> Result<(), HostError> {
        self.call(move |host| host.stop_work(work, need_cancel)).await
    }

    async fn get_work_status(&self, work_id: u32) -> Result<WorkInfo, HostError> {
        self.call(move |host| host.get_work_status(work_id)).await
    }

    async fn obtain_all_works(&self) -> Result<Vec<WorkInfo>, HostError> {
        self.call(|host| host.obtain_all_works()).await
    }

    async fn background_status(&self) -> Result<BackgroundFetchStatus, HostError> {
        self.call(|host| host.background_status()).await
    }
}

// ============================================================================
// CALLER CALLBACKS
// ============================================================================

/// Completion of operations resolving to a status
#[uniffi::export(with_foreign)]
pub trait StatusCallback: Send + Sync {
    fn on_success(&self, status: BackgroundFetchStatus);
    fn on_failure(&self, message: String);
}

/// Completion of operations resolving to a flag
#[uniffi::export(with_foreign)]
pub trait BooleanCallback: Send + Sync {
    fn on_success(&self, value: bool);
    fn on_failure(&self, message: String);
}

// ============================================================================
// MODULE
// ============================================================================

/// Background fetch module handed to the native host.
///
/// Every operation returns immediately; results arrive through the callback.
/// Failures are logged and reported through `on_failure`, never raised.
#[derive(uniffi::Object)]
pub struct BackgroundFetchModule {
    service: Arc<BackgroundFetchService>,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
}

#[uniffi::export]
impl BackgroundFetchModule {
    /// Create the module, its runtime and the host event subscriber.
    ///
    /// `settings_json` overrides [`BridgeSettings`] fields; `None` keeps the
    /// defaults.
    #[uniffi::constructor]
    pub fn new(
        context: HostContext,
        settings_json: Option<String>,
        scheduler: Arc<dyn HostWorkScheduler>,
        events: Arc<dyn CommonEventHub>,
        emitter: Arc<dyn DeviceEventEmitter>,
    ) -> Result<Arc<Self>, BackgroundFetchError> {
        init_logging();

        let settings = match settings_json {
            Some(json) => BridgeSettings::from_json(&json)?,
            None => BridgeSettings::default(),
        };

        // One worker keeps host calls and timer callbacks serialized
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .thread_name("bgfetch-worker")
            .build()
            .map_err(|e| BackgroundFetchError::Runtime(e.to_string()))?;

        let service = BackgroundFetchService::new(
            settings,
            context,
            Arc::new(ForeignWorkScheduler::new(scheduler)),
            events,
            emitter,
        )?;

        tracing::info!("Background fetch module created");
        Ok(Arc::new(Self {
            service: Arc::new(service),
            runtime: Mutex::new(Some(runtime)),
        }))
    }

    /// Configure the periodic fetch task.
    ///
    /// A call deduplicated by the configuration window reports the current
    /// status without touching the host.
    pub fn configure(&self, config: BackgroundFetchConfig, callback: Arc<dyn StatusCallback>) {
        let service = self.service.clone();
        self.spawn_status("configure", callback, async move {
            match service.configure(config).await? {
                Some(status) => Ok(status),
                None => Ok(service.status().await),
            }
        });
    }

    /// Schedule a named task; `false` means the call was deduplicated
    pub fn schedule_task(&self, config: TaskConfig, callback: Arc<dyn BooleanCallback>) {
        let service = self.service.clone();
        self.spawn_boolean("scheduleTask", callback, async move {
            service.schedule_task(config).await
        });
    }

    pub fn start(&self, callback: Arc<dyn StatusCallback>) {
        let service = self.service.clone();
        self.spawn_status("start", callback, async move { service.start().await });
    }

    pub fn stop(&self, task_id: Option<String>, callback: Arc<dyn BooleanCallback>) {
        let service = self.service.clone();
        self.spawn_boolean("stop", callback, async move {
            service.stop(task_id.as_deref()).await
        });
    }

    pub fn status(&self, callback: Arc<dyn StatusCallback>) {
        let service = self.service.clone();
        self.spawn_status("status", callback, async move { Ok(service.status().await) });
    }

    pub fn finish(&self, task_id: Option<String>) {
        self.service.finish(task_id.as_deref());
    }

    pub fn add_listener(&self, _event_name: String) {
        self.service.add_listener();
    }

    pub fn remove_listeners(&self, _count: u32) {
        self.service.remove_listeners();
    }

    /// Currently scheduled task ids, oldest first
    pub fn active_tasks(&self) -> Vec<String> {
        self.service.active_tasks()
    }

    /// Tear down timers, the event pump and the runtime.
    ///
    /// Later operations fail through their callbacks.
    pub fn shutdown(&self) {
        self.service.shutdown();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl BackgroundFetchModule {
    fn handle(&self) -> Result<tokio::runtime::Handle, BackgroundFetchError> {
        self.runtime
            .lock()
            .as_ref()
            .map(|rt| rt.handle().clone())
            .ok_or(BackgroundFetchError::ShutDown)
    }

    fn spawn_status<F>(&self, op: &'static str, callback: Arc<dyn StatusCallback>, fut: F)
    where
        F: Future<Output = Result<BackgroundFetchStatus, BackgroundFetchError>> + Send + 'static,
    {
        let handle = match self.handle() {
            Ok(handle) => handle,
            Err(err) => return callback.on_failure(err.to_string()),
        };

        handle.spawn(async move {
            match fut.await {
                Ok(status) => callback.on_success(status),
                Err(err) => {
                    tracing::error!("{} failed: {}", op, err);
                    callback.on_failure(err.to_string());
                }
            }
        });
    }

    fn spawn_boolean<F>(&self, op: &'static str, callback: Arc<dyn BooleanCallback>, fut: F)
    where
        F: Future<Output = Result<bool, BackgroundFetchError>> + Send + 'static,
    {
        let handle = match self.handle() {
            Ok(handle) => handle,
            Err(err) => return callback.on_failure(err.to_string()),
        };

        handle.spawn(async move {
            match fut.await {
                Ok(value) => callback.on_success(value),
                Err(err) => {
                    tracing::error!("{} failed: {}", op, err);
                    callback.on_failure(err.to_string());
                }
            }
        });
    }
}

impl Drop for BackgroundFetchModule {
    fn drop(&mut self) {
        self.shutdown();
    }
}
