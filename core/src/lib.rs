// Background Fetch Bridge: core
//
// Exposes background task scheduling to the cross-platform application layer
// by translating its task configuration contract into host work-scheduler
// descriptors and relaying the host's fetch events back out.
//
// Nothing here schedules, persists or retries on its own. The host does that.

pub mod fetch;
pub mod host;
pub mod settings;

// Mobile bridge module (UniFFI surface)
pub mod mobile_bridge;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

use thiserror::Error;

pub use fetch::{
    parse_task_id, work_id_for, BackgroundFetchConfig, BackgroundFetchService, FetchEvent,
    FetchEventRelay, HostConstraints, NetworkType, SchedulerAdapter, SharedRegistry, TaskConfig,
    TaskConstraints, TaskRecord, TaskRegistry,
};
pub use host::{
    BatteryStatus, CommonEventData, CommonEventHub, DeviceEventEmitter, EventSink, HostContext,
    HostError, HostNetworkType, StorageRequest, WorkInfo, WorkScheduler, TASK_ID_PARAM,
};
pub use mobile_bridge::*;
pub use settings::{BridgeSettings, SettingsError};

uniffi::setup_scaffolding!();

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors surfaced by the scheduler adapter, the event relay and the service.
///
/// The UniFFI boundary turns these into the caller's failure callback; they
/// never cross it as panics.
#[derive(Debug, Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum BackgroundFetchError {
    #[error("host {op} failed: {source}")]
    Host {
        op: &'static str,
        source: HostError,
    },
    #[error("Event subscriber unavailable")]
    SubscriberUnavailable,
    #[error("Malformed fetch event: {0}")]
    MalformedEvent(String),
    #[error("Host work capacity exhausted ({0} outstanding, none evictable)")]
    CapacityExhausted(usize),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Background fetch module shut down")]
    ShutDown,
}

impl BackgroundFetchError {
    pub(crate) fn host(op: &'static str) -> impl FnOnce(HostError) -> Self {
        move |source| BackgroundFetchError::Host { op, source }
    }
}

impl From<SettingsError> for BackgroundFetchError {
    fn from(err: SettingsError) -> Self {
        BackgroundFetchError::InvalidConfig(err.to_string())
    }
}

// ============================================================================
// DATA TYPES
// ============================================================================

/// Availability of background fetch as reported to the application layer.
///
/// The numeric codes (see [`BackgroundFetchStatus::code`]) are the ones the
/// JavaScript API exposes as `STATUS_RESTRICTED`, `STATUS_DENIED` and
/// `STATUS_AVAILABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, uniffi::Enum)]
pub enum BackgroundFetchStatus {
    /// Unavailable and the user cannot enable it (e.g. parental controls)
    Restricted,
    /// The user disabled background behaviour for this app or system-wide
    Denied,
    /// Available and enabled
    Available,
}

impl BackgroundFetchStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Restricted => 0,
            Self::Denied => 1,
            Self::Available => 2,
        }
    }
}

impl std::fmt::Display for BackgroundFetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restricted => write!(f, "Restricted"),
            Self::Denied => write!(f, "Denied"),
            Self::Available => write!(f, "Available"),
        }
    }
}

// ============================================================================
// LOGGING
// ============================================================================

/// Install the `tracing` subscriber (idempotent).
///
/// Honors `RUST_LOG`; defaults to `info`.
#[uniffi::export]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
