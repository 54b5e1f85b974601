//! Background fetch bridging
//!
//! Configuration translation, task bookkeeping, host scheduler adaptation and
//! fetch event relaying, composed by [`BackgroundFetchService`].

pub mod config;
pub mod registry;
pub mod relay;
pub mod scheduler;
pub mod service;

pub use config::{
    work_id_for, BackgroundFetchConfig, HostConstraints, NetworkType, TaskConfig,
    TaskConstraints, TaskRecord, EMPTY_TASK_WORK_ID,
};
pub use registry::{SharedRegistry, TaskRegistry};
pub use relay::{parse_task_id, FetchEvent, FetchEventRelay, FETCH_EVENT_NAME};
pub use scheduler::{floor_repeat_cycle, SchedulerAdapter};
pub use service::BackgroundFetchService;
