//! 调度器
//!
//! 作业的提交、取消与状态查询，以及推进作业状态的任务管理器、
//! 定时计划和主机配置回调。

pub mod blocking;
pub mod callback;
pub mod capacity;
pub mod controller;
pub mod dependencies;
pub mod notifier;
pub mod schedules;
pub mod service;
pub mod task_manager;

pub use callback::{HostCallbackService, HostResolver, SystemResolver};
pub use capacity::system_capacity;
pub use controller::{HostCounters, JobController, JobStatusReport, LaunchResult};
pub use notifier::{LogNotifier, Notifier};
pub use schedules::ScheduleService;
pub use service::DispatcherService;
pub use task_manager::{CycleReport, TaskManager};
