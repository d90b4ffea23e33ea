//! 作业执行节点
//!
//! 领取调度器放行的作业，生成执行器命令并在沙箱中运行，解析输出中的
//! 事件写入事件表，最后回写作业状态。

pub mod executor;
pub mod inventory_import;
pub mod output;
pub mod runner;
pub mod sandbox;
pub mod service;
pub mod system_jobs;

pub use executor::{ExecutionOutcome, JobExecutor};
pub use inventory_import::{InventoryImporter, ImportSummary};
pub use output::{OutputMultiplexer, Redactor};
pub use runner::{CommandBuilder, RunnerCommand};
pub use sandbox::{SandboxLauncher, SandboxedCommand};
pub use service::{WorkerService, WorkerServiceBuilder};
pub use system_jobs::SystemJobRunner;
