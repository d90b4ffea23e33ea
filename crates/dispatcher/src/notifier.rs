use async_trait::async_trait;
use conductor_core::models::{JobStatus, UnifiedJob};
use conductor_core::ConductorResult;
use tracing::{info, warn};

/// 作业结束通知
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, job: &UnifiedJob) -> ConductorResult<()>;

    fn name(&self) -> &str;
}

/// 将作业结果写入日志
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, job: &UnifiedJob) -> ConductorResult<()> {
        match job.status {
            JobStatus::Successful => info!(
                job.id = job.id,
                job.name = %job.name,
                elapsed = ?job.elapsed_seconds(),
                "作业 {} 执行成功",
                job.id
            ),
            status => warn!(
                job.id = job.id,
                job.name = %job.name,
                job.explanation = %job.job_explanation,
                "作业 {} 结束，状态 {}",
                job.id,
                status
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
