use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 任务管理器调度周期
    pub schedule_interval_seconds: u64,
    /// 定时计划检查周期
    pub schedule_tick_seconds: u64,
    /// 覆盖按内存估算的容量
    pub capacity_override: Option<u32>,
    /// 瞬时错误最大重试次数
    pub max_retry_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule_interval_seconds: 5,
            schedule_tick_seconds: 20,
            capacity_override: None,
            max_retry_attempts: 5,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schedule_interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        if self.schedule_tick_seconds == 0 {
            return Err(anyhow::anyhow!("定时计划检查间隔必须大于0"));
        }

        if let Some(0) = self.capacity_override {
            return Err(anyhow::anyhow!("容量覆盖值必须大于0"));
        }

        if self.max_retry_attempts == 0 {
            return Err(anyhow::anyhow!("最大重试次数必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    pub max_concurrent_jobs: usize,
    pub poll_interval_ms: u64,
    /// playbook 执行器
    pub playbook_runner: String,
    /// 源码更新执行器
    pub project_runner: String,
    /// 云清单同步执行器
    pub inventory_runner: String,
    /// 源码更新使用的 playbook
    pub project_update_playbook: String,
    pub projects_root: String,
    pub joboutput_root: String,
    /// 取消后等待子进程退出的最长时间
    pub cancel_timeout_seconds: u64,
    /// 取消标记轮询间隔
    pub cancel_poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id: "worker-001".to_string(),
            max_concurrent_jobs: 4,
            poll_interval_ms: 500,
            playbook_runner: "ansible-playbook".to_string(),
            project_runner: "ansible-playbook".to_string(),
            inventory_runner: "ansible-inventory".to_string(),
            project_update_playbook: "/usr/share/conductor/playbooks/project_update.yml".to_string(),
            projects_root: "/var/lib/conductor/projects".to_string(),
            joboutput_root: "/var/lib/conductor/job_status".to_string(),
            cancel_timeout_seconds: 60,
            cancel_poll_interval_ms: 500,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }

        if self.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("最大并发作业数必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.playbook_runner.is_empty() {
            return Err(anyhow::anyhow!("playbook执行器不能为空"));
        }

        if self.projects_root.is_empty() || self.joboutput_root.is_empty() {
            return Err(anyhow::anyhow!("项目目录和作业输出目录不能为空"));
        }

        if self.cancel_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("取消超时时间必须大于0"));
        }

        Ok(())
    }
}
