use std::sync::Arc;

use anyhow::{Context, Result};
use conductor_core::{AppConfig, MessageQueue, Repositories, TriggerContext};
use conductor_dispatcher::{
    system_capacity, DispatcherService, JobController, LogNotifier, ScheduleService, TaskManager,
};
use conductor_domain::{ActivityRecorder, EventIngestor, InventoryService, RoleService, Vault};
use conductor_infrastructure::{InMemoryMessageQueue, MetricsCollector, SqliteStore};
use conductor_worker::{JobExecutor, WorkerService};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行调度器
    Dispatcher,
    /// 仅运行Worker
    Worker,
    /// 运行所有组件
    All,
}

impl AppMode {
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "dispatcher" => Some(AppMode::Dispatcher),
            "worker" => Some(AppMode::Worker),
            "all" => Some(AppMode::All),
            _ => None,
        }
    }

    fn runs_dispatcher(&self) -> bool {
        matches!(self, AppMode::Dispatcher | AppMode::All)
    }

    fn runs_worker(&self) -> bool {
        matches!(self, AppMode::Worker | AppMode::All)
    }
}

/// 主应用程序
///
/// 持有数据库、队列与各组件共享的服务实例。命令行的一次性命令只用到
/// `controller()`，`run` 按模式启动调度器和Worker。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    store: SqliteStore,
    repos: Repositories,
    queue: Arc<dyn MessageQueue>,
    vault: Arc<Vault>,
    inventory: Arc<InventoryService>,
    ingestor: Arc<EventIngestor>,
    controller: Arc<JobController>,
    metrics: Arc<MetricsCollector>,
}

impl Application {
    /// 连接配置中的数据库并创建应用实例
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let store = SqliteStore::connect(&config.database)
            .await
            .with_context(|| format!("连接数据库失败: {}", config.database.url))?;

        Ok(Self::with_store(config, mode, store))
    }

    /// 使用已打开的存储组装各服务
    pub fn with_store(config: AppConfig, mode: AppMode, store: SqliteStore) -> Self {
        let repos = store.repositories();
        let triggers = Arc::new(TriggerContext::new());
        let queue: Arc<dyn MessageQueue> = Arc::new(InMemoryMessageQueue::new());
        let metrics = Arc::new(MetricsCollector::new());

        let vault = Arc::new(Vault::new(&config.security.secret_key));
        let roles = Arc::new(RoleService::new(repos.roles.clone()));
        let inventory = Arc::new(InventoryService::new(
            repos.inventories.clone(),
            triggers.clone(),
        ));
        let ingestor = Arc::new(EventIngestor::new(repos.clone(), inventory.clone()));

        let controller = Arc::new(JobController::new(
            repos.clone(),
            vault.clone(),
            roles,
            ActivityRecorder::new(repos.activity.clone(), triggers),
            ingestor.clone(),
            queue.clone(),
            metrics.clone(),
        ));

        Self {
            config,
            mode,
            store,
            repos,
            queue,
            vault,
            inventory,
            ingestor,
            controller,
            metrics,
        }
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn controller(&self) -> Arc<JobController> {
        self.controller.clone()
    }

    pub fn queue(&self) -> Arc<dyn MessageQueue> {
        self.queue.clone()
    }

    /// 按模式运行各组件，直到收到停止信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.store.health_check().await.context("数据库健康检查失败")?;

        let mut handles: Vec<(&'static str, JoinHandle<conductor_core::ConductorResult<()>>)> =
            Vec::new();

        if self.mode.runs_dispatcher() && self.config.dispatcher.enabled {
            let dispatcher = self.dispatcher_service();
            let rx = shutdown_rx.resubscribe();
            handles.push((
                "dispatcher",
                tokio::spawn(async move { dispatcher.run(rx).await }),
            ));
        }

        if self.mode.runs_worker() && self.config.worker.enabled {
            let worker = self.worker_service();
            let rx = shutdown_rx.resubscribe();
            handles.push(("worker", tokio::spawn(async move { worker.run(rx).await })));
        }

        if handles.is_empty() {
            return Err(anyhow::anyhow!(
                "模式 {:?} 下没有启用的组件，请检查配置",
                self.mode
            ));
        }

        info!("已启动 {} 个组件", handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => info!("组件 {} 已停止", name),
                Ok(Err(e)) => error!("组件 {} 运行失败: {}", name, e),
                Err(e) => error!("组件 {} 异常退出: {}", name, e),
            }
        }

        self.store.close().await;
        Ok(())
    }

    fn dispatcher_service(&self) -> DispatcherService {
        let capacity = system_capacity(self.config.dispatcher.capacity_override);
        let task_manager = Arc::new(
            TaskManager::new(
                self.repos.clone(),
                self.queue.clone(),
                self.inventory.clone(),
                self.ingestor.clone(),
                self.metrics.clone(),
                capacity,
            )
            .with_notifier(Arc::new(LogNotifier)),
        );
        let schedules = Arc::new(ScheduleService::new(
            self.repos.clone(),
            self.controller.clone(),
        ));

        DispatcherService::new(
            self.config.dispatcher.clone(),
            task_manager,
            schedules,
            self.controller.clone(),
            self.inventory.clone(),
            self.queue.clone(),
            self.metrics.clone(),
        )
    }

    fn worker_service(&self) -> WorkerService {
        let executor = Arc::new(JobExecutor::new(
            self.repos.clone(),
            self.vault.clone(),
            self.ingestor.clone(),
            self.inventory.clone(),
            self.config.worker.clone(),
            self.config.sandbox.clone(),
        ));

        WorkerService::builder(
            self.config.worker.worker_id.clone(),
            self.queue.clone(),
            executor,
            self.repos.clone(),
        )
        .max_concurrent_jobs(self.config.worker.max_concurrent_jobs)
        .poll_interval_ms(self.config.worker.poll_interval_ms)
        .metrics(self.metrics.clone())
        .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(AppMode::parse("all"), Some(AppMode::All));
        assert_eq!(AppMode::parse("worker"), Some(AppMode::Worker));
        assert_eq!(AppMode::parse("api"), None);
        assert!(AppMode::All.runs_dispatcher() && AppMode::All.runs_worker());
        assert!(!AppMode::Worker.runs_dispatcher());
    }
}
