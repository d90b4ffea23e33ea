use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_core::config::DispatcherConfig;
use conductor_core::models::{queues, Message, MessageType};
use conductor_core::{ConductorResult, MessageQueue};
use conductor_domain::InventoryService;
use conductor_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::controller::JobController;
use crate::schedules::ScheduleService;
use crate::task_manager::TaskManager;

/// 调度器主循环
///
/// 按配置周期运行任务管理器与定时计划，并处理 default、callback_tasks
/// 两个队列上的后台请求。
pub struct DispatcherService {
    config: DispatcherConfig,
    task_manager: Arc<TaskManager>,
    schedules: Arc<ScheduleService>,
    controller: Arc<JobController>,
    inventory: Arc<InventoryService>,
    queue: Arc<dyn MessageQueue>,
    metrics: Arc<MetricsCollector>,
}

impl DispatcherService {
    pub fn new(
        config: DispatcherConfig,
        task_manager: Arc<TaskManager>,
        schedules: Arc<ScheduleService>,
        controller: Arc<JobController>,
        inventory: Arc<InventoryService>,
        queue: Arc<dyn MessageQueue>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            task_manager,
            schedules,
            controller,
            inventory,
            queue,
            metrics,
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> ConductorResult<()> {
        for queue in queues::ALL {
            self.queue.create_queue(queue).await?;
        }
        info!(
            "调度器启动: 容量 {}, 调度间隔 {}s, 计划检查间隔 {}s",
            self.task_manager.capacity(),
            self.config.schedule_interval_seconds,
            self.config.schedule_tick_seconds
        );

        let mut cycle_interval =
            tokio::time::interval(Duration::from_secs(self.config.schedule_interval_seconds));
        let mut tick_interval =
            tokio::time::interval(Duration::from_secs(self.config.schedule_tick_seconds));

        loop {
            tokio::select! {
                _ = cycle_interval.tick() => {
                    self.background_requests().await;
                    if let Err(e) = self.task_manager.run_cycle().await {
                        StructuredLogger::log_system_error("dispatcher", "run_cycle", &e);
                    }
                    self.report_queue_depth().await;
                }
                _ = tick_interval.tick() => {
                    if let Err(e) = self.schedules.tick(Utc::now()).await {
                        StructuredLogger::log_system_error("dispatcher", "schedule_tick", &e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("调度器收到停止信号");
                    break;
                }
            }
        }

        info!("调度器已停止");
        Ok(())
    }

    /// 处理清单重算与主机回调请求
    pub async fn background_requests(&self) {
        match self.queue.consume_messages(queues::DEFAULT).await {
            Ok(messages) => {
                for message in messages {
                    self.handle_message(message).await;
                }
            }
            Err(e) => StructuredLogger::log_system_error("dispatcher", "consume_default", &e),
        }
        match self.queue.consume_messages(queues::CALLBACK_TASKS).await {
            Ok(messages) => {
                for message in messages {
                    self.handle_message(message).await;
                }
            }
            Err(e) => StructuredLogger::log_system_error("dispatcher", "consume_callback", &e),
        }
    }

    async fn handle_message(&self, message: Message) {
        match message.message_type {
            MessageType::InventoryRecompute { inventory_id } => {
                if let Err(e) = self.inventory.update_computed_fields(inventory_id).await {
                    StructuredLogger::log_system_error("dispatcher", "inventory_recompute", &e);
                }
            }
            MessageType::HostCallback {
                template_id,
                host_name,
            } => match self.controller.launch_callback(template_id, &host_name).await {
                Ok(result) => debug!("主机 {} 回调已创建作业 {}", host_name, result.job_id),
                Err(e) => warn!("主机 {} 回调模板 {} 失败: {}", host_name, template_id, e),
            },
            other => warn!("后台队列收到无法处理的消息: {:?}", other),
        }
    }

    async fn report_queue_depth(&self) {
        for queue in [queues::JOBS, queues::SCHEDULER] {
            if let Ok(depth) = self.queue.get_queue_size(queue).await {
                self.metrics.update_queue_depth(queue, depth);
            }
        }
    }
}
