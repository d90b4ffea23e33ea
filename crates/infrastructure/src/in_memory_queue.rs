use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::{models::Message, ConductorError, ConductorResult, MessageQueue};
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

/// 内存消息队列实现
///
/// 使用 Tokio channels 实现，调度器与 worker 运行在同一进程时使用。
/// 通过信号量做背压控制，队列满时发布方等待到超时为止。
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    /// 队列存储：队列名 -> 通道
    queues: Arc<RwLock<HashMap<String, Arc<QueueChannels>>>>,
    config: InMemoryQueueConfig,
}

#[derive(Debug)]
struct QueueChannels {
    sender: mpsc::UnboundedSender<Message>,
    /// 多个消费者共享同一个接收端
    receiver: Mutex<mpsc::UnboundedReceiver<Message>>,
    size: AtomicU32,
    backpressure: Semaphore,
}

impl QueueChannels {
    /// 取出一条消息后归还许可
    fn on_taken(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.size.fetch_sub(count as u32, Ordering::Relaxed);
        self.backpressure.add_permits(count);
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// 单个队列最大积压消息数
    pub max_queue_size: usize,
    /// 背压等待超时时间（毫秒，0 表示一直等待）
    pub backpressure_timeout_ms: u64,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            backpressure_timeout_ms: 5000,
        }
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_config(InMemoryQueueConfig::default())
    }

    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        debug!("创建内存消息队列: {:?}", config);
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// 获取或创建队列通道
    async fn channels(&self, queue: &str) -> Arc<QueueChannels> {
        if let Some(channels) = self.queues.read().await.get(queue) {
            return channels.clone();
        }

        let mut queues = self.queues.write().await;
        queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                debug!("创建队列: {}", queue);
                let (sender, receiver) = mpsc::unbounded_channel();
                Arc::new(QueueChannels {
                    sender,
                    receiver: Mutex::new(receiver),
                    size: AtomicU32::new(0),
                    backpressure: Semaphore::new(self.config.max_queue_size.max(1)),
                })
            })
            .clone()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> ConductorResult<()> {
        let channels = self.channels(queue).await;

        let acquired = if self.config.backpressure_timeout_ms > 0 {
            tokio::time::timeout(
                Duration::from_millis(self.config.backpressure_timeout_ms),
                channels.backpressure.acquire(),
            )
            .await
            .map_err(|_| {
                warn!("队列 '{}' 背压超时，消息被拒绝", queue);
                ConductorError::MessageQueue(format!("队列 '{queue}' 背压超时"))
            })?
        } else {
            channels.backpressure.acquire().await
        };
        let permit = acquired
            .map_err(|e| ConductorError::MessageQueue(format!("获取背压许可失败: {e}")))?;

        channels
            .sender
            .send(message.clone())
            .map_err(|e| ConductorError::MessageQueue(format!("发送消息到队列 '{queue}' 失败: {e}")))?;

        // 许可在消息被取出时归还
        permit.forget();
        channels.size.fetch_add(1, Ordering::Relaxed);

        debug!(
            "发布消息 {} ({}) 到队列 '{}'",
            message.id,
            message.message_type_str(),
            queue
        );
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> ConductorResult<Vec<Message>> {
        let channels = self.channels(queue).await;
        let mut messages = Vec::new();
        {
            let mut rx = channels.receiver.lock().await;
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }
        channels.on_taken(messages.len());

        if !messages.is_empty() {
            debug!("从队列 '{}' 消费 {} 条消息", queue, messages.len());
        }
        Ok(messages)
    }

    async fn receive_message(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> ConductorResult<Option<Message>> {
        let channels = self.channels(queue).await;
        let received = {
            let mut rx = channels.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(message)) => Some(message),
                Ok(None) => {
                    return Err(ConductorError::MessageQueue(format!("队列 '{queue}' 已关闭")))
                }
                Err(_) => None,
            }
        };
        if received.is_some() {
            channels.on_taken(1);
        }
        Ok(received)
    }

    async fn create_queue(&self, queue: &str) -> ConductorResult<()> {
        self.channels(queue).await;
        info!("队列 '{}' 已就绪", queue);
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> ConductorResult<u32> {
        let queues = self.queues.read().await;
        queues
            .get(queue)
            .map(|channels| channels.size.load(Ordering::Relaxed))
            .ok_or_else(|| ConductorError::MessageQueue(format!("队列 '{queue}' 不存在")))
    }

    async fn purge_queue(&self, queue: &str) -> ConductorResult<()> {
        let purged = self.consume_messages(queue).await?.len();
        info!("清空队列 '{}'，丢弃 {} 条消息", queue, purged);
        Ok(())
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::models::{queues, JobStatus, MessageType};

    #[tokio::test]
    async fn test_create_and_publish_message() {
        let queue = InMemoryMessageQueue::new();
        queue.create_queue(queues::JOBS).await.unwrap();

        let message = Message::job_dispatch(1);
        queue.publish_message(queues::JOBS, &message).await.unwrap();
        assert_eq!(queue.get_queue_size(queues::JOBS).await.unwrap(), 1);

        let messages = queue.consume_messages(queues::JOBS).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, message.id);
        assert_eq!(queue.get_queue_size(queues::JOBS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_multiple_queues() {
        let queue = InMemoryMessageQueue::new();
        let dispatch = Message::job_dispatch(1);
        let completed = Message::job_completed(1, JobStatus::Successful);

        queue.publish_message(dispatch.queue(), &dispatch).await.unwrap();
        queue.publish_message(completed.queue(), &completed).await.unwrap();

        let jobs = queue.consume_messages(queues::JOBS).await.unwrap();
        let scheduler = queue.consume_messages(queues::SCHEDULER).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(
            scheduler[0].message_type,
            MessageType::JobCompleted {
                job_id: 1,
                status: JobStatus::Successful
            }
        );
    }

    #[tokio::test]
    async fn test_receive_message_timeout() {
        let queue = InMemoryMessageQueue::new();
        let received = queue
            .receive_message(queues::JOBS, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(received.is_none());

        queue
            .publish_message(queues::JOBS, &Message::job_dispatch(7))
            .await
            .unwrap();
        let received = queue
            .receive_message(queues::JOBS, Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message_type, MessageType::JobDispatch { job_id: 7 });
    }

    #[tokio::test]
    async fn test_purge_queue() {
        let queue = InMemoryMessageQueue::new();
        for i in 0..5 {
            queue
                .publish_message(queues::DEFAULT, &Message::inventory_recompute(i))
                .await
                .unwrap();
        }
        assert_eq!(queue.get_queue_size(queues::DEFAULT).await.unwrap(), 5);

        queue.purge_queue(queues::DEFAULT).await.unwrap();
        assert_eq!(queue.get_queue_size(queues::DEFAULT).await.unwrap(), 0);
        assert!(queue.consume_messages(queues::DEFAULT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backpressure_rejects_when_full() {
        let queue = InMemoryMessageQueue::with_config(InMemoryQueueConfig {
            max_queue_size: 1,
            backpressure_timeout_ms: 10,
        });
        queue
            .publish_message(queues::JOBS, &Message::job_dispatch(1))
            .await
            .unwrap();
        let err = queue
            .publish_message(queues::JOBS, &Message::job_dispatch(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::MessageQueue(_)));

        queue.consume_messages(queues::JOBS).await.unwrap();
        queue
            .publish_message(queues::JOBS, &Message::job_dispatch(3))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_queue_size_is_error() {
        let queue = InMemoryMessageQueue::new();
        assert!(queue.get_queue_size("missing").await.is_err());
    }
}
