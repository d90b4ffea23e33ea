use async_trait::async_trait;

use crate::{models::Message, ConductorResult};

/// 消息队列抽象接口
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布消息到指定队列
    async fn publish_message(&self, queue: &str, message: &Message) -> ConductorResult<()>;

    /// 从指定队列取出当前积压的全部消息
    async fn consume_messages(&self, queue: &str) -> ConductorResult<Vec<Message>>;

    /// 等待指定队列的下一条消息，超时返回 None
    async fn receive_message(
        &self,
        queue: &str,
        timeout: std::time::Duration,
    ) -> ConductorResult<Option<Message>>;

    /// 创建队列
    async fn create_queue(&self, queue: &str) -> ConductorResult<()>;

    /// 获取队列中的消息数量
    async fn get_queue_size(&self, queue: &str) -> ConductorResult<u32>;

    /// 清空队列
    async fn purge_queue(&self, queue: &str) -> ConductorResult<()>;
}
