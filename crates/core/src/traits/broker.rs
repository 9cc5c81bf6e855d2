use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    models::{DeadLetterEntry, DeadLetterReason, TaskEnvelope, WorkerHeartbeat},
    Result,
};

/// 已投递消息的确认句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckHandle {
    /// 消息来源队列
    pub queue: String,
    /// 代理分配的投递标签，在同一个消费者内唯一
    pub delivery_tag: u64,
    /// 该消息是否曾经投递过但未被确认
    pub redelivered: bool,
}

/// 一次投递：任务信封加确认句柄
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    pub handle: AckHandle,
}

/// 否定确认的处理方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackAction {
    /// 在延迟后以当前信封（包含最新尝试次数）重新入队
    Requeue { delay: Duration },
    /// 写入死信队列，不再投递
    DeadLetter {
        reason: DeadLetterReason,
        error: String,
    },
}

/// 惰性、无限、可重新打开的投递流
///
/// 每次 `next()` 都会挂起直到有消息可用；流结束只意味着底层连接已关闭，
/// 调用方可以重新调用 `consume` 继续消费。
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// 消息代理抽象接口
///
/// 保证至少一次投递：消息在被显式 ack/nack 之前不会从持久队列中移除，
/// 消费者在确认前崩溃会导致重新投递。
#[async_trait]
pub trait Broker: Send + Sync {
    /// 声明任务队列及其死信、重试等附属队列
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// 将任务信封写入队列，代理持久化成功后返回
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<()>;

    /// 打开指定队列的投递流
    async fn consume(&self, queue: &str) -> Result<DeliveryStream>;

    /// 确认消息处理完成，永久移除
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// 否定确认：延迟重新入队或转入死信
    async fn nack(&self, delivery: &Delivery, action: NackAction) -> Result<()>;

    /// 获取队列中待投递的消息数量
    async fn queue_size(&self, queue: &str) -> Result<u32>;

    /// 查看队列的死信记录（不移除）
    async fn dead_letters(&self, queue: &str) -> Result<Vec<DeadLetterEntry>>;

    /// 发布Worker心跳
    async fn publish_heartbeat(&self, queue: &str, heartbeat: &WorkerHeartbeat) -> Result<()>;

    /// 取出当前积压的全部心跳
    async fn drain_heartbeats(&self, queue: &str) -> Result<Vec<WorkerHeartbeat>>;

    /// 连接是否可用
    async fn is_healthy(&self) -> bool;

    /// 关闭连接
    async fn close(&self) -> Result<()>;
}
