use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use notifier_core::{
    models::{DeadLetterEntry, TaskEnvelope, WorkerHeartbeat},
    traits::{AckHandle, Broker, Delivery, DeliveryStream, NackAction},
    NotifierError, Result,
};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

/// 内存消息代理
///
/// 适用于嵌入式部署与测试。语义与RabbitMQ实现保持一致：
/// 投递后在 ack/nack 之前消息处于未确认状态，`recover` 可模拟消费者崩溃后的重新投递。
/// 进程退出后消息不会保留。
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    queues: RwLock<HashMap<String, QueueState>>,
    heartbeats: RwLock<HashMap<String, VecDeque<WorkerHeartbeat>>>,
    heartbeat_ttl: Duration,
    notify: Notify,
    next_tag: AtomicU64,
    closed: AtomicBool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    dead_letters: Vec<DeadLetterEntry>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_heartbeat_ttl(Duration::from_secs(60))
    }

    pub fn with_heartbeat_ttl(heartbeat_ttl: Duration) -> Self {
        info!("创建内存消息代理");
        Self {
            inner: Arc::new(Inner {
                queues: RwLock::new(HashMap::new()),
                heartbeats: RwLock::new(HashMap::new()),
                heartbeat_ttl,
                notify: Notify::new(),
                next_tag: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// 直接写入原始消息体，用于模拟其他生产者写入的无法解码的消息
    pub async fn publish_raw(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.inner.push_ready(queue, body, false).await;
        Ok(())
    }

    /// 将所有未确认消息放回队列头部并标记为重新投递，模拟消费者崩溃
    pub async fn recover(&self, queue: &str) -> usize {
        let recovered = {
            let mut queues = self.inner.queues.write().await;
            let state = queues.entry(queue.to_string()).or_default();
            let mut tags: Vec<u64> = state.unacked.keys().copied().collect();
            tags.sort_unstable();

            let count = tags.len();
            for tag in tags.into_iter().rev() {
                if let Some(mut message) = state.unacked.remove(&tag) {
                    message.redelivered = true;
                    state.ready.push_front(message);
                }
            }
            count
        };

        if recovered > 0 {
            info!("队列 {} 恢复了 {} 条未确认消息", queue, recovered);
            self.inner.notify.notify_waiters();
        }
        recovered
    }

    /// 未确认消息数量
    pub async fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .queues
            .read()
            .await
            .get(queue)
            .map(|state| state.unacked.len())
            .unwrap_or(0)
    }

    /// 关闭后重新开放，模拟代理恢复
    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
        info!("内存消息代理已重新开放");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(NotifierError::BrokerUnavailable(
                "内存消息代理已关闭".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    async fn push_ready(&self, queue: &str, body: Vec<u8>, redelivered: bool) {
        {
            let mut queues = self.queues.write().await;
            queues
                .entry(queue.to_string())
                .or_default()
                .ready
                .push_back(StoredMessage { body, redelivered });
        }
        self.notify.notify_waiters();
    }

    /// 取出下一条可解码的消息并移入未确认集合
    ///
    /// 无法解码的消息直接转入死信，不交给消费者。
    async fn take_next(&self, queue: &str) -> Option<Delivery> {
        let mut queues = self.queues.write().await;
        let state = queues.entry(queue.to_string()).or_default();

        while let Some(message) = state.ready.pop_front() {
            match TaskEnvelope::from_bytes(&message.body) {
                Ok(envelope) => {
                    let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
                    let redelivered = message.redelivered;
                    state.unacked.insert(tag, message);
                    return Some(Delivery {
                        envelope,
                        handle: AckHandle {
                            queue: queue.to_string(),
                            delivery_tag: tag,
                            redelivered,
                        },
                    });
                }
                Err(e) => {
                    warn!("队列 {} 收到无法解码的消息，转入死信: {}", queue, e);
                    state
                        .dead_letters
                        .push(DeadLetterEntry::undecodable(&message.body, e.to_string()));
                }
            }
        }
        None
    }

    async fn settle(&self, handle: &AckHandle) -> Result<StoredMessage> {
        let mut queues = self.queues.write().await;
        queues
            .get_mut(&handle.queue)
            .and_then(|state| state.unacked.remove(&handle.delivery_tag))
            .ok_or_else(|| {
                NotifierError::BrokerUnavailable(format!(
                    "投递标签 {} 在队列 {} 中不存在",
                    handle.delivery_tag, handle.queue
                ))
            })
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.ensure_open()?;
        self.inner
            .queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default();
        debug!("队列 {} 声明成功", queue);
        Ok(())
    }

    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<()> {
        self.ensure_open()?;
        let body = envelope.to_bytes()?;
        self.inner.push_ready(queue, body, false).await;
        debug!("任务 {} 已写入队列 {}", envelope.task_id(), queue);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        self.ensure_open()?;

        let stream = stream::unfold(
            (self.inner.clone(), queue.to_string()),
            |(inner, queue)| async move {
                let delivery = loop {
                    // 先注册通知再检查队列，避免错过检查与等待之间的写入
                    let notified = inner.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    if inner.closed.load(Ordering::SeqCst) {
                        break None;
                    }

                    if let Some(delivery) = inner.take_next(&queue).await {
                        break Some(delivery);
                    }

                    notified.await;
                };
                delivery.map(|delivery| (Ok(delivery), (inner, queue)))
            },
        );

        Ok(stream.boxed())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.ensure_open()?;
        self.inner.settle(&delivery.handle).await?;
        debug!(
            "任务 {} 已确认 (tag={})",
            delivery.envelope.task_id(),
            delivery.handle.delivery_tag
        );
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, action: NackAction) -> Result<()> {
        self.ensure_open()?;
        // 先校验投递标签，确保同一投递只能被处理一次
        self.inner.settle(&delivery.handle).await?;

        match action {
            NackAction::Requeue { delay } => {
                let body = delivery.envelope.to_bytes()?;
                let queue = delivery.handle.queue.clone();

                if delay.is_zero() {
                    self.inner.push_ready(&queue, body, false).await;
                } else {
                    let inner = self.inner.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        inner.push_ready(&queue, body, false).await;
                    });
                }
                debug!(
                    "任务 {} 将在 {:?} 后重新投递",
                    delivery.envelope.task_id(),
                    delay
                );
            }
            NackAction::DeadLetter { reason, error } => {
                let entry = DeadLetterEntry::for_envelope(&delivery.envelope, reason, error);
                self.inner
                    .queues
                    .write()
                    .await
                    .entry(delivery.handle.queue.clone())
                    .or_default()
                    .dead_letters
                    .push(entry);
                debug!(
                    "任务 {} 已转入死信 ({})",
                    delivery.envelope.task_id(),
                    reason.as_str()
                );
            }
        }

        Ok(())
    }

    async fn queue_size(&self, queue: &str) -> Result<u32> {
        let queues = self.inner.queues.read().await;
        let size = queues.get(queue).map(|state| state.ready.len()).unwrap_or(0);
        Ok(size as u32)
    }

    async fn dead_letters(&self, queue: &str) -> Result<Vec<DeadLetterEntry>> {
        let queues = self.inner.queues.read().await;
        Ok(queues
            .get(queue)
            .map(|state| state.dead_letters.clone())
            .unwrap_or_default())
    }

    async fn publish_heartbeat(&self, queue: &str, heartbeat: &WorkerHeartbeat) -> Result<()> {
        self.ensure_open()?;
        self.inner
            .heartbeats
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(heartbeat.clone());
        Ok(())
    }

    async fn drain_heartbeats(&self, queue: &str) -> Result<Vec<WorkerHeartbeat>> {
        self.ensure_open()?;
        let now = Utc::now();
        let ttl = self.inner.heartbeat_ttl.as_secs() as i64;

        let drained = self
            .inner
            .heartbeats
            .write()
            .await
            .get_mut(queue)
            .map(|beats| beats.drain(..).collect::<Vec<_>>())
            .unwrap_or_default();

        Ok(drained
            .into_iter()
            .filter(|hb| hb.age_seconds(now) <= ttl)
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        info!("内存消息代理已关闭");
        Ok(())
    }
}
