use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use notifier_core::{
    config::BrokerConfig,
    models::{DeadLetterEntry, TaskEnvelope, WorkerHeartbeat},
    traits::{AckHandle, Broker, Delivery, DeliveryStream, NackAction},
    NotifierError, Result,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 死信队列后缀
pub const DEAD_LETTER_SUFFIX: &str = "dead_letter";

/// 延迟重试队列的名称，按延迟毫秒数区分
pub fn delay_queue_name(queue: &str, delay: Duration) -> String {
    format!("{}.delay.{}", queue, delay.as_millis())
}

pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}.{DEAD_LETTER_SUFFIX}")
}

/// RabbitMQ消息代理实现
///
/// - 发布使用publisher confirms，代理确认持久化后才返回
/// - 任务消息持久化，队列durable，消费使用手动确认
/// - 延迟重试通过带TTL的延迟队列实现，过期后经默认交换机回到原队列
/// - 连接断开后在下一次操作时惰性重连
pub struct RabbitMqBroker {
    inner: Arc<Inner>,
}

struct Inner {
    config: BrokerConfig,
    connection: Mutex<Option<Arc<Connection>>>,
    publish_channel: Mutex<Option<Channel>>,
    declared: Mutex<HashSet<String>>,
    /// 本地投递标签 -> lapin确认句柄
    pending: Mutex<HashMap<u64, Acker>>,
    next_tag: AtomicU64,
}

fn broker_error(context: &str, e: impl std::fmt::Display) -> NotifierError {
    NotifierError::BrokerUnavailable(format!("{context}: {e}"))
}

fn persistent_properties() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(2) // 2 = persistent
        .with_content_type("application/json".into())
}

/// 转发失败时退回原消息，由代理重新投递
fn release_options() -> BasicNackOptions {
    BasicNackOptions {
        multiple: false,
        requeue: true,
    }
}

impl RabbitMqBroker {
    /// 创建RabbitMQ代理并建立连接
    pub async fn new(config: BrokerConfig) -> Result<Self> {
        let broker = Self {
            inner: Arc::new(Inner {
                config,
                connection: Mutex::new(None),
                publish_channel: Mutex::new(None),
                declared: Mutex::new(HashSet::new()),
                pending: Mutex::new(HashMap::new()),
                next_tag: AtomicU64::new(1),
            }),
        };

        broker.inner.publish_channel().await?;
        Ok(broker)
    }
}

impl Inner {
    /// 获取可用连接，断开时重新建立
    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut guard = self.connection.lock().await;

        if let Some(connection) = guard.as_ref() {
            if connection.status().connected() {
                return Ok(Arc::clone(connection));
            }
            warn!("RabbitMQ连接已断开，正在重新连接");
        }

        let timeout = Duration::from_secs(self.config.connection_timeout_seconds);
        let connection = tokio::time::timeout(
            timeout,
            Connection::connect(&self.config.url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            NotifierError::BrokerUnavailable(format!(
                "连接RabbitMQ超时 ({}s)",
                timeout.as_secs()
            ))
        })?
        .map_err(|e| broker_error("连接RabbitMQ失败", e))?;
        let connection = Arc::new(connection);

        info!("成功连接到RabbitMQ: {}", self.config.redacted_url());
        self.declared.lock().await.clear();
        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// 获取开启了publisher confirms的发布通道
    async fn publish_channel(&self) -> Result<Channel> {
        let mut guard = self.publish_channel.lock().await;

        if let Some(channel) = guard.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let connection = self.connection().await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| broker_error("创建通道失败", e))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| broker_error("开启发布确认失败", e))?;

        *guard = Some(channel.clone());
        Ok(channel)
    }

    async fn declare(&self, channel: &Channel, queue: &str, arguments: FieldTable) -> Result<u32> {
        let declared = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| broker_error(&format!("声明队列 {queue} 失败"), e))?;

        debug!("队列 {} 声明成功", queue);
        Ok(declared.message_count())
    }

    /// 声明任务队列及其死信队列
    async fn ensure_task_queue(&self, queue: &str) -> Result<()> {
        if self.declared.lock().await.contains(queue) {
            return Ok(());
        }

        let channel = self.publish_channel().await?;
        self.declare(&channel, queue, FieldTable::default()).await?;
        self.declare(&channel, &dead_letter_queue_name(queue), FieldTable::default())
            .await?;

        self.declared.lock().await.insert(queue.to_string());
        Ok(())
    }

    /// 声明延迟队列：消息过期后转回原队列，空闲一段时间后队列自动删除
    async fn ensure_delay_queue(&self, queue: &str, delay: Duration) -> Result<String> {
        let name = delay_queue_name(queue, delay);
        if self.declared.lock().await.contains(&name) {
            return Ok(name);
        }

        let ttl_ms = delay.as_millis().min(i64::MAX as u128) as i64;
        let mut arguments = FieldTable::default();
        arguments.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl_ms));
        arguments.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));
        arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(queue.into()),
        );
        arguments.insert(
            "x-expires".into(),
            AMQPValue::LongLongInt(ttl_ms.saturating_mul(2).saturating_add(60_000)),
        );

        let channel = self.publish_channel().await?;
        self.declare(&channel, &name, arguments).await?;

        self.declared.lock().await.insert(name.clone());
        Ok(name)
    }

    async fn ensure_heartbeat_queue(&self, queue: &str) -> Result<()> {
        if self.declared.lock().await.contains(queue) {
            return Ok(());
        }

        let mut arguments = FieldTable::default();
        arguments.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt((self.config.heartbeat_ttl_seconds * 1000) as i64),
        );

        let channel = self.publish_channel().await?;
        self.declare(&channel, queue, arguments).await?;

        self.declared.lock().await.insert(queue.to_string());
        Ok(())
    }

    /// 发布并等待代理确认
    async fn publish_confirmed(
        &self,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<()> {
        let channel = self.publish_channel().await?;

        let confirmation = channel
            .basic_publish(
                "",
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| broker_error(&format!("发布消息到队列 {routing_key} 失败"), e))?
            .await
            .map_err(|e| broker_error("消息发布确认失败", e))?;

        if confirmation.is_nack() {
            return Err(NotifierError::BrokerUnavailable(format!(
                "代理拒绝了发往队列 {routing_key} 的消息"
            )));
        }

        debug!("消息已发布到队列: {}", routing_key);
        Ok(())
    }

    async fn publish_dead_letter(&self, queue: &str, entry: &DeadLetterEntry) -> Result<()> {
        self.ensure_task_queue(queue).await?;
        let payload = serde_json::to_vec(entry)?;
        self.publish_confirmed(
            &dead_letter_queue_name(queue),
            &payload,
            persistent_properties(),
        )
        .await
    }

    /// 把失败的投递转发到延迟队列或死信队列
    async fn republish(&self, delivery: &Delivery, action: NackAction) -> Result<()> {
        let queue = &delivery.handle.queue;

        match action {
            NackAction::Requeue { delay } => {
                let payload = delivery.envelope.to_bytes()?;
                let properties = persistent_properties()
                    .with_message_id(delivery.envelope.task_id().to_string().into());
                let target = if delay.is_zero() {
                    queue.clone()
                } else {
                    self.ensure_delay_queue(queue, delay).await?
                };
                self.publish_confirmed(&target, &payload, properties).await
            }
            NackAction::DeadLetter { reason, error } => {
                let entry = DeadLetterEntry::for_envelope(&delivery.envelope, reason, error);
                self.publish_dead_letter(queue, &entry).await
            }
        }
    }

    async fn take_acker(&self, handle: &AckHandle) -> Result<Acker> {
        self.pending
            .lock()
            .await
            .remove(&handle.delivery_tag)
            .ok_or_else(|| {
                NotifierError::BrokerUnavailable(format!(
                    "投递标签 {} 不存在或所在通道已关闭",
                    handle.delivery_tag
                ))
            })
    }
}

#[async_trait]
impl Broker for RabbitMqBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.inner.ensure_task_queue(queue).await
    }

    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<()> {
        self.inner.ensure_task_queue(queue).await?;
        let payload = envelope.to_bytes()?;
        let properties =
            persistent_properties().with_message_id(envelope.task_id().to_string().into());

        self.inner
            .publish_confirmed(queue, &payload, properties)
            .await?;
        debug!("任务 {} 已写入队列 {}", envelope.task_id(), queue);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        self.inner.ensure_task_queue(queue).await?;

        // 每个消费者使用独立通道，prefetch限制未确认消息数量
        let connection = self.inner.connection().await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| broker_error("创建消费通道失败", e))?;
        channel
            .basic_qos(self.inner.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| broker_error("设置prefetch失败", e))?;

        let consumer_tag = format!("notifier-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| broker_error("创建消费者失败", e))?;

        info!("为队列 {} 创建消费者: {}", queue, consumer_tag);

        let inner = self.inner.clone();
        let queue = queue.to_string();
        let stream = consumer.filter_map(move |item| {
            // 通道随流一起存活
            let _channel = &channel;
            let inner = inner.clone();
            let queue = queue.clone();
            async move {
                let delivery = match item {
                    Ok(delivery) => delivery,
                    Err(e) => return Some(Err(broker_error("接收消息失败", e))),
                };

                match TaskEnvelope::from_bytes(&delivery.data) {
                    Ok(envelope) => {
                        let tag = inner.next_tag.fetch_add(1, Ordering::SeqCst);
                        inner.pending.lock().await.insert(tag, delivery.acker);
                        Some(Ok(Delivery {
                            envelope,
                            handle: AckHandle {
                                queue,
                                delivery_tag: tag,
                                redelivered: delivery.redelivered,
                            },
                        }))
                    }
                    Err(e) => {
                        warn!("队列 {} 收到无法解码的消息，转入死信: {}", queue, e);
                        let entry = DeadLetterEntry::undecodable(&delivery.data, e.to_string());
                        match inner.publish_dead_letter(&queue, &entry).await {
                            Ok(()) => {
                                if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                                    error!("确认无法解码的消息失败: {}", e);
                                }
                            }
                            Err(e) => {
                                // 死信写入失败时保留原消息，等待重新投递
                                error!("写入死信失败: {}", e);
                            }
                        }
                        None
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let acker = self.inner.take_acker(&delivery.handle).await?;
        acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| broker_error("确认消息失败", e))?;

        debug!("任务 {} 已确认", delivery.envelope.task_id());
        Ok(())
    }

    /// 先发布（重试或死信），确认成功后再ack原消息
    ///
    /// 两步之间崩溃会导致重复投递，不会丢失消息。
    async fn nack(&self, delivery: &Delivery, action: NackAction) -> Result<()> {
        // 先取出确认句柄，同一投递不会被并发的第二次调用重复发布
        let acker = self.inner.take_acker(&delivery.handle).await?;

        if let Err(e) = self.inner.republish(delivery, action).await {
            warn!(
                "任务 {} 转发失败，原消息退回队列: {}",
                delivery.envelope.task_id(),
                e
            );
            if let Err(nack_err) = acker.nack(release_options()).await {
                error!("退回原消息失败: {}", nack_err);
            }
            return Err(e);
        }

        acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| broker_error("确认原消息失败", e))?;
        Ok(())
    }

    async fn queue_size(&self, queue: &str) -> Result<u32> {
        let channel = self.inner.publish_channel().await?;
        let queue_info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;

        match queue_info {
            Ok(info) => Ok(info.message_count()),
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("NOT_FOUND") || error_msg.contains("404") {
                    // 被动声明失败会关闭通道，下次操作时重建
                    debug!("队列 {} 不存在，返回大小为0", queue);
                    Ok(0)
                } else {
                    Err(broker_error(&format!("获取队列 {queue} 信息失败"), e))
                }
            }
        }
    }

    /// 逐条读取死信后关闭临时通道，未确认的消息自动回到死信队列
    async fn dead_letters(&self, queue: &str) -> Result<Vec<DeadLetterEntry>> {
        self.inner.ensure_task_queue(queue).await?;

        let connection = self.inner.connection().await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| broker_error("创建通道失败", e))?;

        let dead_letter_queue = dead_letter_queue_name(queue);
        let mut entries = Vec::new();
        loop {
            let message = channel
                .basic_get(&dead_letter_queue, BasicGetOptions { no_ack: false })
                .await
                .map_err(|e| broker_error("读取死信失败", e))?;

            let Some(message) = message else {
                break;
            };

            match serde_json::from_slice::<DeadLetterEntry>(&message.delivery.data) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("跳过无法解析的死信记录: {}", e),
            }
        }

        if let Err(e) = channel.close(200, "死信查看完成").await {
            warn!("关闭死信查看通道失败: {}", e);
        }

        Ok(entries)
    }

    async fn publish_heartbeat(&self, queue: &str, heartbeat: &WorkerHeartbeat) -> Result<()> {
        self.inner.ensure_heartbeat_queue(queue).await?;
        let payload = heartbeat.to_bytes()?;
        self.inner
            .publish_confirmed(queue, &payload, BasicProperties::default())
            .await
    }

    async fn drain_heartbeats(&self, queue: &str) -> Result<Vec<WorkerHeartbeat>> {
        self.inner.ensure_heartbeat_queue(queue).await?;
        let channel = self.inner.publish_channel().await?;

        let mut heartbeats = Vec::new();
        while let Some(message) = channel
            .basic_get(queue, BasicGetOptions { no_ack: true })
            .await
            .map_err(|e| broker_error("读取心跳失败", e))?
        {
            match WorkerHeartbeat::from_bytes(&message.delivery.data) {
                Ok(heartbeat) => heartbeats.push(heartbeat),
                Err(e) => warn!("跳过无法解析的心跳: {}", e),
            }
        }

        Ok(heartbeats)
    }

    async fn is_healthy(&self) -> bool {
        self.inner
            .connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.status().connected())
            .unwrap_or(false)
    }

    async fn close(&self) -> Result<()> {
        let connection = self.inner.connection.lock().await.take();
        self.inner.publish_channel.lock().await.take();

        if let Some(connection) = connection {
            connection
                .close(200, "正常关闭")
                .await
                .map_err(|e| broker_error("关闭连接失败", e))?;
        }

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}
