use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use metrics::counter;
use notifier_core::{
    config::AppConfig,
    models::{
        BookingSnapshot, PaymentSnapshot, TaskEnvelope, BOOKING_CONFIRMATION_TASK,
        PAYMENT_CONFIRMATION_TASK,
    },
    traits::Broker,
    NotifierError, Result,
};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// 生产者配置
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// 任务写入的队列
    pub queue: String,
    /// 未单独配置的任务使用的最大尝试次数
    pub default_max_attempts: u32,
    /// 按任务名覆盖的最大尝试次数
    pub max_attempts_overrides: HashMap<String, u32>,
}

impl ProducerConfig {
    pub fn new(queue: impl Into<String>, default_max_attempts: u32) -> Self {
        Self {
            queue: queue.into(),
            default_max_attempts,
            max_attempts_overrides: HashMap::new(),
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        let max_attempts_overrides = config
            .tasks
            .iter()
            .filter_map(|task| task.max_attempts.map(|max| (task.name.clone(), max)))
            .collect();

        Self {
            queue: config.broker.queue.clone(),
            default_max_attempts: config.retry.max_attempts,
            max_attempts_overrides,
        }
    }

    pub fn max_attempts_for(&self, task_name: &str) -> u32 {
        self.max_attempts_overrides
            .get(task_name)
            .copied()
            .unwrap_or(self.default_max_attempts)
    }
}

/// 通知生产者
///
/// 在请求路径上调用：校验快照、构造任务信封并写入代理后立即返回，不等待Worker处理。
/// 入队失败时返回 `NotificationQueue`，调用方已创建的预订不受影响。
pub struct NotificationProducer {
    broker: Arc<dyn Broker>,
    config: ProducerConfig,
}

impl NotificationProducer {
    pub fn new(broker: Arc<dyn Broker>, config: ProducerConfig) -> Self {
        Self { broker, config }
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    /// 提交预订确认邮件任务，返回任务ID
    pub async fn submit_confirmation(
        &self,
        booking_id: i64,
        user_email: &str,
        listing_name: &str,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Uuid> {
        let snapshot = BookingSnapshot {
            booking_id,
            user_email: user_email.to_string(),
            listing_name: listing_name.to_string(),
            check_in,
            check_out,
            guests: None,
        };
        Ok(self.submit(&snapshot).await?.task_id())
    }

    /// 提交预订快照
    pub async fn submit(&self, snapshot: &BookingSnapshot) -> Result<TaskEnvelope> {
        snapshot.validate()?;

        let envelope = TaskEnvelope::new(
            BOOKING_CONFIRMATION_TASK,
            snapshot.to_payload(),
            self.config.max_attempts_for(BOOKING_CONFIRMATION_TASK),
        );

        let span = info_span!(
            "submit_notification",
            task_id = %envelope.task_id(),
            booking_id = snapshot.booking_id
        );
        self.publish(&envelope).instrument(span).await?;
        Ok(envelope)
    }

    /// 提交支付确认邮件任务，返回任务ID
    pub async fn submit_payment_confirmation(&self, payment: &PaymentSnapshot) -> Result<Uuid> {
        payment.validate()?;

        let envelope = TaskEnvelope::new(
            PAYMENT_CONFIRMATION_TASK,
            payment.to_payload(),
            self.config.max_attempts_for(PAYMENT_CONFIRMATION_TASK),
        );

        let span = info_span!(
            "submit_notification",
            task_id = %envelope.task_id(),
            booking_id = %payment.booking_reference
        );
        self.publish(&envelope).instrument(span).await?;
        Ok(envelope.task_id())
    }

    async fn publish(&self, envelope: &TaskEnvelope) -> Result<()> {
        match self.broker.enqueue(&self.config.queue, envelope).await {
            Ok(()) => {
                counter!("notifier_tasks_enqueued_total", "task" => envelope.task_name().to_string())
                    .increment(1);
                info!(
                    "任务 {} ({}) 已写入队列 {}",
                    envelope.task_id(),
                    envelope.task_name(),
                    self.config.queue
                );
                Ok(())
            }
            Err(e) => {
                error!("任务 {} 入队失败: {}", envelope.task_id(), e);
                Err(NotifierError::notification_queue(e))
            }
        }
    }
}
