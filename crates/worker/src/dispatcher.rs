use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{FutureExt, StreamExt};
use metrics::{counter, histogram};
use notifier_core::{
    config::AppConfig,
    models::{DeadLetterReason, DeliveryOutcome, Payload},
    traits::{Broker, Delivery, NackAction, TaskContext, TaskHandler},
    ErrorKind, NotifierError, ReconnectBackoff, Result, RetryDecision, RetryPolicy,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::registry::HandlerRegistry;

/// 分发器配置
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub worker_id: String,
    pub queue: String,
    pub retry_policy: RetryPolicy,
    /// 未单独配置的任务使用的执行超时
    pub default_timeout: Duration,
    pub timeout_overrides: HashMap<String, Duration>,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl DispatcherSettings {
    pub fn new(worker_id: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue: queue.into(),
            retry_policy: RetryPolicy::default(),
            default_timeout: Duration::from_secs(30),
            timeout_overrides: HashMap::new(),
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }

    pub fn from_app_config(config: &AppConfig, worker_id: impl Into<String>) -> Self {
        let timeout_overrides = config
            .tasks
            .iter()
            .filter_map(|task| {
                task.timeout_seconds
                    .map(|secs| (task.name.clone(), Duration::from_secs(secs)))
            })
            .collect();

        Self {
            worker_id: worker_id.into(),
            queue: config.broker.queue.clone(),
            retry_policy: RetryPolicy::from_config(&config.retry),
            default_timeout: Duration::from_secs(config.worker.task_timeout_seconds),
            timeout_overrides,
            reconnect_base_delay: Duration::from_millis(config.broker.reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(config.broker.reconnect_max_delay_ms),
        }
    }

    pub fn timeout_for(&self, task_name: &str) -> Duration {
        self.timeout_overrides
            .get(task_name)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// 任务分发器
///
/// 从代理取出投递，查找处理器并执行，根据结果与重试策略 ack 或 nack。
/// 处理器错误在这里终结，不会向上传播导致分发循环退出。
#[derive(Clone)]
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    settings: Arc<DispatcherSettings>,
    active: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<HandlerRegistry>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            broker,
            registry,
            settings: Arc::new(settings),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// 正在执行的处理器数量
    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// 处理单个投递，返回投递结果
    pub async fn process_delivery(&self, mut delivery: Delivery) -> DeliveryOutcome {
        let task_name = delivery.envelope.task_name().to_string();
        let task_id = delivery.envelope.task_id();

        let Some(handler) = self.registry.get(&task_name) else {
            let err = NotifierError::UnknownTask {
                name: task_name.clone(),
            };
            warn!(task_id = %task_id, "{}，转入死信", err);
            self.settle_dead_letter(&delivery, DeadLetterReason::UnknownTask, &err)
                .await;
            return self.finish(DeliveryOutcome::failed_permanent(
                &delivery.envelope,
                err.to_string(),
            ));
        };

        let attempt = delivery.envelope.record_attempt();
        let ctx = TaskContext::from_envelope(&delivery.envelope, &self.settings.worker_id);
        let timeout = self.settings.timeout_for(&task_name);

        let span = info_span!(
            "process_delivery",
            task_id = %task_id,
            task = %task_name,
            attempt = attempt,
            max_attempts = delivery.envelope.max_attempts(),
            redelivered = delivery.handle.redelivered
        );

        let started = Instant::now();
        let active = ActiveGuard::enter(&self.active);
        let result = Self::invoke(handler, &ctx, delivery.envelope.payload(), timeout)
            .instrument(span.clone())
            .await;
        drop(active);
        histogram!("notifier_task_duration_seconds", "task" => task_name.clone())
            .record(started.elapsed().as_secs_f64());

        let outcome = async {
            match result {
                Ok(()) => {
                    match self.broker.ack(&delivery).await {
                        Ok(()) => info!("任务执行成功"),
                        Err(e) => error!("确认消息失败，等待代理重新投递: {}", e),
                    }
                    DeliveryOutcome::succeeded(&delivery.envelope)
                }
                Err(err) => self.handle_failure(&delivery, err).await,
            }
        }
        .instrument(span)
        .await;

        self.finish(outcome)
    }

    async fn handle_failure(&self, delivery: &Delivery, err: NotifierError) -> DeliveryOutcome {
        let envelope = &delivery.envelope;
        let kind = err.kind();

        match self
            .settings
            .retry_policy
            .decide(envelope.attempt_count(), envelope.max_attempts(), kind)
        {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    "任务执行失败 (第 {}/{} 次)，{:?} 后重试: {}",
                    envelope.attempt_count(),
                    envelope.max_attempts(),
                    delay,
                    err
                );
                if let Err(e) = self
                    .broker
                    .nack(delivery, NackAction::Requeue { delay })
                    .await
                {
                    error!("重新入队失败，等待代理重新投递: {}", e);
                }
                DeliveryOutcome::failed_transient(envelope, err.to_string())
            }
            RetryDecision::GiveUp => {
                let reason = match kind {
                    ErrorKind::Permanent => DeadLetterReason::PermanentFailure,
                    ErrorKind::Transient => DeadLetterReason::RetriesExhausted,
                };
                error!(
                    "任务最终失败 ({}，第 {}/{} 次): {}",
                    reason.as_str(),
                    envelope.attempt_count(),
                    envelope.max_attempts(),
                    err
                );
                self.settle_dead_letter(delivery, reason, &err).await;
                DeliveryOutcome::failed_permanent(envelope, err.to_string())
            }
        }
    }

    async fn settle_dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        err: &NotifierError,
    ) {
        let action = NackAction::DeadLetter {
            reason,
            error: err.to_string(),
        };
        match self.broker.nack(delivery, action).await {
            Ok(()) => {
                counter!("notifier_dead_letters_total", "reason" => reason.as_str()).increment(1);
            }
            Err(e) => error!(
                task_id = %delivery.envelope.task_id(),
                "写入死信失败，等待代理重新投递: {}",
                e
            ),
        }
    }

    fn finish(&self, outcome: DeliveryOutcome) -> DeliveryOutcome {
        counter!(
            "notifier_tasks_total",
            "task" => outcome.task_name.clone(),
            "status" => outcome.status.as_str()
        )
        .increment(1);
        outcome
    }

    /// 在超时限制内执行处理器，panic视为永久性错误
    async fn invoke(
        handler: Arc<dyn TaskHandler>,
        ctx: &TaskContext,
        payload: &Payload,
        timeout: Duration,
    ) -> Result<()> {
        let execution = AssertUnwindSafe(handler.handle(ctx, payload)).catch_unwind();

        match tokio::time::timeout(timeout, execution).await {
            Err(_) => Err(NotifierError::HandlerTimeout {
                seconds: timeout.as_secs(),
            }),
            Ok(Err(panic)) => Err(NotifierError::Internal(format!(
                "处理器panic: {}",
                panic_message(panic.as_ref())
            ))),
            Ok(Ok(result)) => result,
        }
    }

    /// 分发循环：持续消费直到收到停止信号
    ///
    /// 停止信号只在等待下一条投递时生效，已取出的投递总会处理完并 ack/nack。
    /// 投递流出错或结束时按退避间隔重新打开。
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let queue = self.settings.queue.clone();
        let mut backoff = ReconnectBackoff::new(
            self.settings.reconnect_base_delay,
            self.settings.reconnect_max_delay,
        );

        info!(
            worker_id = %self.settings.worker_id,
            "分发循环启动，队列: {}",
            queue
        );

        'consume: loop {
            match self.broker.consume(&queue).await {
                Ok(mut stream) => {
                    backoff.reset();

                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = shutdown_rx.recv() => break 'consume,
                            next = stream.next() => next,
                        };

                        match next {
                            Some(Ok(delivery)) => {
                                let outcome = self.process_delivery(delivery).await;
                                debug!(
                                    "任务 {} 处理结束: {}",
                                    outcome.task_id,
                                    outcome.status.as_str()
                                );
                            }
                            Some(Err(e)) => {
                                warn!("接收投递失败: {}", e);
                                break;
                            }
                            None => {
                                warn!("投递流已结束");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!("打开投递流失败: {}", e),
            }

            let delay = backoff.next_delay();
            warn!(
                "{:?} 后重新连接队列 {} (第 {} 次)",
                delay,
                queue,
                backoff.failures()
            );
            tokio::select! {
                _ = shutdown_rx.recv() => break 'consume,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(worker_id = %self.settings.worker_id, "分发循环已停止");
        Ok(())
    }
}

/// 进行中任务计数，任务被取消时同样减回
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知panic".to_string()
    }
}
