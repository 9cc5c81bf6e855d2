#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notifier_core::{
    models::{DeadLetterEntry, Payload, TaskEnvelope, WorkerHeartbeat},
    traits::{
        Broker, Delivery, DeliveryStream, EmailTransport, NackAction, OutgoingEmail, SendReceipt,
        TaskContext, TaskHandler,
    },
    NotifierError, Result, RetryPolicy,
};
use notifier_infrastructure::InMemoryBroker;
use notifier_worker::{builtin_handlers, DispatcherSettings, HandlerRegistry};

pub const QUEUE: &str = "notifications";
pub const HEARTBEAT_QUEUE: &str = "notifications.heartbeat";

/// 传输层每次调用的脚本化结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Deliver,
    Transient,
    Permanent,
}

/// 按脚本返回结果的邮件传输，脚本用完后使用默认结果
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<OutgoingEmail>>,
    seen: Mutex<HashSet<String>>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            attempts: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new([], Step::Deliver)
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new([], step)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<OutgoingEmail> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match step {
            Step::Transient => Err(NotifierError::TransientSend("421 try again later".to_string())),
            Step::Permanent => Err(NotifierError::PermanentSend("550 mailbox unavailable".to_string())),
            Step::Deliver => {
                if !self.seen.lock().unwrap().insert(email.message_id.clone()) {
                    return Ok(SendReceipt::Duplicate);
                }
                self.delivered.lock().unwrap().push(email.clone());
                Ok(SendReceipt::Delivered)
            }
        }
    }
}

/// 只计数的处理器
pub struct CountingHandler {
    pub name: &'static str,
    pub calls: AtomicUsize,
}

impl CountingHandler {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for CountingHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, _ctx: &TaskContext, _payload: &Payload) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 执行固定时长的处理器
pub struct SlowHandler {
    pub name: &'static str,
    pub duration: Duration,
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
}

impl SlowHandler {
    pub fn new(name: &'static str, duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            duration,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for SlowHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, _ctx: &TaskContext, _payload: &Payload) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct PanickingHandler;

#[async_trait]
impl TaskHandler for PanickingHandler {
    fn name(&self) -> &str {
        "tests.panic"
    }

    async fn handle(&self, _ctx: &TaskContext, _payload: &Payload) -> Result<()> {
        panic!("handler exploded");
    }
}

/// 首次ack失败的代理，模拟确认前连接中断
pub struct FlakyAckBroker {
    pub inner: InMemoryBroker,
    failures_left: AtomicUsize,
}

impl FlakyAckBroker {
    pub fn new(inner: InMemoryBroker, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        })
    }
}

#[async_trait]
impl Broker for FlakyAckBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.inner.declare_queue(queue).await
    }

    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<()> {
        self.inner.enqueue(queue, envelope).await
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        self.inner.consume(queue).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(NotifierError::BrokerUnavailable("connection reset".to_string()));
        }
        self.inner.ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery, action: NackAction) -> Result<()> {
        self.inner.nack(delivery, action).await
    }

    async fn queue_size(&self, queue: &str) -> Result<u32> {
        self.inner.queue_size(queue).await
    }

    async fn dead_letters(&self, queue: &str) -> Result<Vec<DeadLetterEntry>> {
        self.inner.dead_letters(queue).await
    }

    async fn publish_heartbeat(&self, queue: &str, heartbeat: &WorkerHeartbeat) -> Result<()> {
        self.inner.publish_heartbeat(queue, heartbeat).await
    }

    async fn drain_heartbeats(&self, queue: &str) -> Result<Vec<WorkerHeartbeat>> {
        self.inner.drain_heartbeats(queue).await
    }

    async fn is_healthy(&self) -> bool {
        self.inner.is_healthy().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// 测试用的快速重试配置
pub fn fast_settings() -> DispatcherSettings {
    let mut settings = DispatcherSettings::new("test-worker", QUEUE);
    settings.retry_policy =
        RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(20), 2.0);
    settings.default_timeout = Duration::from_secs(2);
    settings.reconnect_base_delay = Duration::from_millis(10);
    settings.reconnect_max_delay = Duration::from_millis(50);
    settings
}

pub fn email_registry(transport: Arc<ScriptedTransport>) -> Arc<HandlerRegistry> {
    Arc::new(HandlerRegistry::from_handlers(builtin_handlers(transport)).unwrap())
}

/// 轮询直到条件成立或超时
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn next_delivery(stream: &mut DeliveryStream) -> Delivery {
    use futures::StreamExt;

    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery stream ended")
        .expect("delivery failed")
}
