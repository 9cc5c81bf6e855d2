use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notifier_core::{
    config::AppConfig, models::WorkerHeartbeat, traits::Broker, NotifierError, Result,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;

/// Worker进程池配置
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// 并发的分发循环数量
    pub concurrency: usize,
    pub heartbeat_queue: String,
    pub heartbeat_interval: Duration,
    /// 停止时等待进行中任务完成的时间
    pub shutdown_grace: Duration,
}

impl PoolSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.worker.concurrency,
            heartbeat_queue: config.broker.heartbeat_queue.clone(),
            heartbeat_interval: Duration::from_secs(config.worker.heartbeat_interval_seconds),
            shutdown_grace: Duration::from_secs(config.worker.shutdown_grace_seconds),
        }
    }
}

/// Worker进程池
///
/// 运行 `concurrency` 个相互独立的分发循环，共享同一个代理与处理器注册表，
/// 并按固定间隔发布心跳。
pub struct WorkerPool {
    dispatcher: Dispatcher,
    settings: PoolSettings,
    source: HeartbeatSource,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(dispatcher: Dispatcher, settings: PoolSettings) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let source = HeartbeatSource {
            dispatcher: dispatcher.clone(),
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
            concurrency: settings.concurrency,
            started_at: Utc::now(),
        };
        Self {
            dispatcher,
            settings,
            source,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.dispatcher.settings().worker_id
    }

    /// 本进程的状态快照，与发布的心跳内容一致
    pub fn inspect(&self) -> WorkerHeartbeat {
        self.source.heartbeat()
    }

    /// 在后台启动分发循环与心跳任务
    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(NotifierError::Internal("Worker进程池已在运行".to_string()));
        }

        info!(
            "启动Worker {}: 并发 {}，已注册任务 {:?}",
            self.worker_id(),
            self.settings.concurrency,
            self.dispatcher.registry().names()
        );

        for index in 0..self.settings.concurrency.max(1) {
            let dispatcher = self.dispatcher.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = dispatcher.run(shutdown_rx).await {
                    error!("分发循环 {} 异常退出: {}", index, e);
                }
            }));
        }

        handles.push(self.spawn_heartbeat());
        Ok(())
    }

    /// 单循环模式：在当前任务上直接运行一个分发循环，直到收到停止信号
    pub async fn run_solo(&self) -> Result<()> {
        info!(
            "以solo模式启动Worker {}，已注册任务 {:?}",
            self.worker_id(),
            self.dispatcher.registry().names()
        );

        let heartbeat = self.spawn_heartbeat();
        let result = self.dispatcher.run(self.shutdown_tx.subscribe()).await;

        heartbeat.abort();
        result
    }

    /// 发出停止信号，不等待
    pub fn trigger_shutdown(&self) {
        // 没有订阅者时发送失败，说明循环均已退出
        let _ = self.shutdown_tx.send(());
    }

    /// 停止所有循环，最多等待 `shutdown_grace`，超时后强制中止
    pub async fn stop(&self) -> Result<()> {
        info!("停止Worker {}", self.worker_id());
        self.trigger_shutdown();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        let aborters: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let joined = tokio::time::timeout(
            self.settings.shutdown_grace,
            futures::future::join_all(handles),
        )
        .await;

        match joined {
            Ok(_) => {
                info!("Worker {} 已停止", self.worker_id());
                Ok(())
            }
            Err(_) => {
                warn!(
                    "等待进行中任务超过 {:?}，强制停止 (进行中: {})",
                    self.settings.shutdown_grace,
                    self.dispatcher.active_tasks()
                );
                for aborter in aborters {
                    aborter.abort();
                }
                Ok(())
            }
        }
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let broker = self.dispatcher.broker().clone();
        let queue = self.settings.heartbeat_queue.clone();
        let period = self.settings.heartbeat_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let source = self.source.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let heartbeat = source.heartbeat();
                        match broker.publish_heartbeat(&queue, &heartbeat).await {
                            Ok(()) => debug!(
                                "发送心跳: worker_id={}, active_tasks={}",
                                heartbeat.worker_id, heartbeat.active_tasks
                            ),
                            Err(e) => warn!("发送心跳失败: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("心跳任务收到停止信号");
                        break;
                    }
                }
            }
        })
    }
}

#[derive(Clone)]
struct HeartbeatSource {
    dispatcher: Dispatcher,
    hostname: String,
    concurrency: usize,
    started_at: DateTime<Utc>,
}

impl HeartbeatSource {
    fn heartbeat(&self) -> WorkerHeartbeat {
        let settings = self.dispatcher.settings();
        WorkerHeartbeat {
            worker_id: settings.worker_id.clone(),
            hostname: self.hostname.clone(),
            queue: settings.queue.clone(),
            concurrency: self.concurrency,
            registered_tasks: self.dispatcher.registry().names(),
            active_tasks: self.dispatcher.active_tasks(),
            started_at: self.started_at,
            timestamp: Utc::now(),
        }
    }
}

/// 等待心跳并按Worker去重，保留每个Worker最新的一条
pub async fn collect_heartbeats(
    broker: &Arc<dyn Broker>,
    queue: &str,
    window: Duration,
) -> Result<Vec<WorkerHeartbeat>> {
    let deadline = tokio::time::Instant::now() + window;
    let mut latest: BTreeMap<String, WorkerHeartbeat> = BTreeMap::new();

    loop {
        for heartbeat in broker.drain_heartbeats(queue).await? {
            match latest.get(&heartbeat.worker_id) {
                Some(existing) if existing.timestamp >= heartbeat.timestamp => {}
                _ => {
                    latest.insert(heartbeat.worker_id.clone(), heartbeat);
                }
            }
        }

        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200).min(window)).await;
    }

    Ok(latest.into_values().collect())
}
