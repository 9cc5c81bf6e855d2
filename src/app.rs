use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use notifier_core::{
    config::{AppConfig, BrokerType, EmailBackend, EmailConfig, ObservabilityConfig},
    models::{BookingSnapshot, TaskEnvelope, WorkerHeartbeat},
    traits::{Broker, EmailTransport},
};
use notifier_infrastructure::{BrokerFactory, ConsoleTransport, SmtpTransport};
use notifier_producer::{NotificationProducer, ProducerConfig};
use notifier_worker::{
    builtin_handlers, collect_heartbeats, Dispatcher, DispatcherSettings, HandlerRegistry,
    PoolSettings, WorkerPool,
};
use tracing::{info, warn};

use crate::cli::{InspectAction, SubmitArgs, WorkerArgs};
use crate::shutdown::ShutdownManager;

/// 主应用程序
///
/// 持有配置与已连接的消息代理，按子命令组装生产者或Worker进程池。
pub struct Application {
    config: AppConfig,
    broker: Arc<dyn Broker>,
}

impl Application {
    /// 创建应用实例并连接消息代理，代理不可达时返回错误
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(
            "连接消息代理: {} ({})",
            config.broker.redacted_url(),
            BrokerFactory::get_type_string(&config.broker.r#type)
        );
        let broker = BrokerFactory::create(&config.broker)
            .await
            .context("连接消息代理失败")?;

        Ok(Self { config, broker })
    }

    pub fn with_broker(config: AppConfig, broker: Arc<dyn Broker>) -> Self {
        Self { config, broker }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn producer(&self) -> NotificationProducer {
        NotificationProducer::new(
            self.broker.clone(),
            ProducerConfig::from_app_config(&self.config),
        )
    }

    /// 提交一条预订确认通知
    pub async fn submit(&self, args: &SubmitArgs) -> Result<TaskEnvelope> {
        if self.config.broker.r#type == BrokerType::Memory {
            warn!("当前使用内存消息代理，任务只对本进程内的Worker可见");
        }

        let snapshot = BookingSnapshot {
            booking_id: args.booking_id,
            user_email: args.email.clone(),
            listing_name: args.listing.clone(),
            check_in: args.check_in,
            check_out: args.check_out,
            guests: args.guests,
        };

        let envelope = self
            .producer()
            .submit(&snapshot)
            .await
            .context("提交预订确认通知失败")?;
        Ok(envelope)
    }

    /// 按 `email.backend` 创建邮件传输
    pub fn build_transport(config: &EmailConfig) -> Result<Arc<dyn EmailTransport>> {
        let transport: Arc<dyn EmailTransport> = match config.backend {
            EmailBackend::Smtp => {
                info!("使用SMTP邮件传输: {}:{}", config.host, config.port);
                Arc::new(SmtpTransport::new(config).context("创建SMTP邮件传输失败")?)
            }
            EmailBackend::Console => {
                info!("使用控制台邮件传输");
                Arc::new(ConsoleTransport::new(config.from_header()))
            }
        };
        Ok(transport)
    }

    /// 注册内置处理器并按 `worker.tasks` 裁剪
    pub fn build_registry(&self, transport: Arc<dyn EmailTransport>) -> Result<HandlerRegistry> {
        let registry = HandlerRegistry::from_handlers(builtin_handlers(transport))?;
        let registry = registry
            .restrict_to(&self.config.worker.tasks)
            .context("任务处理器注册失败")?;
        Ok(registry)
    }

    /// 合并命令行覆盖项后构建Worker进程池
    pub fn build_pool(
        &self,
        args: &WorkerArgs,
        transport: Arc<dyn EmailTransport>,
    ) -> Result<WorkerPool> {
        let mut config = self.config.clone();
        if let Some(queue) = &args.queue {
            config.broker.queue = queue.clone();
        }
        if let Some(concurrency) = args.concurrency {
            config.worker.concurrency = concurrency;
        }
        if args.solo {
            config.worker.concurrency = 1;
        }
        config.validate().context("Worker参数无效")?;

        let worker_id = args
            .worker_id
            .clone()
            .or_else(|| config.worker.worker_id.clone())
            .unwrap_or_else(default_worker_id);

        let registry = Arc::new(self.build_registry(transport)?);
        let dispatcher = Dispatcher::new(
            self.broker.clone(),
            registry,
            DispatcherSettings::from_app_config(&config, worker_id),
        );
        Ok(WorkerPool::new(dispatcher, PoolSettings::from_app_config(&config)))
    }

    /// 运行Worker直到收到关闭信号
    pub async fn run_worker(&self, args: &WorkerArgs, shutdown: &ShutdownManager) -> Result<()> {
        let transport = Self::build_transport(&self.config.email)?;
        let pool = self.build_pool(args, transport)?;

        let queue = args.queue.as_deref().unwrap_or(&self.config.broker.queue);
        self.broker
            .declare_queue(queue)
            .await
            .with_context(|| format!("声明队列 {queue} 失败"))?;

        if args.solo {
            let grace = Duration::from_secs(self.config.worker.shutdown_grace_seconds);
            let run = pool.run_solo();
            tokio::pin!(run);

            tokio::select! {
                result = &mut run => result?,
                _ = shutdown.wait() => {
                    pool.trigger_shutdown();
                    match tokio::time::timeout(grace, run).await {
                        Ok(result) => result?,
                        Err(_) => warn!("等待进行中任务超过 {:?}，强制停止", grace),
                    }
                }
            }
        } else {
            pool.start().await?;
            shutdown.wait().await;
            pool.stop().await?;
        }

        info!("Worker {} 已退出", pool.worker_id());
        Ok(())
    }

    /// 收集在线Worker的心跳
    pub async fn inspect(&self, wait: Duration) -> Result<Vec<WorkerHeartbeat>> {
        let heartbeats =
            collect_heartbeats(&self.broker, &self.config.broker.heartbeat_queue, wait)
                .await
                .context("读取Worker心跳失败")?;

        if heartbeats.is_empty() {
            return Err(anyhow::anyhow!(
                "{} 秒内没有Worker响应",
                wait.as_secs()
            ));
        }
        Ok(heartbeats)
    }

    pub async fn close(&self) {
        if let Err(e) = self.broker.close().await {
            warn!("关闭消息代理连接失败: {}", e);
        }
    }
}

/// 默认Worker ID: 主机名-进程号
pub fn default_worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}-{}", host, std::process::id())
}

/// 把心跳整理成命令行输出
pub fn render_inspection(
    action: InspectAction,
    heartbeats: &[WorkerHeartbeat],
    now: DateTime<Utc>,
) -> Vec<String> {
    heartbeats
        .iter()
        .map(|hb| match action {
            InspectAction::Ping => format!(
                "{}@{}: pong (队列 {}，{} 秒前，进行中 {}/{})",
                hb.worker_id,
                hb.hostname,
                hb.queue,
                hb.age_seconds(now),
                hb.active_tasks,
                hb.concurrency
            ),
            InspectAction::Registered => {
                format!("{}: {}", hb.worker_id, hb.registered_tasks.join(", "))
            }
        })
        .collect()
}

/// 配置了监听地址时启动Prometheus指标导出器
pub fn install_metrics_exporter(config: &ObservabilityConfig) -> Result<()> {
    let Some(addr) = &config.metrics_bind_address else {
        return Ok(());
    };

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("无效的指标监听地址: {addr}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("启动Prometheus指标导出器失败")?;

    info!("Prometheus指标导出器监听于 {}", addr);
    Ok(())
}
