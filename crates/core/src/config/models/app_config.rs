use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    broker::BrokerConfig,
    email::EmailConfig,
    observability::ObservabilityConfig,
    retry::{RetryConfig, TaskOptions},
    worker::{WorkerConfig, SHUTDOWN_ACK_MARGIN_SECONDS},
};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "NOTIFIER";

/// 默认配置文件搜索路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/notifier.toml",
    "notifier.toml",
    "/etc/notifier/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub retry: RetryConfig,
    /// 按任务名覆盖重试次数与超时
    pub tasks: Vec<TaskOptions>,
    pub worker: WorkerConfig,
    pub email: EmailConfig,
    pub observability: ObservabilityConfig,
}

/// 合并默认值与覆盖后的单个任务配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTaskOptions {
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: NOTIFIER__, separator: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                info!("加载配置文件: {}", path);
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            info!("加载默认位置的配置文件: {}", path);
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            debug!("未找到配置文件，使用内置默认值");
        }

        // 环境变量优先级最高，例如 NOTIFIER__BROKER__URL、NOTIFIER__RETRY__MAX_ATTEMPTS
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("worker.tasks")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.broker.validate().context("消息代理配置验证失败")?;
        self.retry.validate().context("重试配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.email.validate().context("邮件配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            task.validate().context("任务配置验证失败")?;
            if !seen.insert(task.name.as_str()) {
                return Err(anyhow::anyhow!("任务 {} 重复配置", task.name));
            }
        }

        // 停止时在途任务必须能在宽限期内完成或超时，并留出 ack/nack 的时间
        let required_grace = self.max_task_timeout_seconds() + SHUTDOWN_ACK_MARGIN_SECONDS;
        if self.worker.shutdown_grace_seconds < required_grace {
            return Err(anyhow::anyhow!(
                "worker.shutdown_grace_seconds ({}) 必须不小于最长任务超时加 {} 秒 ({})",
                self.worker.shutdown_grace_seconds,
                SHUTDOWN_ACK_MARGIN_SECONDS,
                required_grace
            ));
        }

        Ok(())
    }

    /// 默认超时与各任务覆盖值中的最大者（秒）
    pub fn max_task_timeout_seconds(&self) -> u64 {
        self.tasks
            .iter()
            .filter_map(|task| task.timeout_seconds)
            .fold(self.worker.task_timeout_seconds, u64::max)
    }

    /// 解析指定任务的最大尝试次数与超时，未覆盖的字段使用全局默认值
    pub fn task_options(&self, task_name: &str) -> ResolvedTaskOptions {
        let overrides = self.tasks.iter().find(|t| t.name == task_name);

        ResolvedTaskOptions {
            max_attempts: overrides
                .and_then(|t| t.max_attempts)
                .unwrap_or(self.retry.max_attempts),
            timeout: Duration::from_secs(
                overrides
                    .and_then(|t| t.timeout_seconds)
                    .unwrap_or(self.worker.task_timeout_seconds),
            ),
        }
    }
}
