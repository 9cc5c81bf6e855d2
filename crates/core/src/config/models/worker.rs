use serde::{Deserialize, Serialize};

use crate::models::{BOOKING_CONFIRMATION_TASK, PAYMENT_CONFIRMATION_TASK};

/// 停止时在最长任务超时之外为 ack/nack 预留的时间（秒）
pub const SHUTDOWN_ACK_MARGIN_SECONDS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 未配置时使用 主机名-进程号
    pub worker_id: Option<String>,
    /// 并发的分发循环数量
    pub concurrency: usize,
    /// 默认任务执行超时（秒）
    pub task_timeout_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    /// 关闭时等待在途任务的时间（秒），不得小于最长任务超时加上 ack 余量
    pub shutdown_grace_seconds: u64,
    /// 本Worker负责的任务名，启动时校验均已注册
    pub tasks: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            concurrency: 4,
            task_timeout_seconds: 30,
            heartbeat_interval_seconds: 10,
            shutdown_grace_seconds: 35,
            tasks: vec![
                BOOKING_CONFIRMATION_TASK.to_string(),
                PAYMENT_CONFIRMATION_TASK.to_string(),
            ],
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(id) = &self.worker_id {
            if id.trim().is_empty() {
                return Err(anyhow::anyhow!("Worker ID不能为空"));
            }
        }

        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("并发数必须大于0"));
        }

        if self.task_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.tasks.is_empty() {
            return Err(anyhow::anyhow!("Worker任务列表不能为空"));
        }

        Ok(())
    }
}
