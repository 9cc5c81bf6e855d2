use serde::{Deserialize, Serialize};

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// 默认最大尝试次数（包含第一次执行）
    pub max_attempts: u32,
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow::anyhow!(
                "最大重试间隔 {}ms 小于基础间隔 {}ms",
                self.max_delay_ms,
                self.base_delay_ms
            ));
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!(
                "退避倍数必须不小于1.0: {}",
                self.backoff_multiplier
            ));
        }

        Ok(())
    }
}

/// 单个任务类型的覆盖配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskOptions {
    pub name: String,
    pub max_attempts: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl TaskOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("任务名称不能为空"));
        }

        if self.max_attempts == Some(0) {
            return Err(anyhow::anyhow!("任务 {} 的最大尝试次数必须大于0", self.name));
        }

        if self.timeout_seconds == Some(0) {
            return Err(anyhow::anyhow!("任务 {} 的超时时间必须大于0", self.name));
        }

        Ok(())
    }
}
