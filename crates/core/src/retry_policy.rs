use std::time::Duration;

use crate::{config::RetryConfig, ErrorKind};

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 在给定延迟后重新投递
    RetryAfter(Duration),
    /// 放弃，转入死信
    GiveUp,
}

/// 任务重试策略
///
/// 无状态、确定性：相同输入总是得到相同决策，不引入随机抖动。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 第一次重试前的延迟
    base_delay: Duration,
    /// 延迟上限
    max_delay: Duration,
    /// 指数退避倍数
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff_multiplier: if backoff_multiplier.is_finite() {
                backoff_multiplier.max(1.0)
            } else {
                1.0
            },
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_multiplier,
        )
    }

    /// 根据已尝试次数、上限和错误类别作出决策
    ///
    /// - 永久性错误立即放弃，与尝试次数无关
    /// - 尝试次数达到上限时放弃
    /// - 否则按指数退避计算延迟，并限制在上限之内
    pub fn decide(&self, attempt_count: u32, max_attempts: u32, error_kind: ErrorKind) -> RetryDecision {
        if error_kind == ErrorKind::Permanent {
            return RetryDecision::GiveUp;
        }
        if attempt_count >= max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt_count))
    }

    /// 第 attempt_count 次失败之后的等待时间
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        backoff_delay(
            self.base_delay,
            self.max_delay,
            self.backoff_multiplier,
            attempt_count,
        )
    }
}

/// 进程级重连退避，与任务重试相互独立
///
/// 重连不设次数上限，只限制单次等待时间。
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base_delay: Duration,
    max_delay: Duration,
    failures: u32,
}

impl ReconnectBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            failures: 0,
        }
    }

    /// 记录一次失败并返回下一次等待时间
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        backoff_delay(self.base_delay, self.max_delay, 2.0, self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

fn backoff_delay(base: Duration, max: Duration, multiplier: f64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let scaled = base.as_secs_f64() * multiplier.powi(exponent);
    let capped = scaled.min(max.as_secs_f64());
    if !capped.is_finite() {
        return max;
    }
    Duration::from_secs_f64(capped.max(0.0))
}
