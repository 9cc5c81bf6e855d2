use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    models::{Payload, TaskEnvelope},
    Result,
};

/// 处理器执行上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    pub task_name: String,
    /// 当前是第几次尝试（从1开始）
    pub attempt: u32,
    pub max_attempts: u32,
    pub worker_id: String,
}

impl TaskContext {
    pub fn from_envelope(envelope: &TaskEnvelope, worker_id: &str) -> Self {
        Self {
            task_id: envelope.task_id(),
            task_name: envelope.task_name().to_string(),
            attempt: envelope.attempt_count(),
            max_attempts: envelope.max_attempts(),
            worker_id: worker_id.to_string(),
        }
    }
}

/// 任务处理器接口
///
/// 实现必须是幂等的：至少一次投递意味着同一参数可能被处理多次。
/// 失败时返回 `TransientSend`（可重试）或 `PermanentSend`/`InvalidPayload`（不可重试）。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 注册使用的任务名
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn handle(&self, ctx: &TaskContext, payload: &Payload) -> Result<()>;
}
