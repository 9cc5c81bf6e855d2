use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskEnvelope;

/// 进入死信的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// 暂时性失败次数达到max_attempts
    RetriesExhausted,
    /// 处理器返回永久性错误
    PermanentFailure,
    /// 没有注册对应任务名的处理器
    UnknownTask,
    /// 消息体无法反序列化为任务信封
    Undecodable,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::RetriesExhausted => "retries_exhausted",
            DeadLetterReason::PermanentFailure => "permanent_failure",
            DeadLetterReason::UnknownTask => "unknown_task",
            DeadLetterReason::Undecodable => "undecodable",
        }
    }
}

/// 死信记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub reason: DeadLetterReason,
    pub error: String,
    /// 可解码时保存完整信封
    pub envelope: Option<TaskEnvelope>,
    /// 无法解码时保存原始消息体
    pub raw_body: Option<String>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn for_envelope(
        envelope: &TaskEnvelope,
        reason: DeadLetterReason,
        error: impl Into<String>,
    ) -> Self {
        Self {
            reason,
            error: error.into(),
            envelope: Some(envelope.clone()),
            raw_body: None,
            dead_lettered_at: Utc::now(),
        }
    }

    pub fn undecodable(raw: &[u8], error: impl Into<String>) -> Self {
        Self {
            reason: DeadLetterReason::Undecodable,
            error: error.into(),
            envelope: None,
            raw_body: Some(String::from_utf8_lossy(raw).into_owned()),
            dead_lettered_at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> Option<uuid::Uuid> {
        self.envelope.as_ref().map(|e| e.task_id())
    }
}
