use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TaskEnvelope;

/// 单次投递的结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Succeeded,
    /// 暂时失败，消息已重新入队等待再次投递
    FailedTransient,
    /// 永久失败，消息已进入死信
    FailedPermanent,
}

impl OutcomeStatus {
    /// succeeded 与 failed_permanent 是终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutcomeStatus::Succeeded | OutcomeStatus::FailedPermanent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Pending => "pending",
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::FailedTransient => "failed_transient",
            OutcomeStatus::FailedPermanent => "failed_permanent",
        }
    }
}

/// 投递结果（仅用于日志与调用方观察，不持久化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub task_id: Uuid,
    pub task_name: String,
    pub status: OutcomeStatus,
    pub attempt_count: u32,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl DeliveryOutcome {
    fn from_envelope(envelope: &TaskEnvelope, status: OutcomeStatus, error: Option<String>) -> Self {
        Self {
            task_id: envelope.task_id(),
            task_name: envelope.task_name().to_string(),
            status,
            attempt_count: envelope.attempt_count(),
            error,
            completed_at: Utc::now(),
        }
    }

    pub fn succeeded(envelope: &TaskEnvelope) -> Self {
        Self::from_envelope(envelope, OutcomeStatus::Succeeded, None)
    }

    pub fn failed_transient(envelope: &TaskEnvelope, error: impl Into<String>) -> Self {
        Self::from_envelope(envelope, OutcomeStatus::FailedTransient, Some(error.into()))
    }

    pub fn failed_permanent(envelope: &TaskEnvelope, error: impl Into<String>) -> Self {
        Self::from_envelope(envelope, OutcomeStatus::FailedPermanent, Some(error.into()))
    }
}
