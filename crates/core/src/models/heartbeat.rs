use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker心跳，供巡检接口判断存活状态与已注册任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub hostname: String,
    pub queue: String,
    pub concurrency: usize,
    pub registered_tasks: Vec<String>,
    pub active_tasks: usize,
    pub started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl WorkerHeartbeat {
    /// 心跳距今的秒数
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds().max(0)
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            crate::NotifierError::Serialization(format!("序列化心跳失败: {e}"))
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            crate::NotifierError::Serialization(format!("反序列化心跳失败: {e}"))
        })
    }
}
