use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{NotifierError, Result};

/// 任务参数中允许出现的基本类型值
///
/// 不接受浮点数：同一参数在多次投递之间必须逐字节一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl PayloadValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PayloadValue::Null)
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::Str(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        PayloadValue::Str(v)
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Int(v)
    }
}

impl From<u32> for PayloadValue {
    fn from(v: u32) -> Self {
        PayloadValue::Int(i64::from(v))
    }
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        PayloadValue::Bool(v)
    }
}

impl<T: Into<PayloadValue>> From<Option<T>> for PayloadValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PayloadValue::Null)
    }
}

/// 任务参数：键有序的字符串到基本类型值的映射
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式添加参数
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PayloadValue)> {
        self.0.iter()
    }

    /// 读取必填的字符串参数
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(PayloadValue::Str(s)) => Ok(s),
            Some(other) => Err(NotifierError::InvalidPayload(format!(
                "参数 {key} 类型错误，期望字符串，实际为 {other:?}"
            ))),
            None => Err(NotifierError::InvalidPayload(format!("缺少参数: {key}"))),
        }
    }

    /// 读取必填的整数参数
    pub fn require_i64(&self, key: &str) -> Result<i64> {
        match self.0.get(key) {
            Some(PayloadValue::Int(v)) => Ok(*v),
            Some(other) => Err(NotifierError::InvalidPayload(format!(
                "参数 {key} 类型错误，期望整数，实际为 {other:?}"
            ))),
            None => Err(NotifierError::InvalidPayload(format!("缺少参数: {key}"))),
        }
    }

    /// 读取可选的整数参数，缺失或为null时返回None
    pub fn optional_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.0.get(key) {
            None | Some(PayloadValue::Null) => Ok(None),
            Some(PayloadValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(NotifierError::InvalidPayload(format!(
                "参数 {key} 类型错误，期望整数，实际为 {other:?}"
            ))),
        }
    }
}

/// 任务信封：在生产者、代理与Worker之间传递的最小工作单元
///
/// 参数在入队后不可变，唯一允许变化的是由Worker推进的尝试次数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    task_id: Uuid,
    task_name: String,
    #[serde(rename = "kwargs")]
    payload: Payload,
    enqueued_at: DateTime<Utc>,
    attempt_count: u32,
    max_attempts: u32,
}

impl TaskEnvelope {
    /// 创建新的任务信封，分配全局唯一的task_id
    pub fn new(task_name: impl Into<String>, payload: Payload, max_attempts: u32) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_name: task_name.into(),
            payload,
            enqueued_at: Utc::now(),
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 记录一次执行尝试，返回新的尝试次数
    pub fn record_attempt(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// 序列化为线上格式（JSON）
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| NotifierError::Serialization(format!("序列化任务信封失败: {e}")))
    }

    /// 从线上格式反序列化
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| NotifierError::Serialization(format!("反序列化任务信封失败: {e}")))
    }
}
