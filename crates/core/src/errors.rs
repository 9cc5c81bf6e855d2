use thiserror::Error;

/// 错误类别，供重试策略判断是否值得再次尝试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 暂时性错误，稍后重试可能成功
    Transient,
    /// 永久性错误，重试无济于事
    Permanent,
}

/// 通知管道错误类型定义
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("消息代理不可用: {0}")]
    BrokerUnavailable(String),

    #[error("未注册的任务: {name}")]
    UnknownTask { name: String },

    #[error("暂时性发送失败: {0}")]
    TransientSend(String),

    #[error("永久性发送失败: {0}")]
    PermanentSend(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("通知入队失败: {source}")]
    NotificationQueue {
        #[source]
        source: Box<NotifierError>,
    },

    #[error("无效的任务参数: {0}")]
    InvalidPayload(String),

    #[error("任务执行超时 ({seconds}s)")]
    HandlerTimeout { seconds: u64 },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl NotifierError {
    /// 包装为生产者对外暴露的入队错误
    pub fn notification_queue(source: NotifierError) -> Self {
        NotifierError::NotificationQueue {
            source: Box::new(source),
        }
    }

    /// 错误类别
    ///
    /// 代理不可用、发送暂时失败以及执行超时视为暂时性错误，其余均为永久性错误。
    pub fn kind(&self) -> ErrorKind {
        match self {
            NotifierError::BrokerUnavailable(_)
            | NotifierError::TransientSend(_)
            | NotifierError::HandlerTimeout { .. } => ErrorKind::Transient,
            NotifierError::NotificationQueue { source } => source.kind(),
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<serde_json::Error> for NotifierError {
    fn from(e: serde_json::Error) -> Self {
        NotifierError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, NotifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            NotifierError::TransientSend("timeout".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            NotifierError::HandlerTimeout { seconds: 30 }.kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            NotifierError::PermanentSend("bad recipient".into()).kind(),
            ErrorKind::Permanent
        );
        assert_eq!(
            NotifierError::UnknownTask { name: "x".into() }.kind(),
            ErrorKind::Permanent
        );
        assert_eq!(
            NotifierError::Serialization("eof".into()).kind(),
            ErrorKind::Permanent
        );
    }

    #[test]
    fn test_notification_queue_wraps_source() {
        let err = NotifierError::notification_queue(NotifierError::BrokerUnavailable(
            "connection refused".into(),
        ));
        assert!(err.is_transient());
        assert!(err.to_string().contains("connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
