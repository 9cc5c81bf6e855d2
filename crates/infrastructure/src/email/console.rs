use async_trait::async_trait;
use notifier_core::{
    traits::{EmailTransport, OutgoingEmail, SendReceipt},
    Result,
};
use tokio::sync::Mutex;
use tracing::info;

use super::SentLog;

/// 控制台邮件传输：把邮件写入日志而不真正发送，用于开发环境
#[derive(Debug, Default)]
pub struct ConsoleTransport {
    from: String,
    sent_log: SentLog,
    outbox: Mutex<Vec<OutgoingEmail>>,
}

impl ConsoleTransport {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            sent_log: SentLog::default(),
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// 已"发送"的邮件
    pub async fn outbox(&self) -> Vec<OutgoingEmail> {
        self.outbox.lock().await.clone()
    }
}

#[async_trait]
impl EmailTransport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt> {
        if !self.sent_log.record(&email.message_id).await {
            info!(message_id = %email.message_id, "邮件已发送过，跳过重复发送");
            return Ok(SendReceipt::Duplicate);
        }

        info!(
            message_id = %email.message_id,
            from = %self.from,
            to = %email.to,
            subject = %email.subject,
            "\n{}",
            email.body
        );
        self.outbox.lock().await.push(email.clone());
        Ok(SendReceipt::Delivered)
    }
}
