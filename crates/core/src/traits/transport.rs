use async_trait::async_trait;

use crate::Result;

/// 待发送的邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// 由任务ID派生的确定性Message-ID，重复投递时保持不变
    pub message_id: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// 发送回执
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendReceipt {
    Delivered,
    /// 传输层识别出相同Message-ID，跳过了重复发送
    Duplicate,
}

/// 邮件传输接口（外部协作方的适配层）
#[async_trait]
pub trait EmailTransport: Send + Sync {
    fn name(&self) -> &str;

    /// 发送邮件，暂时性故障返回 `TransientSend`，收件人或内容无效返回 `PermanentSend`
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt>;
}
