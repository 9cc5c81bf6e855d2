use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, Error as SmtpError},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use notifier_core::{
    config::{EmailConfig, SmtpSecurity},
    traits::{EmailTransport, OutgoingEmail, SendReceipt},
    NotifierError, Result,
};
use tracing::{debug, info, warn};

use super::SentLog;

/// SMTP邮件传输
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    sent_log: SentLog,
}

impl SmtpTransport {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let builder = match config.security {
            SmtpSecurity::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| NotifierError::Configuration(format!("SMTP STARTTLS配置错误: {e}")))?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotifierError::Configuration(format!("SMTP TLS配置错误: {e}")))?,
            SmtpSecurity::None => {
                warn!("SMTP连接未加密: {}:{}", config.host, config.port);
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            }
        };

        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_seconds)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from = config
            .from_header()
            .parse::<Mailbox>()
            .map_err(|e| NotifierError::Configuration(format!("发件人地址无效: {e}")))?;

        info!(
            "SMTP邮件传输已配置: {}:{} ({:?})",
            config.host, config.port, config.security
        );

        Ok(Self {
            transport: builder.build(),
            from,
            sent_log: SentLog::default(),
        })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|e| NotifierError::PermanentSend(format!("收件人地址无效 {}: {e}", email.to)))?;

        Message::builder()
            .message_id(Some(email.message_id.clone()))
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| NotifierError::PermanentSend(format!("构建邮件失败: {e}")))
    }
}

/// 按SMTP错误类别区分暂时性与永久性失败
///
/// 5xx响应视为永久失败；4xx响应、超时、连接与TLS错误均可重试。
pub(crate) fn classify_smtp_error(error: &SmtpError) -> NotifierError {
    if error.is_permanent() {
        NotifierError::PermanentSend(format!("SMTP永久性错误: {error}"))
    } else {
        NotifierError::TransientSend(format!("SMTP暂时性错误: {error}"))
    }
}

#[async_trait]
impl EmailTransport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt> {
        if self.sent_log.contains(&email.message_id).await {
            debug!(message_id = %email.message_id, "邮件已发送过，跳过重复发送");
            return Ok(SendReceipt::Duplicate);
        }

        let message = self.build_message(email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| classify_smtp_error(&e))?;

        self.sent_log.record(&email.message_id).await;
        debug!(message_id = %email.message_id, to = %email.to, "SMTP发送成功");
        Ok(SendReceipt::Delivered)
    }
}
