pub mod booking_confirmation;
pub mod payment_confirmation;

use std::sync::Arc;

use lettre::Address;
use notifier_core::{
    traits::{EmailTransport, OutgoingEmail, SendReceipt, TaskHandler},
    NotifierError, Result,
};
use uuid::Uuid;

pub use booking_confirmation::BookingConfirmationHandler;
pub use payment_confirmation::PaymentConfirmationHandler;

/// 邮件签名
pub(crate) const SIGNATURE: &str = "Best regards,\nALX Travel App Team";

/// 由任务ID派生Message-ID，同一任务的每次投递都相同
pub fn message_id_for(task_id: Uuid) -> String {
    format!("<{task_id}@notifier>")
}

/// 内置的邮件处理器
pub fn builtin_handlers(transport: Arc<dyn EmailTransport>) -> Vec<Arc<dyn TaskHandler>> {
    vec![
        Arc::new(BookingConfirmationHandler::new(transport.clone())),
        Arc::new(PaymentConfirmationHandler::new(transport)),
    ]
}

/// 校验收件人后交给传输层发送
pub(crate) async fn deliver(
    transport: &dyn EmailTransport,
    email: &OutgoingEmail,
) -> Result<SendReceipt> {
    email.to.parse::<Address>().map_err(|e| {
        NotifierError::PermanentSend(format!("收件人地址无效 {:?}: {e}", email.to))
    })?;

    transport.send(email).await
}
