use std::sync::Arc;

use async_trait::async_trait;
use notifier_core::{
    models::{Payload, PaymentSnapshot, PAYMENT_CONFIRMATION_TASK},
    traits::{EmailTransport, OutgoingEmail, TaskContext, TaskHandler},
    Result,
};
use tracing::{error, info};
use uuid::Uuid;

use super::{deliver, message_id_for, SIGNATURE};

/// 支付确认邮件处理器
pub struct PaymentConfirmationHandler {
    transport: Arc<dyn EmailTransport>,
}

impl PaymentConfirmationHandler {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }

    pub fn render(task_id: Uuid, payment: &PaymentSnapshot) -> OutgoingEmail {
        let body = format!(
            "Dear Customer,\n\
             \n\
             We have received your payment. Thank you!\n\
             \n\
             Payment Details:\n\
             ----------------\n\
             Booking Reference: {}\n\
             Property: {}\n\
             Amount Paid: {} {}\n\
             Check-in Date: {}\n\
             Check-out Date: {}\n\
             \n\
             Your booking is now fully paid. We look forward to hosting you!\n\
             \n\
             If you have any questions, please don't hesitate to contact us.\n\
             \n\
             {}\n",
            payment.booking_reference,
            payment.listing_name,
            payment.amount,
            payment.currency,
            payment.check_in.format("%Y-%m-%d"),
            payment.check_out.format("%Y-%m-%d"),
            SIGNATURE,
        );

        OutgoingEmail {
            message_id: message_id_for(task_id),
            to: payment.user_email.clone(),
            subject: format!("Payment Confirmation - {}", payment.listing_name),
            body,
        }
    }
}

#[async_trait]
impl TaskHandler for PaymentConfirmationHandler {
    fn name(&self) -> &str {
        PAYMENT_CONFIRMATION_TASK
    }

    fn description(&self) -> &str {
        "发送支付确认邮件"
    }

    async fn handle(&self, ctx: &TaskContext, payload: &Payload) -> Result<()> {
        let payment = PaymentSnapshot::from_payload(payload)?;
        let email = Self::render(ctx.task_id, &payment);

        match deliver(self.transport.as_ref(), &email).await {
            Ok(receipt) => {
                info!(
                    booking_id = %payment.booking_reference,
                    task_id = %ctx.task_id,
                    attempt = ctx.attempt,
                    receipt = ?receipt,
                    "支付确认邮件已发送至 {}",
                    payment.user_email
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    booking_id = %payment.booking_reference,
                    task_id = %ctx.task_id,
                    attempt = ctx.attempt,
                    "支付确认邮件发送失败: {}",
                    e
                );
                Err(e)
            }
        }
    }
}
