use std::sync::Arc;

use async_trait::async_trait;
use notifier_core::{
    models::{BookingSnapshot, Payload, BOOKING_CONFIRMATION_TASK},
    traits::{EmailTransport, OutgoingEmail, TaskContext, TaskHandler},
    Result,
};
use tracing::{error, info};
use uuid::Uuid;

use super::{deliver, message_id_for, SIGNATURE};

/// 预订确认邮件处理器
pub struct BookingConfirmationHandler {
    transport: Arc<dyn EmailTransport>,
}

impl BookingConfirmationHandler {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }

    pub fn render(task_id: Uuid, booking: &BookingSnapshot) -> OutgoingEmail {
        let guests = booking
            .guests
            .map(|g| format!("Guests: {g}\n"))
            .unwrap_or_default();

        let body = format!(
            "Dear Customer,\n\
             \n\
             Thank you for your booking!\n\
             \n\
             Booking Details:\n\
             ----------------\n\
             Booking ID: {}\n\
             Property: {}\n\
             Check-in Date: {}\n\
             Check-out Date: {}\n\
             {}\
             \n\
             Your booking has been confirmed. We look forward to hosting you!\n\
             \n\
             If you have any questions, please don't hesitate to contact us.\n\
             \n\
             {}\n",
            booking.booking_id,
            booking.listing_name,
            booking.check_in.format("%Y-%m-%d"),
            booking.check_out.format("%Y-%m-%d"),
            guests,
            SIGNATURE,
        );

        OutgoingEmail {
            message_id: message_id_for(task_id),
            to: booking.user_email.clone(),
            subject: format!("Booking Confirmation - {}", booking.listing_name),
            body,
        }
    }
}

#[async_trait]
impl TaskHandler for BookingConfirmationHandler {
    fn name(&self) -> &str {
        BOOKING_CONFIRMATION_TASK
    }

    fn description(&self) -> &str {
        "发送预订确认邮件"
    }

    async fn handle(&self, ctx: &TaskContext, payload: &Payload) -> Result<()> {
        let booking = BookingSnapshot::from_payload(payload)?;
        let email = Self::render(ctx.task_id, &booking);

        match deliver(self.transport.as_ref(), &email).await {
            Ok(receipt) => {
                info!(
                    booking_id = booking.booking_id,
                    task_id = %ctx.task_id,
                    attempt = ctx.attempt,
                    receipt = ?receipt,
                    "预订确认邮件已发送至 {}",
                    booking.user_email
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    booking_id = booking.booking_id,
                    task_id = %ctx.task_id,
                    attempt = ctx.attempt,
                    "预订确认邮件发送失败: {}",
                    e
                );
                Err(e)
            }
        }
    }
}
