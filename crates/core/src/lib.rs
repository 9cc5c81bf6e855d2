pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod retry_policy;
pub mod traits;

pub use errors::*;
pub use models::{
    BookingSnapshot, DeadLetterEntry, DeadLetterReason, DeliveryOutcome, OutcomeStatus, Payload,
    PaymentSnapshot, PayloadValue, TaskEnvelope, WorkerHeartbeat,
};
pub use retry_policy::{ReconnectBackoff, RetryDecision, RetryPolicy};
pub use traits::{
    AckHandle, Broker, Delivery, DeliveryStream, EmailTransport, NackAction, OutgoingEmail,
    SendReceipt, TaskContext, TaskHandler,
};
