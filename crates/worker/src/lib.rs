pub mod dispatcher;
pub mod handlers;
pub mod pool;
pub mod registry;

pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use handlers::{
    builtin_handlers, message_id_for, BookingConfirmationHandler, PaymentConfirmationHandler,
};
pub use pool::{collect_heartbeats, PoolSettings, WorkerPool};
pub use registry::HandlerRegistry;
