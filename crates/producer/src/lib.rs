pub mod producer;

pub use producer::{NotificationProducer, ProducerConfig};
