pub mod email;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;

pub use email::*;
pub use in_memory_queue::InMemoryBroker;
pub use message_queue::RabbitMqBroker;
pub use message_queue_factory::BrokerFactory;
