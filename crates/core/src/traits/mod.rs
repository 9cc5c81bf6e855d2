pub mod broker;
pub mod task_handler;
pub mod transport;

pub use broker::*;
pub use task_handler::*;
pub use transport::*;
