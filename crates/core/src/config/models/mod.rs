pub mod app_config;
pub mod broker;
pub mod email;
pub mod observability;
pub mod retry;
pub mod worker;

pub use app_config::*;
pub use broker::*;
pub use email::*;
pub use observability::*;
pub use retry::*;
pub use worker::*;
