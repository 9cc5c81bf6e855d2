//! 配置加载
//!
//! 配置来源按优先级从低到高：内置默认值、TOML配置文件、`NOTIFIER__` 前缀的环境变量。

pub mod models;

pub use models::*;
