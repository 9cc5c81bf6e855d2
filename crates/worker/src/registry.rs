use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use notifier_core::{traits::TaskHandler, NotifierError, Result};
use tracing::info;

/// 任务处理器注册表
///
/// 在启动时构建，之后只读，由所有分发循环共享。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从处理器列表构建，任务名重复时报错
    pub fn from_handlers(handlers: impl IntoIterator<Item = Arc<dyn TaskHandler>>) -> Result<Self> {
        let mut registry = Self::new();
        for handler in handlers {
            registry.register(handler)?;
        }
        Ok(registry)
    }

    /// 注册任务处理器
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(NotifierError::Configuration(format!(
                "任务处理器重复注册: {name}"
            )));
        }

        info!("注册任务处理器: {}", name);
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, task_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_name).cloned()
    }

    pub fn contains(&self, task_name: &str) -> bool {
        self.handlers.contains_key(task_name)
    }

    /// 已注册的任务名，按字母排序
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 保留配置中启用的任务，任一任务未注册时报错
    pub fn restrict_to(&self, tasks: &[String]) -> Result<Self> {
        let missing: Vec<&str> = tasks
            .iter()
            .filter(|name| !self.contains(name))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            return Err(NotifierError::Configuration(format!(
                "配置的任务没有对应的处理器: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            handlers: self
                .handlers
                .iter()
                .filter(|(name, _)| tasks.contains(name))
                .map(|(name, handler)| (name.clone(), handler.clone()))
                .collect(),
        })
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}
