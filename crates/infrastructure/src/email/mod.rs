//! 邮件传输适配层

pub mod console;
pub mod smtp;

use std::collections::{HashSet, VecDeque};

use tokio::sync::Mutex;

pub use console::ConsoleTransport;
pub use smtp::SmtpTransport;

/// 最近发送过的Message-ID，容量有限，超出后淘汰最早的记录
///
/// 只能在单进程内识别重复投递，跨进程的去重依赖收件方按Message-ID合并。
#[derive(Debug)]
pub struct SentLog {
    capacity: usize,
    inner: Mutex<SentLogInner>,
}

#[derive(Debug, Default)]
struct SentLogInner {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SentLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(SentLogInner::default()),
        }
    }

    pub async fn contains(&self, message_id: &str) -> bool {
        self.inner.lock().await.ids.contains(message_id)
    }

    /// 记录已发送的Message-ID，已存在时返回false
    pub async fn record(&self, message_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.ids.insert(message_id.to_string()) {
            return false;
        }
        inner.order.push_back(message_id.to_string());

        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.ids.remove(&oldest);
            }
        }
        true
    }
}

impl Default for SentLog {
    fn default() -> Self {
        Self::new(4096)
    }
}
