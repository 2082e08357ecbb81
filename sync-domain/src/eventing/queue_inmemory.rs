//! 内存版消息队列（InMemoryQueue）
//!
//! 满足 `MessageQueue` 协议的轻量实现，保留可见性超时与接收计数语义：
//! - `receive`：取出可见消息，设置新的可见时间并生成新回执；
//! - `delete`：只接受最新回执，过期回执视为空操作；
//! - 时间基于 `tokio::time::Instant`，测试中可配合 `tokio::time::pause` 推进。
//!
//! 典型用途：测试环境、示例与本地验证。

use crate::error::SyncResult;
use crate::eventing::{MessageQueue, QueueMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: String,
    sent_at: DateTime<Utc>,
    visible_at: Instant,
    receipt_handle: Option<String>,
    receive_count: u32,
}

/// 简单的内存队列实现
#[derive(Clone)]
pub struct InMemoryQueue {
    name: String,
    messages: Arc<Mutex<Vec<StoredMessage>>>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StoredMessage>> {
        // 持锁期间不会 panic，中毒时直接沿用内部数据
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 队列中剩余消息数（含不可见消息）
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 当前可见消息数
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.lock().iter().filter(|m| m.visible_at <= now).count()
    }

    /// 全部消息体快照（按入队顺序）
    pub fn bodies(&self) -> Vec<String> {
        self.lock().iter().map(|m| m.body.clone()).collect()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str) -> SyncResult<()> {
        self.lock().push(StoredMessage {
            message_id: Uuid::new_v4().to_string(),
            body: body.to_string(),
            sent_at: Utc::now(),
            visible_at: Instant::now(),
            receipt_handle: None,
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> SyncResult<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut guard = self.lock();

        let received = guard
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_messages)
            .map(|m| {
                let receipt = Uuid::new_v4().to_string();
                m.visible_at = now + visibility_timeout;
                m.receipt_handle = Some(receipt.clone());
                m.receive_count += 1;
                QueueMessage {
                    message_id: m.message_id.clone(),
                    receipt_handle: receipt,
                    body: m.body.clone(),
                    receive_count: m.receive_count,
                    sent_at: m.sent_at,
                }
            })
            .collect();

        Ok(received)
    }

    async fn delete(&self, receipt_handle: &str) -> SyncResult<()> {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
        if guard.len() == before {
            tracing::debug!(queue = %self.name, receipt_handle, "stale receipt, nothing deleted");
        }
        Ok(())
    }
}
