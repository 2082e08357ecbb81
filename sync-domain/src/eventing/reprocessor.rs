//! 死信重放器（DeadLetterReprocessor）
//!
//! 循环拉取死信队列中的消息，经同一派发路径重放：
//! - 成功则删除；
//! - 失败则留在原处，可见性超时后重新可见，便于人工排查或下一轮重放；
//! - 某次拉取返回空批次时结束。
//!
use super::dispatcher::{Dispatcher, DrainReport};
use super::queue::MessageQueue;
use crate::error::SyncResult;
use std::sync::Arc;

pub struct DeadLetterReprocessor {
    dispatcher: Arc<Dispatcher>,
}

impl DeadLetterReprocessor {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// 重放派发器配置的死信队列
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let queue = self.dispatcher.dead_letter_queue().clone();
        self.drain_queue(queue.as_ref()).await
    }

    /// 以死信策略重放任意具名队列（例如按环境迁移过来的旧死信队列）
    pub async fn drain_queue(&self, queue: &dyn MessageQueue) -> SyncResult<DrainReport> {
        tracing::info!(queue = queue.queue_name(), "replaying dead-letter queue");
        self.dispatcher.drain_queue(queue, true).await
    }
}
