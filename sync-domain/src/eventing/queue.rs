//! 消息队列（MessageQueue）协议
//!
//! 拉取式队列抽象，语义对齐常见托管队列：
//! - `receive` 取出的消息在可见性超时内对其他消费者不可见；
//! - 只有 `delete` 才会真正确认消息，否则超时后重新可见（至少一次投递）。
//!
use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// 从队列中取出的一条消息
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueMessage {
    /// 消息唯一标识
    pub message_id: String,
    /// 本次接收的回执，用于删除
    pub receipt_handle: String,
    /// 原始消息体
    pub body: String,
    /// 累计被接收次数（含本次）
    pub receive_count: u32,
    /// 入队时间
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn queue_name(&self) -> &str;

    /// 发送一条消息体（原样保存）
    async fn send(&self, body: &str) -> SyncResult<()>;

    /// 接收至多 `max_messages` 条当前可见的消息
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> SyncResult<Vec<QueueMessage>>;

    /// 以回执删除（确认）消息
    async fn delete(&self, receipt_handle: &str) -> SyncResult<()>;
}
