//! 基于 pgmq 扩展的消息队列（PgmqQueue）
//!
//! 通过 sqlx 调用 `pgmq.send/read/delete`，回执即 `msg_id`。
//! 消息体以 jsonb 字符串保存，保证死信转发时原样保留；其他生产者写入的
//! jsonb 对象在读取时序列化为字符串。
//!
use crate::error::{SyncError, SyncResult};
use crate::eventing::{MessageQueue, QueueMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;

#[derive(Clone)]
pub struct PgmqQueue {
    name: String,
    pool: PgPool,
}

impl PgmqQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    /// 队列不存在时创建（pgmq.create 幂等）
    pub async fn ensure_exists(&self) -> SyncResult<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(&self.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn body_of(message: Value) -> String {
    match message {
        Value::String(body) => body,
        other => other.to_string(),
    }
}

#[async_trait]
impl MessageQueue for PgmqQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str) -> SyncResult<()> {
        sqlx::query("SELECT pgmq.send($1, $2)")
            .bind(&self.name)
            .bind(Value::String(body.to_string()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> SyncResult<Vec<QueueMessage>> {
        let vt = i32::try_from(visibility_timeout.as_secs())
            .map_err(|_| SyncError::queue(&self.name, "visibility timeout too large"))?;
        let qty = i32::try_from(max_messages)
            .map_err(|_| SyncError::queue(&self.name, "batch size too large"))?;

        let rows: Vec<(i64, i32, DateTime<Utc>, Value)> = sqlx::query_as(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, $3)",
        )
        .bind(&self.name)
        .bind(vt)
        .bind(qty)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(msg_id, read_ct, enqueued_at, message)| QueueMessage {
                message_id: msg_id.to_string(),
                receipt_handle: msg_id.to_string(),
                body: body_of(message),
                receive_count: u32::try_from(read_ct).unwrap_or_default(),
                sent_at: enqueued_at,
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> SyncResult<()> {
        let msg_id: i64 = receipt_handle.parse().map_err(|_| {
            SyncError::queue(&self.name, format!("invalid receipt handle {receipt_handle}"))
        })?;

        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1, $2)")
            .bind(&self.name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await?;
        if !deleted {
            tracing::debug!(queue = %self.name, msg_id, "message already deleted");
        }
        Ok(())
    }
}
