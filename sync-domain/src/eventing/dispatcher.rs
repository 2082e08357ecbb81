//! 事件派发器（Dispatcher）
//!
//! 统一的“解析 → 分类 → 校验 → 处理”路径，提供两种调用模式：
//! - 投递模式（`handle_delivery`）：逐条处理投递信封中的记录，失败时把原始消息体
//!   原样转发到死信队列，不在进程内重试；
//! - 排空模式（`drain`）：直接从具名队列批量拉取，按 [`Disposition`] 决定确认、
//!   转入死信或留在队列等待可见性超时后重投。
//!
//! 单条记录的失败不会影响同批次其他记录。
//!
use super::handler::HandlerRegistry;
use super::queue::{MessageQueue, QueueMessage};
use crate::envelope::{DeliveryEnvelope, EventEnvelope, validate_required_fields};
use crate::error::{ErrorKind, SyncError, SyncResult};
use bon::Builder;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// 派发器配置
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// 排空模式下单次拉取的最大消息数
    pub batch_size: usize,
    /// 排空模式下的可见性超时
    pub visibility_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

impl DispatcherConfig {
    /// 批量大小与可见性超时都必须大于零，否则排空循环无法结束
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::config("batch size must be greater than zero"));
        }
        if self.visibility_timeout.is_zero() {
            return Err(SyncError::config("visibility timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// 单条消息处理结束后的去向
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// 删除（确认）
    Acknowledge,
    /// 转发到死信队列后删除
    DeadLetter,
    /// 留在源队列，等待可见性超时后重投
    Retain,
}

impl Disposition {
    /// 统一的确认策略：
    /// - 成功：确认；
    /// - 分类/校验失败（重放必然同样失败）：转入死信；
    /// - 领域/外部依赖失败：留在源队列。
    ///
    /// 源队列本身就是死信队列时，任何失败都留在原处。
    pub fn decide(result: &SyncResult<()>, source_is_dead_letter: bool) -> Self {
        match result {
            Ok(()) => Disposition::Acknowledge,
            Err(_) if source_is_dead_letter => Disposition::Retain,
            Err(err) if err.kind().is_terminal() => Disposition::DeadLetter,
            Err(_) => Disposition::Retain,
        }
    }
}

/// 单条失败记录
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFailure {
    /// 在批次中的位置（从 0 开始）
    pub index: usize,
    pub message_id: Option<String>,
    pub event_type: Option<String>,
    pub kind: ErrorKind,
    pub reason: String,
}

/// 处理失败且未能转入死信队列的记录，需要由投递方重新投递
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndeliveredRecord {
    pub index: usize,
    pub message_id: Option<String>,
    pub body: String,
}

/// 投递模式的处理结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub processed: usize,
    pub succeeded: usize,
    pub dead_lettered: usize,
    pub failures: Vec<RecordFailure>,
    pub undelivered: Vec<UndeliveredRecord>,
}

impl DeliveryReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// 每条记录要么成功，要么已进入死信队列
    pub fn is_settled(&self) -> bool {
        self.undelivered.is_empty()
    }
}

/// 排空模式的处理结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub batches: usize,
    pub received: usize,
    pub acknowledged: usize,
    pub dead_lettered: usize,
    pub retained: usize,
    /// 已处理（确认或转入死信）但删除失败、仍留在源队列的消息数
    pub unacknowledged: usize,
    pub failures: Vec<RecordFailure>,
}

/// 事件派发器
#[derive(Builder)]
pub struct Dispatcher {
    registry: Arc<dyn HandlerRegistry>,
    dead_letter: Arc<dyn MessageQueue>,
    #[builder(default)]
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn dead_letter_queue(&self) -> &Arc<dyn MessageQueue> {
        &self.dead_letter
    }

    /// 处理一条已解析的事件信封
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> SyncResult<()> {
        let event_type = envelope.event_type();
        let span = tracing::info_span!("dispatch", event_type = %event_type);

        async {
            let handler = self.registry.classify(event_type)?;
            let data = envelope.require_data()?;
            validate_required_fields(event_type, data, handler.required_fields())?;

            handler.handle(data).await?;
            tracing::info!("event processed");
            Ok::<(), SyncError>(())
        }
        .instrument(span)
        .await
    }

    /// 处理一条原始消息体
    pub async fn dispatch_body(&self, body: &str) -> SyncResult<()> {
        self.process_body(body).await.1
    }

    async fn process_body(&self, body: &str) -> (Option<String>, SyncResult<()>) {
        match EventEnvelope::from_body(body) {
            Ok(envelope) => {
                let result = self.dispatch(&envelope).await;
                (Some(envelope.event_type().to_string()), result)
            }
            Err(err) => (None, Err(err)),
        }
    }

    /// 投递模式：逐条处理，失败的原始消息体转发到死信队列
    pub async fn handle_delivery(&self, delivery: &DeliveryEnvelope) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for (index, record) in delivery.records.iter().enumerate() {
            report.processed += 1;

            let (event_type, result) = self.process_body(&record.body).await;
            match result {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    log_failure(index, record.message_id.as_deref(), event_type.as_deref(), &err);
                    if self.forward_to_dead_letter(&record.body).await {
                        report.dead_lettered += 1;
                    } else {
                        report.undelivered.push(UndeliveredRecord {
                            index,
                            message_id: record.message_id.clone(),
                            body: record.body.clone(),
                        });
                    }
                    report.failures.push(RecordFailure {
                        index,
                        message_id: record.message_id.clone(),
                        event_type,
                        kind: err.kind(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            dead_lettered = report.dead_lettered,
            undelivered = report.undelivered.len(),
            "delivery processed"
        );
        report
    }

    /// 投递模式入口：原始投递信封无法解析时记录错误并返回空结果
    pub async fn handle_raw_delivery(&self, raw: &str) -> DeliveryReport {
        match DeliveryEnvelope::from_json(raw) {
            Ok(delivery) => self.handle_delivery(&delivery).await,
            Err(err) => {
                tracing::error!(error = %err, "unable to parse delivery envelope");
                DeliveryReport::default()
            }
        }
    }

    /// 排空模式：从具名队列拉取直到返回空批次
    ///
    /// 传入的队列就是死信队列时按重放策略处理（失败一律留在原处）。
    pub async fn drain(&self, queue: &dyn MessageQueue) -> SyncResult<DrainReport> {
        let source_is_dead_letter = queue.queue_name() == self.dead_letter.queue_name();
        self.drain_queue(queue, source_is_dead_letter).await
    }

    pub(crate) async fn drain_queue(
        &self,
        queue: &dyn MessageQueue,
        source_is_dead_letter: bool,
    ) -> SyncResult<DrainReport> {
        self.config.validate()?;
        let mut report = DrainReport::default();
        let queue_name = queue.queue_name().to_string();
        let mut seen = HashSet::new();

        loop {
            let batch = queue
                .receive(self.config.batch_size, self.config.visibility_timeout)
                .await?;
            let received = batch.len();
            // 本轮已处理过的消息再次出现（可见性超时已过），留给下一轮
            let batch: Vec<_> = batch
                .into_iter()
                .filter(|m| seen.insert(m.message_id.clone()))
                .collect();
            if batch.is_empty() {
                if received > 0 {
                    tracing::info!(
                        queue = %queue_name,
                        redelivered = received,
                        "only already-processed messages left, stopping drain"
                    );
                }
                break;
            }

            report.batches += 1;
            for message in batch {
                let index = report.received;
                report.received += 1;
                self.settle(queue, &message, index, source_is_dead_letter, &mut report)
                    .await;
            }
        }

        tracing::info!(
            queue = %queue_name,
            received = report.received,
            acknowledged = report.acknowledged,
            dead_lettered = report.dead_lettered,
            retained = report.retained,
            unacknowledged = report.unacknowledged,
            "queue drained"
        );
        Ok(report)
    }

    async fn settle(
        &self,
        queue: &dyn MessageQueue,
        message: &QueueMessage,
        index: usize,
        source_is_dead_letter: bool,
        report: &mut DrainReport,
    ) {
        let (event_type, result) = self.process_body(&message.body).await;

        if let Err(err) = &result {
            log_failure(index, Some(&message.message_id), event_type.as_deref(), err);
            report.failures.push(RecordFailure {
                index,
                message_id: Some(message.message_id.clone()),
                event_type,
                kind: err.kind(),
                reason: err.to_string(),
            });
        }

        match Disposition::decide(&result, source_is_dead_letter) {
            Disposition::Acknowledge => {
                if acknowledge(queue, message).await {
                    report.acknowledged += 1;
                } else {
                    report.unacknowledged += 1;
                }
            }
            Disposition::DeadLetter => {
                // 死信发送失败时保留原消息，等待重投
                if !self.forward_to_dead_letter(&message.body).await {
                    report.retained += 1;
                    return;
                }
                report.dead_lettered += 1;
                if !acknowledge(queue, message).await {
                    report.unacknowledged += 1;
                    tracing::warn!(
                        queue = queue.queue_name(),
                        message_id = %message.message_id,
                        unacknowledged = report.unacknowledged,
                        "dead-lettered message still in source queue, expect a duplicate in the dead-letter queue"
                    );
                }
            }
            Disposition::Retain => {
                tracing::info!(
                    queue = queue.queue_name(),
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    "message left in queue for redelivery"
                );
                report.retained += 1;
            }
        }
    }

    async fn forward_to_dead_letter(&self, body: &str) -> bool {
        match self.dead_letter.send(body).await {
            Ok(()) => {
                tracing::warn!(queue = self.dead_letter.queue_name(), "message forwarded to dead-letter queue");
                true
            }
            Err(err) => {
                tracing::error!(
                    queue = self.dead_letter.queue_name(),
                    error = %err,
                    body,
                    "dead-letter send failed"
                );
                false
            }
        }
    }
}

async fn acknowledge(queue: &dyn MessageQueue, message: &QueueMessage) -> bool {
    match queue.delete(&message.receipt_handle).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                queue = queue.queue_name(),
                message_id = %message.message_id,
                error = %err,
                "failed to delete message"
            );
            false
        }
    }
}

fn log_failure(index: usize, message_id: Option<&str>, event_type: Option<&str>, err: &SyncError) {
    tracing::error!(
        index,
        message_id = message_id.unwrap_or("-"),
        event_type = event_type.unwrap_or("-"),
        kind = ?err.kind(),
        error = %err,
        "event processing failed"
    );
}
