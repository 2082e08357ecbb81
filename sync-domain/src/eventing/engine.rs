//! 同步引擎（SyncEngine）
//!
//! 长驻部署下的轮询驱动：
//! - 按 `poll_interval` 排空工作队列；
//! - 按 `replay_interval` 重放死信队列；
//! - 两类任务在同一个任务内交替执行，保证同一时刻只处理一条消息；
//! - 提供关闭与等待的 `EngineHandle`。
//!
use super::dispatcher::Dispatcher;
use super::queue::MessageQueue;
use super::reprocessor::DeadLetterReprocessor;
use crate::error::{SyncError, SyncResult};
use bon::Builder;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Builder)]
pub struct SyncEngine {
    dispatcher: Arc<Dispatcher>,
    work_queue: Arc<dyn MessageQueue>,
    #[builder(default)]
    config: SyncEngineConfig,
}

impl SyncEngine {
    /// 启动引擎，返回可用于关闭/等待的句柄
    ///
    /// 轮询间隔为零或派发器配置非法时拒绝启动。
    pub fn start(self: Arc<Self>) -> SyncResult<EngineHandle> {
        self.config.validate()?;
        self.dispatcher.config().validate()?;

        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));

        Ok(EngineHandle {
            token,
            tasks: vec![task],
        })
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let reprocessor = DeadLetterReprocessor::new(self.dispatcher.clone());

        let mut poll = time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut replay = time::interval(self.config.replay_interval);
        replay.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            queue = self.work_queue.queue_name(),
            dead_letter = self.dispatcher.dead_letter_queue().queue_name(),
            "sync engine started"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = poll.tick() => {
                    if let Err(err) = self.dispatcher.drain(self.work_queue.as_ref()).await {
                        tracing::error!(error = %err, "work queue drain failed");
                    }
                }
                _ = replay.tick() => {
                    if let Err(err) = reprocessor.drain().await {
                        tracing::error!(error = %err, "dead-letter replay failed");
                    }
                }
            }
        }

        tracing::info!("sync engine stopped");
    }
}

/// 引擎配置
#[derive(Clone, Copy, Debug)]
pub struct SyncEngineConfig {
    /// 工作队列的轮询间隔
    pub poll_interval: Duration,
    /// 死信重放的间隔
    pub replay_interval: Duration,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            replay_interval: Duration::from_secs(900),
        }
    }
}

impl SyncEngineConfig {
    pub fn validate(&self) -> SyncResult<()> {
        if self.poll_interval.is_zero() {
            return Err(SyncError::config("poll interval must be greater than zero"));
        }
        if self.replay_interval.is_zero() {
            return Err(SyncError::config("replay interval must be greater than zero"));
        }
        Ok(())
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// 等待所有任务结束；任务 panic 时记录并返回错误
    pub async fn join(mut self) -> SyncResult<()> {
        let tasks = std::mem::take(&mut self.tasks);
        let mut failure = None;

        for t in tasks {
            if let Err(err) = t.await {
                tracing::error!(error = %err, "sync engine task terminated abnormally");
                if failure.is_none() {
                    failure = Some(SyncError::Task {
                        reason: err.to_string(),
                    });
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventData;
    use crate::error::{SyncError, SyncResult};
    use crate::eventing::{EventHandler, HandlerRegistry, InMemoryQueue};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn event_type(&self) -> &str {
            "count"
        }
        async fn handle(&self, _data: &EventData) -> SyncResult<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Registry(Arc<CountingHandler>);

    impl HandlerRegistry for Registry {
        fn classify(&self, event_type: &str) -> SyncResult<Arc<dyn EventHandler>> {
            match event_type {
                "count" => Ok(self.0.clone()),
                other => Err(SyncError::UnknownEventType {
                    event_type: other.to_string(),
                }),
            }
        }
        fn event_types(&self) -> Vec<&'static str> {
            vec!["count"]
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn engine_drains_work_queue_and_dead_letters_unknown_types() {
        let handler = Arc::new(CountingHandler::default());
        let work = InMemoryQueue::new("t_dev_events");
        let dlq = InMemoryQueue::new("t_dev_dlq");
        let dispatcher = Arc::new(
            Dispatcher::builder()
                .registry(Arc::new(Registry(handler.clone())))
                .dead_letter(Arc::new(dlq.clone()))
                .build(),
        );
        let engine = Arc::new(
            SyncEngine::builder()
                .dispatcher(dispatcher)
                .work_queue(Arc::new(work.clone()))
                .config(SyncEngineConfig {
                    poll_interval: Duration::from_millis(50),
                    replay_interval: Duration::from_secs(60),
                })
                .build(),
        );

        let ok = json!({"event_type": "count", "event_data": {"n": 1}}).to_string();
        let unknown = json!({"event_type": "mystery", "event_data": {"n": 2}}).to_string();
        work.send(&ok).await.unwrap();
        work.send(&unknown).await.unwrap();

        let handle = engine.start().unwrap();
        // 使用 timeout + 条件轮询，减少固定 sleep 的脆弱性
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if handler.handled.load(Ordering::SeqCst) >= 1 && work.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        // 晚到的消息由下一次轮询处理
        work.send(&ok).await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while handler.handled.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        handle.shutdown();
        handle.join().await.unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 2);
        assert!(work.is_empty());
        // 死信重放在启动时执行过一次，但未知类型仍留在死信队列
        assert_eq!(dlq.bodies(), [unknown]);
    }

    fn engine_with(config: SyncEngineConfig) -> Arc<SyncEngine> {
        let dispatcher = Dispatcher::builder()
            .registry(Arc::new(Registry(Arc::default())))
            .dead_letter(Arc::new(InMemoryQueue::new("t_dev_dlq")))
            .build();
        Arc::new(
            SyncEngine::builder()
                .dispatcher(Arc::new(dispatcher))
                .work_queue(Arc::new(InMemoryQueue::new("t_dev_events")))
                .config(config)
                .build(),
        )
    }

    #[tokio::test]
    async fn zero_intervals_are_rejected_at_start() {
        for config in [
            SyncEngineConfig {
                poll_interval: Duration::ZERO,
                ..Default::default()
            },
            SyncEngineConfig {
                replay_interval: Duration::ZERO,
                ..Default::default()
            },
        ] {
            let err = engine_with(config).start().err();
            assert!(matches!(err, Some(SyncError::Config { .. })));
        }
    }

    #[tokio::test]
    async fn join_reports_a_panicked_task() {
        let handle = EngineHandle {
            token: CancellationToken::new(),
            tasks: vec![tokio::spawn(async { panic!("engine loop crashed") })],
        };

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, SyncError::Task { .. }));
    }

    #[tokio::test]
    async fn join_after_shutdown_is_ok() {
        let handle = engine_with(SyncEngineConfig::default()).start().unwrap();
        handle.shutdown();
        assert!(handle.join().await.is_ok());
    }
}
