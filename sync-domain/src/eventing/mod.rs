//! 事件子系统（eventing）
//!
//! 提供事件派发与失败恢复的基础抽象与运行时：
//! - `EventHandler`/`HandlerRegistry`：按事件类型解析处理器；
//! - `MessageQueue`：拉取式队列协议，附内存实现与 pgmq 实现；
//! - `Dispatcher`：投递模式与排空模式的统一派发路径，失败转入死信；
//! - `DeadLetterReprocessor`：死信队列重放；
//! - `SyncEngine`：长驻部署下的轮询引擎。
//!
pub mod dispatcher;
pub mod engine;
pub mod handler;
pub mod queue;
pub mod queue_inmemory;
#[cfg(feature = "infra-sqlx")]
pub mod queue_pgmq;
pub mod reprocessor;

pub use dispatcher::{
    DeliveryReport, Dispatcher, DispatcherConfig, Disposition, DrainReport, RecordFailure,
    UndeliveredRecord,
};
pub use engine::{EngineHandle, SyncEngine, SyncEngineConfig};
pub use handler::{EventHandler, HandlerRegistry};
pub use queue::{MessageQueue, QueueMessage};
pub use queue_inmemory::InMemoryQueue;
#[cfg(feature = "infra-sqlx")]
pub use queue_pgmq::PgmqQueue;
pub use reprocessor::DeadLetterReprocessor;
