//! 学籍同步核心库（sync-domain）
//!
//! 提供事件驱动的对账/派发核心，用于在多个外部记录系统之间同步学生数据：
//! - 环境配置解析（`config`）与服务客户端注册表（`client_registry`）
//! - 事件信封与必填字段校验（`envelope`）
//! - 特性开关（`feature_flag`）与字段对账（`reconcile`）
//! - 事件系统（`eventing`）：处理器协议、队列、派发器、死信重放与轮询引擎
//!
//! 本 crate 不绑定具体的外部系统客户端，仅定义协议与派发机制；
//! 业务处理器与外部系统端口由上层（如 `sync-application`）提供并注入。
//!
//! 典型用法：
//! 1. 以 `ConfigSet::resolve` 得到当前环境的连接标识；
//! 2. 实现 `HandlerRegistry`，为每个事件类型构造处理器；
//! 3. 以注册表与死信队列构建 `Dispatcher`；
//! 4. 投递模式调用 `handle_delivery`，排空模式调用 `drain`，
//!    死信重放使用 `DeadLetterReprocessor`。
//!
pub mod client_registry;
pub mod config;
pub mod envelope;
pub mod error;
pub mod eventing;
pub mod feature_flag;
pub mod reconcile;

pub use client_registry::ClientRegistry;
pub use config::{ConfigSet, Environment};
pub use envelope::{DeliveryEnvelope, DeliveryRecord, EventData, EventEnvelope};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use feature_flag::{FeatureFlags, FeatureGate, FlagSet};
pub use reconcile::{FieldChanged, FieldDelta, Fields};
