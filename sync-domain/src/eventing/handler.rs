//! 事件处理器（EventHandler）与处理器注册表（HandlerRegistry）
//!
//! 处理器声明自己的事件类型与必填字段；派发器在调用 `handle` 之前
//! 完成载荷非空与必填字段校验，因此校验失败时不会产生任何副作用。
//!
use crate::envelope::EventData;
use crate::error::SyncResult;
use async_trait::async_trait;
use std::sync::Arc;

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器对应的事件类型（用于日志与特性开关）
    fn event_type(&self) -> &str;

    /// 必须存在且非空的载荷字段
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// 处理事件；返回错误即视为本次投递失败
    async fn handle(&self, data: &EventData) -> SyncResult<()>;
}

/// 事件分类器：事件类型字符串 -> 已构造的处理器
pub trait HandlerRegistry: Send + Sync {
    /// 未注册的类型返回 `UnknownEventType`
    fn classify(&self, event_type: &str) -> SyncResult<Arc<dyn EventHandler>>;

    /// 已注册的全部事件类型
    fn event_types(&self) -> Vec<&'static str>;
}
