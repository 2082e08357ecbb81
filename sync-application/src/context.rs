use crate::clients::ServiceClients;
use std::sync::Arc;
use sync_domain::{ConfigSet, FeatureFlags, FeatureGate};

/// 处理器上下文（Handler Context）
///
/// 承载处理器构造所需的共享依赖：
/// - 服务客户端（`ServiceClients`）：含当前环境的 `ConfigSet` 与客户端注册表；
/// - 特性开关（`FeatureFlags`）：处理器构造时取出自己的 `FeatureGate`。
///
/// 两者均以 `Arc` 共享，克隆上下文不会复制客户端或开关配置。
#[derive(Clone)]
pub struct HandlerContext {
    pub clients: Arc<ServiceClients>,
    pub flags: Arc<FeatureFlags>,
}

impl HandlerContext {
    pub fn new(clients: Arc<ServiceClients>, flags: Arc<FeatureFlags>) -> Self {
        Self { clients, flags }
    }

    pub fn configs(&self) -> &ConfigSet {
        self.clients.configs()
    }

    pub fn gate(&self, handler_type: &str) -> FeatureGate {
        self.flags.gate(handler_type)
    }
}
