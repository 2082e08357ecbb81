//! 特性开关（Feature Flags）
//!
//! 外部 JSON 以处理器类型为键：
//!
//! ```json
//! { "student_status_changed": { "active": true, "enabled": ["update_crm_status"] } }
//! ```
//!
//! 处理器在构造时取出自己的 [`FeatureGate`]，每个受控步骤执行前显式调用
//! `should_run`；未启用的步骤静默跳过并记录日志，不视为错误。
//!
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// 通配：启用该处理器的全部步骤
pub const ALL: &str = "ALL";

/// 单个处理器的开关配置
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSet {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub enabled: BTreeSet<String>,
}

/// 全部处理器的开关配置
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags {
    handlers: HashMap<String, FlagSet>,
}

impl FeatureFlags {
    pub fn from_json(raw: &str) -> SyncResult<Self> {
        serde_json::from_str(raw).map_err(|e| SyncError::config(format!("feature flags: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("feature flags at {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// 为给定处理器类型全部开启（本地验证与测试使用）
    pub fn allow_all<I, S>(handler_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handlers = handler_types
            .into_iter()
            .map(|t| {
                (
                    t.into(),
                    FlagSet {
                        active: true,
                        enabled: BTreeSet::from([ALL.to_string()]),
                    },
                )
            })
            .collect();
        Self { handlers }
    }

    pub fn with(mut self, handler_type: impl Into<String>, flags: FlagSet) -> Self {
        self.handlers.insert(handler_type.into(), flags);
        self
    }

    /// 取出某处理器的开关；未配置的处理器得到关闭状态的开关
    pub fn gate(&self, handler_type: &str) -> FeatureGate {
        let flags = self.handlers.get(handler_type).cloned().unwrap_or_default();
        FeatureGate {
            handler_type: handler_type.to_string(),
            flags,
        }
    }
}

/// 单个处理器的开关策略对象
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureGate {
    handler_type: String,
    flags: FlagSet,
}

impl FeatureGate {
    pub fn new(handler_type: impl Into<String>, flags: FlagSet) -> Self {
        Self {
            handler_type: handler_type.into(),
            flags,
        }
    }

    pub fn handler_type(&self) -> &str {
        &self.handler_type
    }

    /// 是否允许执行某步骤（纯判断，不写日志）
    pub fn is_enabled(&self, operation: &str) -> bool {
        self.flags.active
            && (self.flags.enabled.contains(ALL) || self.flags.enabled.contains(operation))
    }

    /// 是否允许执行某步骤；不允许时记录一条跳过日志
    pub fn should_run(&self, operation: &str) -> bool {
        let enabled = self.is_enabled(operation);
        if !enabled {
            tracing::info!(
                handler = %self.handler_type,
                operation,
                active = self.flags.active,
                "feature disabled, skipping operation"
            );
        }
        enabled
    }
}
