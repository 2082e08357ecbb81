//! 同步核心统一错误定义
//!
//! 覆盖分类、校验、领域与外部依赖四类失败，便于派发器按 [`ErrorKind`]
//! 统一决定确认、转入死信或留在队列等待重投。
//!
use thiserror::Error;

/// 统一错误类型（同步核心最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SyncError {
    // --- 分类 ---
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },
    #[error("unknown environment: {tag}")]
    UnknownEnvironment { tag: String },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },

    // --- 校验 ---
    #[error("empty event data: type={event_type}")]
    EmptyEventData { event_type: String },
    #[error("missing required field: type={event_type}, field={field}")]
    MissingRequiredField { event_type: String, field: String },

    // --- 领域规则 ---
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("duplicate records: {reason}")]
    Duplicate { reason: String },
    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 外部依赖 ---
    #[error("client error: system={system}, reason={reason}")]
    Client { system: String, reason: String },
    #[error("queue error: queue={queue}, reason={reason}")]
    Queue { queue: String, reason: String },
    #[error("store error: {reason}")]
    Store { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("config error: {reason}")]
    Config { reason: String },
    #[error("task failed: {reason}")]
    Task { reason: String },
}

/// 统一 Result 类型别名
pub type SyncResult<T> = Result<T, SyncError>;

/// 错误分类：决定消息的确认策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// 未知事件类型、未知环境、无法解析的消息体
    Classification,
    /// 事件数据为空或缺少必填字段
    Validation,
    /// 记录缺失、记录重复、无法识别的取值
    Domain,
    /// 外部系统、队列或存储不可用
    Transient,
}

impl ErrorKind {
    /// 重放也必然以相同方式失败的错误
    pub fn is_terminal(self) -> bool {
        matches!(self, ErrorKind::Classification | ErrorKind::Validation)
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::UnknownEventType { .. }
            | SyncError::UnknownEnvironment { .. }
            | SyncError::Serde { .. }
            | SyncError::Parse { .. } => ErrorKind::Classification,
            SyncError::EmptyEventData { .. } | SyncError::MissingRequiredField { .. } => {
                ErrorKind::Validation
            }
            SyncError::NotFound { .. }
            | SyncError::Duplicate { .. }
            | SyncError::InvalidValue { .. }
            | SyncError::TypeMismatch { .. } => ErrorKind::Domain,
            SyncError::Client { .. }
            | SyncError::Queue { .. }
            | SyncError::Store { .. }
            | SyncError::Database { .. }
            | SyncError::Config { .. }
            | SyncError::Task { .. } => ErrorKind::Transient,
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        SyncError::NotFound {
            reason: reason.into(),
        }
    }

    pub fn duplicate(reason: impl Into<String>) -> Self {
        SyncError::Duplicate {
            reason: reason.into(),
        }
    }

    pub fn invalid_value(reason: impl Into<String>) -> Self {
        SyncError::InvalidValue {
            reason: reason.into(),
        }
    }

    pub fn client(system: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Client {
            system: system.into(),
            reason: reason.into(),
        }
    }

    pub fn queue(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Queue {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        SyncError::Config {
            reason: reason.into(),
        }
    }
}

// 允许在基础设施层直接使用 `?` 将 sqlx 错误转换为 SyncError
#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => SyncError::NotFound {
                reason: "row not found".to_string(),
            },
            other => SyncError::Database {
                reason: other.to_string(),
            },
        }
    }
}

impl From<chrono::ParseError> for SyncError {
    fn from(err: chrono::ParseError) -> Self {
        SyncError::Parse {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_kinds_are_classification_and_validation() {
        let unknown = SyncError::UnknownEventType {
            event_type: "nope".into(),
        };
        let missing = SyncError::MissingRequiredField {
            event_type: "t".into(),
            field: "email".into(),
        };
        let not_found = SyncError::not_found("ect1");
        let client = SyncError::client("crm", "timeout");

        assert!(unknown.kind().is_terminal());
        assert!(missing.kind().is_terminal());
        assert_eq!(not_found.kind(), ErrorKind::Domain);
        assert!(!not_found.kind().is_terminal());
        assert_eq!(client.kind(), ErrorKind::Transient);
        assert!(!client.kind().is_terminal());
    }

    #[test]
    fn display_names_the_field() {
        let err = SyncError::MissingRequiredField {
            event_type: "device_shipped".into(),
            field: "order_id".into(),
        };
        assert_eq!(
            err.to_string(),
            "missing required field: type=device_shipped, field=order_id"
        );
    }
}
