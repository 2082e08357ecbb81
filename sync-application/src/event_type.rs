//! 事件类型注册表
//!
//! 以封闭枚举 [`EventType`] 作为注册表：每个变体对应一个处理器实现，
//! 未登记的字符串在解析阶段即以 `UnknownEventType` 失败。
//!
use crate::context::HandlerContext;
use crate::handlers::{
    DeviceShippedHandler, ESignEnvelopeCompletedHandler, LmsGradePostedHandler,
    StudentStatusChangedHandler, SubmissionUpdatedHandler, TermGradeCertifiedHandler,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use sync_domain::eventing::{EventHandler, HandlerRegistry};
use sync_domain::{SyncError, SyncResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    TermGradeCertified,
    StudentStatusChanged,
    LmsGradePosted,
    ESignEnvelopeCompleted,
    DeviceShipped,
    SubmissionUpdated,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::TermGradeCertified,
        EventType::StudentStatusChanged,
        EventType::LmsGradePosted,
        EventType::ESignEnvelopeCompleted,
        EventType::DeviceShipped,
        EventType::SubmissionUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TermGradeCertified => "sp_term_grade_certified",
            EventType::StudentStatusChanged => "student_status_changed",
            EventType::LmsGradePosted => "lms_grade_posted",
            EventType::ESignEnvelopeCompleted => "esign_envelope_completed",
            EventType::DeviceShipped => "device_shipped",
            EventType::SubmissionUpdated => "submission_updated",
        }
    }

    /// 构造该类型的处理器
    pub fn handler(&self, ctx: &HandlerContext) -> Arc<dyn EventHandler> {
        match self {
            EventType::TermGradeCertified => Arc::new(TermGradeCertifiedHandler::new(ctx)),
            EventType::StudentStatusChanged => Arc::new(StudentStatusChangedHandler::new(ctx)),
            EventType::LmsGradePosted => Arc::new(LmsGradePostedHandler::new(ctx)),
            EventType::ESignEnvelopeCompleted => {
                Arc::new(ESignEnvelopeCompletedHandler::new(ctx))
            }
            EventType::DeviceShipped => Arc::new(DeviceShippedHandler::new(ctx)),
            EventType::SubmissionUpdated => Arc::new(SubmissionUpdatedHandler),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SyncError::UnknownEventType {
                event_type: s.to_string(),
            })
    }
}

/// 基于 [`EventType`] 的处理器注册表
#[derive(Clone)]
pub struct EventTypeRegistry {
    ctx: HandlerContext,
}

impl EventTypeRegistry {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }
}

impl HandlerRegistry for EventTypeRegistry {
    fn classify(&self, event_type: &str) -> SyncResult<Arc<dyn EventHandler>> {
        let event_type: EventType = event_type.parse()?;
        Ok(event_type.handler(&self.ctx))
    }

    fn event_types(&self) -> Vec<&'static str> {
        EventType::ALL.iter().map(EventType::as_str).collect()
    }
}
