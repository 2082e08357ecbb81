use crate::event_type::EventType;
use async_trait::async_trait;
use sync_domain::eventing::EventHandler;
use sync_domain::{EventData, SyncResult};

/// `submission_updated`：已登记但不做任何处理
///
/// 上游仍会发送该事件，登记后可被正常确认，不会进入死信队列。
pub struct SubmissionUpdatedHandler;

#[async_trait]
impl EventHandler for SubmissionUpdatedHandler {
    fn event_type(&self) -> &str {
        EventType::SubmissionUpdated.as_str()
    }

    async fn handle(&self, data: &EventData) -> SyncResult<()> {
        tracing::debug!(fields = data.len(), "submission update ignored");
        Ok(())
    }
}
