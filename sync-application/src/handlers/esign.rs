//! `esign_envelope_completed`：电子签名完成后记录到 CRM 联系人
//!
//! 每份表单写入独立字段 `<form>_signed_at`，同一信封重复投递不会产生额外写入。
//!
use super::{contact_by_email, reconcile_contact};
use crate::clients::ServiceClients;
use crate::context::HandlerContext;
use crate::event_type::EventType;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use sync_domain::envelope::decode_payload;
use sync_domain::eventing::EventHandler;
use sync_domain::reconcile::fields;
use sync_domain::{EventData, FeatureGate, SyncError, SyncResult};

pub const RECORD_SIGNED_FORM: &str = "record_signed_form";

/// 表单名转为字段名：小写，非字母数字折叠为单个下划线
pub fn form_field(form_name: &str) -> String {
    let slug = form_name
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    format!("{slug}_signed_at")
}

#[derive(Debug, Deserialize)]
struct ESignEnvelopeCompleted {
    envelope_id: String,
    email: String,
}

pub struct ESignEnvelopeCompletedHandler {
    clients: Arc<ServiceClients>,
    gate: FeatureGate,
}

impl ESignEnvelopeCompletedHandler {
    pub fn new(ctx: &HandlerContext) -> Self {
        Self {
            clients: ctx.clients.clone(),
            gate: ctx.gate(EventType::ESignEnvelopeCompleted.as_str()),
        }
    }

    async fn record_signed_form(&self, payload: &ESignEnvelopeCompleted) -> SyncResult<()> {
        let esign = self.clients.esign().await?;
        let envelope = esign
            .get_envelope(&payload.envelope_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("envelope {}", payload.envelope_id)))?;

        if !envelope.status.eq_ignore_ascii_case("completed") {
            return Err(SyncError::invalid_value(format!(
                "envelope {} is {}, expected completed",
                envelope.id, envelope.status
            )));
        }
        let completed_at = envelope.completed_at.ok_or_else(|| {
            SyncError::invalid_value(format!("envelope {} has no completion time", envelope.id))
        })?;

        let crm = self.clients.crm().await?;
        let contact = contact_by_email(crm.as_ref(), payload.email.trim()).await?;
        let desired = fields([(form_field(&envelope.form_name), json!(completed_at.to_rfc3339()))]);
        if reconcile_contact(crm.as_ref(), &contact, &desired).await? {
            tracing::info!(envelope_id = %envelope.id, form = %envelope.form_name, "signed form recorded");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ESignEnvelopeCompletedHandler {
    fn event_type(&self) -> &str {
        EventType::ESignEnvelopeCompleted.as_str()
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["envelope_id", "email"]
    }

    async fn handle(&self, data: &EventData) -> SyncResult<()> {
        let payload: ESignEnvelopeCompleted = decode_payload(self.event_type(), data)?;

        if self.gate.should_run(RECORD_SIGNED_FORM) {
            self.record_signed_form(&payload).await?;
        }
        Ok(())
    }
}
