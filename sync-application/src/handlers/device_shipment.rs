//! `device_shipped`：设备发货信息写入 CRM 联系人
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

pub const RECORD_DEVICE_SHIPMENT: &str = "record_device_shipment";

#[derive(Debug, Deserialize)]
struct DeviceShipped {
    order_id: String,
    email: String,
}

pub struct DeviceShippedHandler {
    clients: Arc<ServiceClients>,
    gate: FeatureGate,
}

impl DeviceShippedHandler {
    pub fn new(ctx: &HandlerContext) -> Self {
        Self {
            clients: ctx.clients.clone(),
            gate: ctx.gate(EventType::DeviceShipped.as_str()),
        }
    }

    async fn record_device_shipment(&self, payload: &DeviceShipped) -> SyncResult<()> {
        let (equipment, crm) = tokio::try_join!(self.clients.equipment(), self.clients.crm())?;

        // 订单与联系人互不依赖，并发读取
        let email = payload.email.trim();
        let (order, contact) = tokio::try_join!(
            equipment.get_order(&payload.order_id),
            contact_by_email(crm.as_ref(), email),
        )?;
        let order =
            order.ok_or_else(|| SyncError::not_found(format!("equipment order {}", payload.order_id)))?;
        let shipped_on = order.shipped_on.ok_or_else(|| {
            SyncError::invalid_value(format!("equipment order {} has not shipped", order.id))
        })?;

        let desired = fields([
            ("device", json!(order.device)),
            ("device_tracking_number", json!(order.tracking_number)),
            ("device_shipped_on", json!(shipped_on.to_string())),
        ]);
        if reconcile_contact(crm.as_ref(), &contact, &desired).await? {
            tracing::info!(order_id = %order.id, contact_id = %contact.id, "device shipment recorded");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for DeviceShippedHandler {
    fn event_type(&self) -> &str {
        EventType::DeviceShipped.as_str()
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["order_id", "email"]
    }

    async fn handle(&self, data: &EventData) -> SyncResult<()> {
        let payload: DeviceShipped = decode_payload(self.event_type(), data)?;

        if self.gate.should_run(RECORD_DEVICE_SHIPMENT) {
            self.record_device_shipment(&payload).await?;
        }
        Ok(())
    }
}
