//! 事件信封（Event Envelope）与投递信封（Delivery Envelope）
//!
//! - `EventEnvelope`：一条待处理事件，`event_type` 选择处理器，`event_data` 为载荷；
//! - `DeliveryEnvelope`：队列投递的批次，每条记录的 `body` 是序列化后的事件信封。
//!
use crate::error::{SyncError, SyncResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 事件载荷
pub type EventData = Map<String, Value>;

/// 事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_type: String,
    #[serde(default)]
    event_data: Option<EventData>,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, event_data: EventData) -> Self {
        Self {
            event_type: event_type.into(),
            event_data: Some(event_data),
        }
    }

    /// 解析一条原始消息体
    pub fn from_body(body: &str) -> SyncResult<Self> {
        serde_json::from_str(body).map_err(|e| SyncError::Parse {
            reason: format!("malformed event envelope: {e}"),
        })
    }

    pub fn to_body(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_data(&self) -> Option<&EventData> {
        self.event_data.as_ref()
    }

    /// 载荷缺失、为 null 或为空对象时返回 `EmptyEventData`
    pub fn require_data(&self) -> SyncResult<&EventData> {
        match &self.event_data {
            Some(data) if !data.is_empty() => Ok(data),
            _ => Err(SyncError::EmptyEventData {
                event_type: self.event_type.clone(),
            }),
        }
    }
}

/// 字段是否“有值”：null、空白字符串、空数组与空对象均视为空
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

/// 校验必填字段，返回第一个缺失的字段
pub fn validate_required_fields(
    event_type: &str,
    data: &EventData,
    required: &[&str],
) -> SyncResult<()> {
    match required.iter().find(|field| !is_present(data.get(**field))) {
        Some(field) => Err(SyncError::MissingRequiredField {
            event_type: event_type.to_string(),
            field: (*field).to_string(),
        }),
        None => Ok(()),
    }
}

/// 将载荷解码为处理器自己的强类型结构
pub fn decode_payload<T>(event_type: &str, data: &EventData) -> SyncResult<T>
where
    T: DeserializeOwned,
{
    serde_json::from_value(Value::Object(data.clone())).map_err(|e| SyncError::Parse {
        reason: format!("payload of {event_type} does not match its schema: {e}"),
    })
}

/// 投递记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub body: String,
}

/// 投递信封：`{"Records": [{"body": "..."}]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    #[serde(rename = "Records", default)]
    pub records: Vec<DeliveryRecord>,
}

impl DeliveryEnvelope {
    pub fn from_json(raw: &str) -> SyncResult<Self> {
        serde_json::from_str(raw).map_err(|e| SyncError::Parse {
            reason: format!("malformed delivery envelope: {e}"),
        })
    }

    pub fn from_bodies<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: bodies
                .into_iter()
                .map(|body| DeliveryRecord {
                    message_id: None,
                    body: body.into(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
