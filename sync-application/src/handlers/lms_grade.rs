//! `lms_grade_posted`：LMS 成绩同步到 CRM
//!
//! 成绩记录以 (联系人, 课程代码) 为自然键：不存在则创建，存在则只写入变化的字段。
//!
use super::contact_by_email;
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
use sync_domain::{EventData, FeatureGate, FieldDelta, SyncError, SyncResult};

pub const UPSERT_CRM_GRADE: &str = "upsert_crm_grade";

const GRADES: [&str; 9] = ["A", "B", "C", "D", "F", "P", "NP", "I", "W"];

/// 规范化成绩取值，无法识别时返回 `InvalidValue`
pub fn normalize_grade(raw: &str) -> SyncResult<&'static str> {
    let upper = raw.trim().to_ascii_uppercase();
    GRADES
        .into_iter()
        .find(|g| *g == upper)
        .ok_or_else(|| SyncError::invalid_value(format!("unrecognized grade `{raw}`")))
}

#[derive(Debug, Deserialize)]
struct LmsGradePosted {
    lms_user_id: String,
    course_code: String,
    grade: String,
}

pub struct LmsGradePostedHandler {
    clients: Arc<ServiceClients>,
    gate: FeatureGate,
}

impl LmsGradePostedHandler {
    pub fn new(ctx: &HandlerContext) -> Self {
        Self {
            clients: ctx.clients.clone(),
            gate: ctx.gate(EventType::LmsGradePosted.as_str()),
        }
    }

    async fn upsert_crm_grade(&self, payload: &LmsGradePosted, grade: &str) -> SyncResult<()> {
        let lms = self.clients.lms().await?;
        let user = lms
            .get_user(&payload.lms_user_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("lms user {}", payload.lms_user_id)))?;

        let crm = self.clients.crm().await?;
        let contact = contact_by_email(crm.as_ref(), &user.email).await?;
        let desired = fields([("grade", json!(grade)), ("source", json!("lms"))]);

        let mut existing = crm.find_grades(&contact.id, &payload.course_code).await?;
        match existing.len() {
            0 => {
                let id = crm
                    .create_grade(&contact.id, &payload.course_code, &desired)
                    .await?;
                tracing::info!(grade_id = %id, course = %payload.course_code, "crm grade created");
            }
            1 => {
                let current = existing.remove(0);
                let delta = FieldDelta::between(&current.fields, &desired);
                if delta.is_empty() {
                    tracing::debug!(grade_id = %current.id, "crm grade already up to date");
                } else {
                    crm.update_grade(&current.id, &delta.into_updates()).await?;
                    tracing::info!(grade_id = %current.id, course = %payload.course_code, "crm grade updated");
                }
            }
            n => {
                return Err(SyncError::duplicate(format!(
                    "{n} crm grades for contact {} course {}",
                    contact.id, payload.course_code
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for LmsGradePostedHandler {
    fn event_type(&self) -> &str {
        EventType::LmsGradePosted.as_str()
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["lms_user_id", "course_code", "grade"]
    }

    async fn handle(&self, data: &EventData) -> SyncResult<()> {
        let payload: LmsGradePosted = decode_payload(self.event_type(), data)?;
        let grade = normalize_grade(&payload.grade)?;

        if self.gate.should_run(UPSERT_CRM_GRADE) {
            self.upsert_crm_grade(&payload, grade).await?;
        }
        Ok(())
    }
}
