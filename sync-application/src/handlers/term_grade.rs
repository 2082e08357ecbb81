//! `sp_term_grade_certified`：学期成绩认证
//!
//! 1. 在学籍库中定位学期成绩记录及其学期（缺失即 `NotFound`）；
//! 2. `certify_crm_grade`：把 CRM 成绩记录标记为已认证；
//! 3. `roll_forward_term_grade`：为紧接着的下一学期创建成绩记录，沿用当前进度。
//!    下一学期按开始日期 = 当前学期结束日期 + 1 天查找，必须恰好一个；
//!    (enrollment, course, term) 已存在时跳过，因此重放不会产生第二条记录。
//!
//! 学籍库写入在会话内暂存，全部步骤成功后一次提交。
//!
use super::exactly_one;
use crate::clients::ServiceClients;
use crate::context::HandlerContext;
use crate::event_type::EventType;
use crate::ports::{EnrollmentCourseTerm, RecordSession, Term};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use sync_domain::envelope::decode_payload;
use sync_domain::eventing::EventHandler;
use sync_domain::reconcile::fields;
use sync_domain::{EventData, FeatureGate, FieldDelta, SyncError, SyncResult};
use uuid::Uuid;

pub const CERTIFY_CRM_GRADE: &str = "certify_crm_grade";
pub const ROLL_FORWARD_TERM_GRADE: &str = "roll_forward_term_grade";

const CERTIFIED: &str = "Certified";

#[derive(Debug, Deserialize)]
struct TermGradeCertified {
    salesforce_grade_id: String,
    enrollment_course_term_id: String,
}

pub struct TermGradeCertifiedHandler {
    clients: Arc<ServiceClients>,
    gate: FeatureGate,
}

impl TermGradeCertifiedHandler {
    pub fn new(ctx: &HandlerContext) -> Self {
        Self {
            clients: ctx.clients.clone(),
            gate: ctx.gate(EventType::TermGradeCertified.as_str()),
        }
    }

    async fn certify_crm_grade(&self, grade_id: &str) -> SyncResult<()> {
        let crm = self.clients.crm().await?;
        let grade = crm
            .get_grade(grade_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("crm grade {grade_id}")))?;

        let delta = FieldDelta::between(&grade.fields, &fields([("status", json!(CERTIFIED))]));
        if delta.is_empty() {
            tracing::debug!(grade_id, "crm grade already certified");
            return Ok(());
        }

        crm.update_grade(&grade.id, &delta.into_updates()).await?;
        tracing::info!(grade_id, "crm grade certified");
        Ok(())
    }
}

async fn roll_forward(
    session: &mut dyn RecordSession,
    current: &EnrollmentCourseTerm,
    term: &Term,
) -> SyncResult<()> {
    let next_start = term
        .end_date
        .succ_opt()
        .ok_or_else(|| SyncError::invalid_value(format!("term {} has no following day", term.id)))?;
    let next_term = exactly_one(
        session.terms_starting_on(next_start).await?,
        &format!("term starting {next_start}"),
    )?;

    let existing = session
        .find_enrollment_course_term(&current.enrollment_id, &current.course_id, &next_term.id)
        .await?;
    if let Some(existing) = existing {
        tracing::info!(
            existing_id = %existing.id,
            term = %next_term.name,
            "term grade already rolled forward"
        );
        return Ok(());
    }

    tracing::info!(
        enrollment_id = %current.enrollment_id,
        course_id = %current.course_id,
        term = %next_term.name,
        "rolling term grade forward"
    );
    session.stage(EnrollmentCourseTerm {
        id: Uuid::new_v4().to_string(),
        enrollment_id: current.enrollment_id.clone(),
        course_id: current.course_id.clone(),
        term_id: next_term.id,
        progress: current.progress,
        grade: None,
    });
    Ok(())
}

#[async_trait]
impl EventHandler for TermGradeCertifiedHandler {
    fn event_type(&self) -> &str {
        EventType::TermGradeCertified.as_str()
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["salesforce_grade_id", "enrollment_course_term_id"]
    }

    async fn handle(&self, data: &EventData) -> SyncResult<()> {
        let payload: TermGradeCertified = decode_payload(self.event_type(), data)?;

        let records = self.clients.student_records().await?;
        let mut session = records.begin().await?;

        let ect_id = &payload.enrollment_course_term_id;
        let current = session
            .enrollment_course_term(ect_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("enrollment course term {ect_id}")))?;
        let term = session
            .term(&current.term_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("term {}", current.term_id)))?;

        if self.gate.should_run(CERTIFY_CRM_GRADE) {
            self.certify_crm_grade(&payload.salesforce_grade_id).await?;
        }
        if self.gate.should_run(ROLL_FORWARD_TERM_GRADE) {
            roll_forward(session.as_mut(), &current, &term).await?;
        }

        let written = session.commit().await?;
        tracing::info!(ect_id = %current.id, written, "term grade certified");
        Ok(())
    }
}
