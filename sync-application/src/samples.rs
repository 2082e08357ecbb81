//! 示例事件与配套的沙箱种子数据，供 worker 的 `sample` 模式本地演练
use crate::event_type::EventType;
use crate::ports::{
    CrmContact, CrmGrade, DirectoryAccount, EnrollmentCourseTerm, EquipmentOrder, LmsUser,
    SignatureEnvelope, Term,
};
use crate::sandbox::Sandbox;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{Value, json};
use sync_domain::reconcile::fields;
use sync_domain::{EventData, EventEnvelope};

const EMAIL: &str = "ada.lovelace@example.edu";

#[derive(Clone, Debug)]
pub struct Sample {
    pub key: &'static str,
    pub description: &'static str,
    pub envelope: EventEnvelope,
}

fn data(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        _ => EventData::new(),
    }
}

fn sample(key: &'static str, description: &'static str, event_type: EventType, value: Value) -> Sample {
    Sample {
        key,
        description,
        envelope: EventEnvelope::new(event_type.as_str(), data(value)),
    }
}

pub fn samples() -> Vec<Sample> {
    vec![
        sample(
            "term-grade",
            "certify a term grade and roll it forward to the next term",
            EventType::TermGradeCertified,
            json!({"salesforce_grade_id": "a0G-001", "enrollment_course_term_id": "ect1"}),
        ),
        sample(
            "term-grade-missing",
            "term grade for an unknown enrollment course term",
            EventType::TermGradeCertified,
            json!({"salesforce_grade_id": "a0G-001", "enrollment_course_term_id": "ect-missing"}),
        ),
        sample(
            "status-dropped",
            "student dropped: update crm, revoke lms access, suspend account",
            EventType::StudentStatusChanged,
            json!({"email": EMAIL, "status": "Dropped"}),
        ),
        sample(
            "lms-grade",
            "lms grade posted for IT500",
            EventType::LmsGradePosted,
            json!({"lms_user_id": "4201", "course_code": "IT500", "grade": "P"}),
        ),
        sample(
            "esign",
            "enrollment agreement signed",
            EventType::ESignEnvelopeCompleted,
            json!({"envelope_id": "env-9001", "email": EMAIL}),
        ),
        sample(
            "device",
            "chromebook shipped",
            EventType::DeviceShipped,
            json!({"order_id": "ord-77", "email": EMAIL}),
        ),
        sample(
            "submission",
            "submission update (ignored)",
            EventType::SubmissionUpdated,
            json!({"submission_id": "sub-1", "state": "graded"}),
        ),
    ]
}

pub fn find(key: &str) -> Option<Sample> {
    samples().into_iter().find(|s| s.key == key)
}

/// 写入让全部示例事件（`term-grade-missing` 除外）都能成功的种子数据
pub fn seed(sandbox: &Sandbox) {
    let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN);

    sandbox.crm.insert_contact(CrmContact {
        id: "003-ada".into(),
        email: EMAIL.into(),
        fields: fields([("status", json!("Started"))]),
    });
    sandbox.crm.insert_grade(CrmGrade {
        id: "a0G-001".into(),
        contact_id: "003-ada".into(),
        course_code: "IT500".into(),
        fields: fields([("status", json!("Pending"))]),
    });

    sandbox.lms.insert_user(LmsUser {
        id: "4201".into(),
        email: EMAIL.into(),
        active: true,
    });
    sandbox.directory.insert_account(DirectoryAccount {
        email: EMAIL.into(),
        suspended: false,
    });
    sandbox.esign.insert_envelope(SignatureEnvelope {
        id: "env-9001".into(),
        status: "completed".into(),
        signer_email: EMAIL.into(),
        form_name: "Enrollment Agreement".into(),
        completed_at: Utc.with_ymd_and_hms(2024, 2, 1, 9, 30, 0).single(),
    });
    sandbox.equipment.insert_order(EquipmentOrder {
        id: "ord-77".into(),
        email: EMAIL.into(),
        device: "Chromebook".into(),
        tracking_number: Some("1Z999AA10123456784".into()),
        shipped_on: Some(day(2024, 3, 4)),
    });

    sandbox.records.insert_term(Term {
        id: "term-01".into(),
        name: "2024-25-TERM-01".into(),
        start_date: day(2023, 9, 1),
        end_date: day(2024, 1, 5),
    });
    sandbox.records.insert_term(Term {
        id: "term-02".into(),
        name: "2024-25-TERM-02".into(),
        start_date: day(2024, 1, 6),
        end_date: day(2024, 5, 31),
    });
    sandbox.records.insert_enrollment_course_term(EnrollmentCourseTerm {
        id: "ect1".into(),
        enrollment_id: "enr-ada".into(),
        course_id: "IT500".into(),
        term_id: "term-01".into(),
        progress: Some(0.45),
        grade: Some("P".into()),
    });
}
