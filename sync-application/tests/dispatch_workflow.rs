use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use sync_application::ports::{EnrollmentCourseTerm, Term};
use sync_application::{EventType, EventTypeRegistry, Sandbox, samples};
use sync_domain::eventing::{
    DeadLetterReprocessor, Dispatcher, DispatcherConfig, HandlerRegistry, InMemoryQueue,
    MessageQueue,
};
use sync_domain::{DeliveryEnvelope, FeatureFlags, SyncError};

const DLQ: &str = "student_sync_dev_dlq";

fn all_features() -> FeatureFlags {
    FeatureFlags::allow_all(EventType::ALL.map(|t| t.as_str()))
}

fn dispatcher(sandbox: &Sandbox, flags: FeatureFlags) -> (Arc<Dispatcher>, InMemoryQueue) {
    let dlq = InMemoryQueue::new(DLQ);
    let dispatcher = Dispatcher::builder()
        .registry(Arc::new(EventTypeRegistry::new(sandbox.context(flags))))
        .dead_letter(Arc::new(dlq.clone()))
        .config(DispatcherConfig {
            batch_size: 5,
            visibility_timeout: Duration::from_secs(30),
        })
        .build();
    (Arc::new(dispatcher), dlq)
}

fn body(event_type: &str, data: Value) -> String {
    json!({"event_type": event_type, "event_data": data}).to_string()
}

fn term_grade_body(ect_id: &str) -> String {
    body(
        "sp_term_grade_certified",
        json!({"salesforce_grade_id": "g1", "enrollment_course_term_id": ect_id}),
    )
}

/// ect1 所在学期于 2024-01-05 结束，下一学期 2024-25-TERM-02 于 2024-01-06 开始
fn seed_terms(sandbox: &Sandbox) {
    let day = |y, m, d| chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap();
    sandbox.records.insert_term(Term {
        id: "t1".into(),
        name: "2024-25-TERM-01".into(),
        start_date: day(2023, 9, 1),
        end_date: day(2024, 1, 5),
    });
    sandbox.records.insert_term(Term {
        id: "t2".into(),
        name: "2024-25-TERM-02".into(),
        start_date: day(2024, 1, 6),
        end_date: day(2024, 5, 31),
    });
    sandbox
        .records
        .insert_enrollment_course_term(EnrollmentCourseTerm {
            id: "ect1".into(),
            enrollment_id: "enr1".into(),
            course_id: "IT500".into(),
            term_id: "t1".into(),
            progress: Some(0.6),
            grade: Some("P".into()),
        });
    sandbox.crm.insert_grade(sync_application::ports::CrmGrade {
        id: "g1".into(),
        contact_id: "003A".into(),
        course_code: "IT500".into(),
        fields: Default::default(),
    });
}

#[tokio::test]
async fn every_registered_type_is_constructible_and_others_are_rejected() {
    let sandbox = Sandbox::new();
    let registry = EventTypeRegistry::new(sandbox.context(all_features()));

    for name in registry.event_types() {
        assert_eq!(registry.classify(name).unwrap().event_type(), name);
    }
    assert!(matches!(
        registry.classify("grade_certified"),
        Err(SyncError::UnknownEventType { .. })
    ));
}

#[tokio::test]
async fn empty_event_data_fails_before_any_client_call() {
    let sandbox = Sandbox::new();
    let (dispatcher, dlq) = dispatcher(&sandbox, all_features());

    for event_type in EventType::ALL {
        let raw = json!({"event_type": event_type.as_str()}).to_string();
        let err = dispatcher.dispatch_body(&raw).await.unwrap_err();
        assert!(matches!(err, SyncError::EmptyEventData { .. }), "{event_type}");
    }
    assert_eq!(sandbox.calls(), 0);
    assert_eq!(sandbox.constructions(), 0);
    assert!(dlq.is_empty());
}

#[tokio::test]
async fn missing_required_field_is_named_and_writes_nothing() {
    let sandbox = Sandbox::new();
    samples::seed(&sandbox);
    let (dispatcher, _dlq) = dispatcher(&sandbox, all_features());

    let cases = [
        ("sp_term_grade_certified", json!({"salesforce_grade_id": "g1"}), "enrollment_course_term_id"),
        ("student_status_changed", json!({"email": "a@b.c", "status": "  "}), "status"),
        ("lms_grade_posted", json!({"lms_user_id": "1", "course_code": "IT500", "grade": null}), "grade"),
        ("esign_envelope_completed", json!({"email": "a@b.c"}), "envelope_id"),
        ("device_shipped", json!({"order_id": "o", "email": ""}), "email"),
    ];
    for (event_type, data, missing) in cases {
        let err = dispatcher.dispatch_body(&body(event_type, data)).await.unwrap_err();
        match err {
            SyncError::MissingRequiredField { event_type: t, field } => {
                assert_eq!(t, event_type);
                assert_eq!(field, missing);
            }
            other => panic!("unexpected error for {event_type}: {other}"),
        }
    }
    assert_eq!(sandbox.writes(), 0);
}

#[tokio::test]
async fn unknown_enrollment_course_term_is_dead_lettered_without_writes() {
    let sandbox = Sandbox::new();
    seed_terms(&sandbox);
    let (dispatcher, dlq) = dispatcher(&sandbox, all_features());
    let raw = term_grade_body("ect-unknown");

    let report = dispatcher
        .handle_delivery(&DeliveryEnvelope::from_bodies([raw.clone()]))
        .await;

    assert_eq!(report.dead_lettered, 1);
    assert!(report.failures[0].reason.starts_with("not found"));
    assert_eq!(sandbox.writes(), 0);
    assert_eq!(dlq.bodies(), [raw]);
}

#[tokio::test]
async fn term_grade_rolls_forward_exactly_once() {
    let sandbox = Sandbox::new();
    seed_terms(&sandbox);
    let (dispatcher, dlq) = dispatcher(&sandbox, all_features());
    let delivery = DeliveryEnvelope::from_bodies([term_grade_body("ect1")]);

    let first = dispatcher.handle_delivery(&delivery).await;
    assert!(first.all_succeeded());

    let records = sandbox.records.enrollment_course_terms();
    assert_eq!(records.len(), 2);
    let rolled = records.iter().find(|r| r.term_id == "t2").unwrap();
    assert_eq!(rolled.natural_key(), ("enr1", "IT500", "t2"));
    assert_eq!(rolled.progress, Some(0.6));
    assert_eq!(sandbox.crm.grade("g1").unwrap().fields["status"], json!("Certified"));

    // 重放：不产生第二条记录，也不再写 CRM
    let writes = sandbox.writes();
    let replay = dispatcher.handle_delivery(&delivery).await;
    assert!(replay.all_succeeded());
    assert_eq!(sandbox.records.enrollment_course_terms().len(), 2);
    assert_eq!(sandbox.writes(), writes);
    assert!(dlq.is_empty());
}

#[tokio::test]
async fn disabled_operation_is_skipped_without_error() {
    let sandbox = Sandbox::new();
    seed_terms(&sandbox);
    let flags: FeatureFlags = serde_json::from_value(json!({
        "sp_term_grade_certified": {"active": true, "enabled": ["roll_forward_term_grade"]}
    }))
    .unwrap();
    let (dispatcher, _dlq) = dispatcher(&sandbox, flags);

    dispatcher.dispatch_body(&term_grade_body("ect1")).await.unwrap();

    assert_eq!(sandbox.records.enrollment_course_terms().len(), 2);
    assert_eq!(sandbox.crm.calls().total(), 0);
}

#[tokio::test]
async fn failing_record_is_isolated_within_the_batch() {
    let sandbox = Sandbox::new();
    samples::seed(&sandbox);
    let (dispatcher, dlq) = dispatcher(&sandbox, all_features());

    let bodies: Vec<String> = ["status-dropped", "term-grade-missing", "device", "submission"]
        .into_iter()
        .map(|key| samples::find(key).unwrap().envelope.to_body().unwrap())
        .collect();
    let report = dispatcher
        .handle_delivery(&DeliveryEnvelope::from_bodies(bodies.clone()))
        .await;

    assert_eq!(report.processed, 4);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(dlq.bodies(), [bodies[1].clone()]);

    let contact = sandbox.crm.contact("003-ada").unwrap();
    assert_eq!(contact.fields["status"], json!("Dropped"));
    assert_eq!(contact.fields["device"], json!("Chromebook"));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_replayed_from_the_dead_letter_queue() {
    let sandbox = Sandbox::new();
    samples::seed(&sandbox);
    let (dispatcher, dlq) = dispatcher(&sandbox, all_features());
    let raw = samples::find("lms-grade").unwrap().envelope.to_body().unwrap();

    sandbox.crm.calls().set_unavailable(true);
    let report = dispatcher
        .handle_delivery(&DeliveryEnvelope::from_bodies([raw.clone()]))
        .await;
    assert_eq!(report.dead_lettered, 1);

    let reprocessor = DeadLetterReprocessor::new(dispatcher.clone());
    let still_down = reprocessor.drain().await.unwrap();
    assert_eq!(still_down.retained, 1);
    assert_eq!(dlq.bodies(), [raw.clone()]);

    sandbox.crm.calls().set_unavailable(false);
    tokio::time::advance(Duration::from_secs(31)).await;
    let recovered = reprocessor.drain().await.unwrap();
    assert_eq!(recovered.acknowledged, 1);
    assert!(dlq.is_empty());
    assert_eq!(sandbox.crm.grades().len(), 1);
}

#[tokio::test]
async fn drain_mode_retains_domain_failures_in_the_work_queue() {
    let sandbox = Sandbox::new();
    samples::seed(&sandbox);
    let (dispatcher, dlq) = dispatcher(&sandbox, all_features());
    let work = InMemoryQueue::new("student_sync_dev_events");

    let missing = samples::find("term-grade-missing").unwrap().envelope.to_body().unwrap();
    let unknown = body("enrollment_paused", json!({"email": "a@b.c"}));
    for key in ["esign", "lms-grade"] {
        let raw = samples::find(key).unwrap().envelope.to_body().unwrap();
        work.send(&raw).await.unwrap();
    }
    work.send(&missing).await.unwrap();
    work.send(&unknown).await.unwrap();

    let report = dispatcher.drain(&work).await.unwrap();

    assert_eq!(report.received, 4);
    assert_eq!(report.acknowledged, 2);
    assert_eq!(report.retained, 1);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(work.bodies(), [missing]);
    assert_eq!(dlq.bodies(), [unknown]);
}
