//! End-to-end lifecycle of one prayer request: intake, triage, reply.

use std::sync::Arc;

use chrono::Utc;
use lettre::transport::stub::AsyncStubTransport;
use vigil::{
    AppError, AppState, Database,
    config::ApiConfig,
    db::StoreError,
    email::{EmailDispatcher, EmailError, Mailer},
    models::{NewPrayerRequest, PrayerRequest, ReplyInput, RequestStatus, TriageInput},
    notify::NotificationWorker,
    service,
    template::TemplateEngine,
};

fn state_with(stub: AsyncStubTransport, db: Database) -> AppState {
    let config = ApiConfig {
        admin_email: "ops@church.example".into(),
        admin_base_url: "https://church.example".into(),
        ..ApiConfig::default()
    };
    let dispatcher = EmailDispatcher::new(
        Mailer::Stub(stub),
        "Prayer Team <prayer@church.example>".parse().unwrap(),
        None,
    );
    AppState::new(config, db, dispatcher, TemplateEngine::new().unwrap())
}

fn fresh_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.migrate().unwrap();
    db
}

fn jane() -> NewPrayerRequest {
    NewPrayerRequest {
        full_name: "Jane Doe".into(),
        email: "jane@example.com".into(),
        prayer_request: "Please pray for my recovery.".into(),
        phone: None,
    }
}

fn reply_input(id: uuid::Uuid, message: &str) -> ReplyInput {
    ReplyInput {
        request_id: id,
        subject: "Re: Your Prayer Request".into(),
        message: Some(message.into()),
        template: None,
        to: None,
        expected_version: None,
    }
}

/// Submit a request and move it to `in_progress`; no reply fields yet.
fn submitted_and_in_progress(state: &AppState) -> PrayerRequest {
    let rec = service::submit(state, jane()).unwrap();
    assert_eq!(rec.status, RequestStatus::Pending);
    assert!(rec.reply_email.is_none());

    let rec = service::triage(
        state,
        rec.id,
        TriageInput {
            status: RequestStatus::InProgress,
            admin_notes: None,
            expected_version: None,
        },
    )
    .unwrap();
    assert_eq!(rec.status, RequestStatus::InProgress);
    assert!(rec.reply_email.is_none());
    assert!(rec.reply_subject.is_none());
    assert!(rec.reply_message.is_none());
    rec
}

#[tokio::test]
async fn reply_marks_request_replied() {
    let state = state_with(AsyncStubTransport::new_ok(), fresh_db());
    let rec = submitted_and_in_progress(&state);

    let out = service::reply(&state, reply_input(rec.id, "We are praying for you."))
        .await
        .unwrap();
    assert_eq!(out.status, RequestStatus::Replied);
    assert_eq!(out.reply_message.as_deref(), Some("We are praying for you."));
    assert_eq!(out.reply_subject.as_deref(), Some("Re: Your Prayer Request"));
    assert_eq!(out.reply_email.as_deref(), Some("jane@example.com"));
}

#[tokio::test]
async fn failed_send_keeps_prior_state() {
    let db = fresh_db();
    let ok_state = state_with(AsyncStubTransport::new_ok(), db.clone());
    let before = submitted_and_in_progress(&ok_state);

    let failing = state_with(AsyncStubTransport::new_error(), db);
    let err = service::reply(&failing, reply_input(before.id, "We are praying for you."))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Email(EmailError::Send(_))));

    let after = failing.db.get_request(before.id).unwrap().unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.reply_email, before.reply_email);
    assert_eq!(after.reply_subject, before.reply_subject);
    assert_eq!(after.reply_message, before.reply_message);

    // Provider recovered: the same reply can now go through.
    let out = service::reply(&ok_state, reply_input(before.id, "We are praying for you."))
        .await
        .unwrap();
    assert_eq!(out.status, RequestStatus::Replied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_replies_persist_exactly_one() {
    let stub = AsyncStubTransport::new_ok();
    let state = Arc::new(state_with(stub.clone(), fresh_db()));
    let id = submitted_and_in_progress(&state).id;

    let handles: Vec<_> = ["first message", "second message"]
        .into_iter()
        .map(|message| {
            let state = state.clone();
            tokio::spawn(async move { service::reply(&state, reply_input(id, message)).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AppError::Conflict(_)) | Err(AppError::InvalidTransition { .. }) => {}
            Err(e) => panic!("unexpected reply error: {e}"),
        }
    }
    assert_eq!(succeeded, 1);

    let after = state.db.get_request(id).unwrap().unwrap();
    assert_eq!(after.status, RequestStatus::Replied);
    let msg = after.reply_message.unwrap();
    assert!(msg == "first message" || msg == "second message");
    assert_eq!(stub.messages().await.len(), 1);
}

#[tokio::test]
async fn reply_racing_a_recorded_reply_sends_nothing() {
    let stub = AsyncStubTransport::new_ok();
    let state = state_with(stub.clone(), fresh_db());
    let rec = submitted_and_in_progress(&state);

    // The slower caller holds a snapshot taken before the faster one finished.
    let snapshot = state.db.get_request(rec.id).unwrap().unwrap();
    service::reply(&state, reply_input(rec.id, "first message"))
        .await
        .unwrap();

    let err = state
        .db
        .begin_reply_attempt(rec.id, &snapshot.email, "Re", "second message")
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotReplyable {
            status: RequestStatus::Replied,
            ..
        }
    ));

    let after = state.db.get_request(rec.id).unwrap().unwrap();
    assert_eq!(after.reply_message.as_deref(), Some("first message"));
    assert_eq!(stub.messages().await.len(), 1);
}

#[tokio::test]
async fn archiving_waits_for_in_flight_reply() {
    let state = state_with(AsyncStubTransport::new_ok(), fresh_db());
    let rec = submitted_and_in_progress(&state);
    let attempt = state
        .db
        .begin_reply_attempt(rec.id, &rec.email, "Re", "on its way")
        .unwrap();

    let err = service::triage(
        &state,
        rec.id,
        TriageInput {
            status: RequestStatus::Archived,
            admin_notes: None,
            expected_version: None,
        },
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    state.db.mark_reply_sent(attempt.id).unwrap();
    let after = state.db.record_reply(attempt.id).unwrap();
    assert_eq!(after.status, RequestStatus::Replied);
}

#[tokio::test]
async fn intake_survives_notification_outage() {
    let state = Arc::new(state_with(AsyncStubTransport::new_error(), fresh_db()));
    let rec = service::submit(&state, jane()).unwrap();

    let report = NotificationWorker::new(state.clone())
        .process_due(Utc::now())
        .await
        .unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.retried, 2);

    let stored = state.db.get_request(rec.id).unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert!(stored.reply_email.is_none());
    assert!(stored.reply_subject.is_none());
    assert!(stored.reply_message.is_none());
}
