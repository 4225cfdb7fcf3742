use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{PrayerRequest, ReplyInput, RequestStatus};
use crate::state::AppState;
use crate::template::{ReplyData, canned_reply};

/// Send a reply to the submitter, then record it on the request.
///
/// 1) render, 2) write the intent (`reply_attempts`, one in flight per request),
/// 3) send, 4) on success copy the reply onto the request as `replied`.
/// A failed send leaves the request untouched and the attempt `failed`.
/// A send that succeeds but cannot be recorded leaves the attempt `sent` for
/// [`reconcile`] to pick up. Subject and message are stored as given.
pub async fn reply(state: &AppState, input: ReplyInput) -> AppResult<PrayerRequest> {
    if input.subject.trim().is_empty() {
        return Err(AppError::Validation("subject is required".into()));
    }
    let subject = input.subject;
    let message = resolve_message(input.message.as_deref(), input.template.as_deref())?;

    let id = input.request_id;
    let current = state.db.get_request(id)?.ok_or(AppError::NotFound(id))?;

    if let Some(expected) = input.expected_version {
        if expected != current.version {
            return Err(AppError::Conflict(format!(
                "request {id} is at version {}, not {expected}",
                current.version
            )));
        }
    }
    // Checked again when the intent is written.
    if !current.status.accepts_reply() {
        return Err(AppError::InvalidTransition {
            from: current.status,
            to: RequestStatus::Replied,
        });
    }
    if let Some(to) = input.to.as_deref() {
        if !to.trim().eq_ignore_ascii_case(&current.email) {
            return Err(AppError::Validation(format!(
                "replies go to the submitter's address, not {to}"
            )));
        }
    }

    // 1) Render
    let rendered = state.templates.render_reply(
        &subject,
        &ReplyData {
            name: current.full_name.clone(),
            original_prayer_request: current.prayer_request.clone(),
            admin_message: message.clone(),
            request_id: id,
            church_name: state.config.church_name.clone(),
        },
    )?;

    // 2) Intent
    let attempt = state
        .db
        .begin_reply_attempt(id, &current.email, &subject, &message)?;

    // 3) Send
    match state.dispatcher.send(&current.email, &rendered).await {
        Ok(message_id) => info!("Reply to request {} sent (id {})", id, message_id),
        Err(e) => {
            if let Err(se) = state.db.mark_reply_failed(attempt.id, &e.to_string()) {
                error!("Could not mark reply attempt {} failed: {}", attempt.id, se);
            }
            return Err(e.into());
        }
    }

    // 4) Record
    if let Err(e) = state.db.mark_reply_sent(attempt.id) {
        error!(
            "Reply attempt {} was delivered but could not be marked sent: {}",
            attempt.id, e
        );
        return Err(e.into());
    }
    state.db.record_reply(attempt.id).map_err(|e| {
        error!(
            "Reply to request {} was delivered but not recorded (attempt {}): {}",
            id, attempt.id, e
        );
        AppError::from(e)
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Delivered replies copied onto their request.
    pub recorded: usize,
    /// Unconfirmed attempts failed so the request can be replied to again.
    pub abandoned: usize,
}

/// Apply every delivered-but-unrecorded reply to its request, then fail
/// `pending` attempts older than `reply_stale_secs`.
///
/// A stale `pending` attempt may or may not have been delivered; failing it
/// unblocks the request at the risk of a duplicate email.
pub fn reconcile(state: &AppState) -> AppResult<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for attempt in state.db.unrecorded_replies()? {
        match state.db.record_reply(attempt.id) {
            Ok(_) => {
                info!(
                    "Reconciled reply attempt {} onto request {}",
                    attempt.id, attempt.request_id
                );
                report.recorded += 1;
            }
            Err(e) => warn!("Reply attempt {} still unrecorded: {}", attempt.id, e),
        }
    }

    let max_age = i64::try_from(state.config.reply_stale_secs).unwrap_or(i64::MAX);
    let cutoff = Duration::try_seconds(max_age)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    for attempt in state
        .db
        .abandon_stale_replies(cutoff, "delivery never confirmed; abandoned by reconciliation")?
    {
        warn!(
            "Abandoned unconfirmed reply attempt {} for request {} (created {})",
            attempt.id, attempt.request_id, attempt.created_at
        );
        report.abandoned += 1;
    }
    Ok(report)
}

/// Freehand text wins; otherwise the canned body is used verbatim.
fn resolve_message(message: Option<&str>, template: Option<&str>) -> AppResult<String> {
    if let Some(m) = message.filter(|m| !m.trim().is_empty()) {
        return Ok(m.to_string());
    }
    match template {
        Some(t) => canned_reply(t)
            .map(|c| c.body.to_string())
            .ok_or_else(|| AppError::Validation(format!("unknown reply template {t:?}"))),
        None => Err(AppError::Validation(
            "message or template is required".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::EmailError;
    use crate::models::{ReplyAttemptState, TriageInput};
    use crate::service::intake::submit;
    use crate::service::testing::{stub_state, valid_form};
    use crate::service::triage::triage;
    use lettre::transport::stub::AsyncStubTransport;
    use uuid::Uuid;

    fn input(id: Uuid, message: &str) -> ReplyInput {
        ReplyInput {
            request_id: id,
            subject: "Re: Your Prayer Request".into(),
            message: Some(message.into()),
            template: None,
            to: None,
            expected_version: None,
        }
    }

    #[tokio::test]
    async fn successful_send_records_reply() {
        let stub = AsyncStubTransport::new_ok();
        let state = stub_state(stub.clone());
        let rec = submit(&state, valid_form()).unwrap();

        let out = reply(&state, input(rec.id, "We are praying for you."))
            .await
            .unwrap();
        assert_eq!(out.status, RequestStatus::Replied);
        assert_eq!(out.reply_email.as_deref(), Some("jane@example.com"));
        assert_eq!(out.reply_subject.as_deref(), Some("Re: Your Prayer Request"));
        assert_eq!(out.reply_message.as_deref(), Some("We are praying for you."));
        assert!(out.updated_at > rec.updated_at);

        let sent = stub.messages().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Re: Your Prayer Request"));

        let attempts = state.db.list_reply_attempts(rec.id).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].state, ReplyAttemptState::Recorded);
    }

    #[tokio::test]
    async fn failed_send_leaves_record_untouched() {
        let state = stub_state(AsyncStubTransport::new_error());
        let rec = submit(&state, valid_form()).unwrap();
        let before = triage(
            &state,
            rec.id,
            TriageInput {
                status: RequestStatus::InProgress,
                admin_notes: None,
                expected_version: None,
            },
        )
        .unwrap();

        let err = reply(&state, input(rec.id, "We are praying for you."))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Email(EmailError::Send(_))));

        let after = state.db.get_request(rec.id).unwrap().unwrap();
        assert_eq!(after, before);

        let attempts = state.db.list_reply_attempts(rec.id).unwrap();
        assert_eq!(attempts[0].state, ReplyAttemptState::Failed);
        assert!(attempts[0].last_error.is_some());
    }

    #[tokio::test]
    async fn second_reply_is_rejected() {
        let stub = AsyncStubTransport::new_ok();
        let state = stub_state(stub.clone());
        let rec = submit(&state, valid_form()).unwrap();
        reply(&state, input(rec.id, "first")).await.unwrap();

        let err = reply(&state, input(rec.id, "second")).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: RequestStatus::Replied,
                to: RequestStatus::Replied
            }
        ));
        let after = state.db.get_request(rec.id).unwrap().unwrap();
        assert_eq!(after.reply_message.as_deref(), Some("first"));
        assert_eq!(stub.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn canned_template_is_substituted_verbatim() {
        let state = stub_state(AsyncStubTransport::new_ok());
        let rec = submit(&state, valid_form()).unwrap();
        let out = reply(
            &state,
            ReplyInput {
                message: None,
                template: Some("praying".into()),
                ..input(rec.id, "")
            },
        )
        .await
        .unwrap();
        assert_eq!(
            out.reply_message.as_deref(),
            Some(canned_reply("praying").unwrap().body)
        );
    }

    #[tokio::test]
    async fn missing_subject_or_body_is_validation() {
        let state = stub_state(AsyncStubTransport::new_ok());
        let rec = submit(&state, valid_form()).unwrap();
        let no_subject = ReplyInput {
            subject: " ".into(),
            ..input(rec.id, "hi")
        };
        assert!(matches!(
            reply(&state, no_subject).await,
            Err(AppError::Validation(_))
        ));
        let unknown = ReplyInput {
            message: None,
            template: Some("sermon".into()),
            ..input(rec.id, "")
        };
        assert!(matches!(
            reply(&state, unknown).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn recipient_mismatch_is_rejected() {
        let stub = AsyncStubTransport::new_ok();
        let state = stub_state(stub.clone());
        let rec = submit(&state, valid_form()).unwrap();
        let err = reply(
            &state,
            ReplyInput {
                to: Some("someone@else.example".into()),
                ..input(rec.id, "hi")
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(stub.messages().await.is_empty());
    }

    #[tokio::test]
    async fn archived_request_cannot_be_replied_to() {
        let state = stub_state(AsyncStubTransport::new_ok());
        let rec = submit(&state, valid_form()).unwrap();
        triage(
            &state,
            rec.id,
            TriageInput {
                status: RequestStatus::Archived,
                admin_notes: None,
                expected_version: None,
            },
        )
        .unwrap();
        let err = reply(&state, input(rec.id, "hi")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn in_flight_attempt_blocks_new_reply() {
        let stub = AsyncStubTransport::new_ok();
        let state = stub_state(stub.clone());
        let rec = submit(&state, valid_form()).unwrap();
        state
            .db
            .begin_reply_attempt(rec.id, &rec.email, "Re", "elsewhere")
            .unwrap();
        let err = reply(&state, input(rec.id, "hi")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(stub.messages().await.is_empty());
    }

    #[tokio::test]
    async fn reconcile_records_delivered_replies() {
        let state = stub_state(AsyncStubTransport::new_ok());
        let rec = submit(&state, valid_form()).unwrap();
        let attempt = state
            .db
            .begin_reply_attempt(rec.id, &rec.email, "Re: Your Prayer Request", "Delivered")
            .unwrap();
        state.db.mark_reply_sent(attempt.id).unwrap();

        let report = reconcile(&state).unwrap();
        assert_eq!(report.recorded, 1);
        assert_eq!(report.abandoned, 0);
        let after = state.db.get_request(rec.id).unwrap().unwrap();
        assert_eq!(after.status, RequestStatus::Replied);
        assert_eq!(after.reply_message.as_deref(), Some("Delivered"));
        assert_eq!(reconcile(&state).unwrap(), ReconcileReport::default());
    }

    #[tokio::test]
    async fn reconcile_frees_request_blocked_by_stale_attempt() {
        let stub = AsyncStubTransport::new_ok();
        let mut state = stub_state(stub.clone());
        state.config.reply_stale_secs = 0;
        let rec = submit(&state, valid_form()).unwrap();
        state
            .db
            .begin_reply_attempt(rec.id, &rec.email, "Re", "lost in a crash")
            .unwrap();
        assert!(matches!(
            reply(&state, input(rec.id, "hi")).await,
            Err(AppError::Conflict(_))
        ));

        let report = reconcile(&state).unwrap();
        assert_eq!(report.abandoned, 1);
        let attempts = state.db.list_reply_attempts(rec.id).unwrap();
        assert_eq!(attempts[0].state, ReplyAttemptState::Failed);
        assert!(attempts[0].last_error.is_some());

        let out = reply(&state, input(rec.id, "hi")).await.unwrap();
        assert_eq!(out.status, RequestStatus::Replied);
        assert_eq!(stub.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn fresh_pending_attempt_survives_reconcile() {
        let state = stub_state(AsyncStubTransport::new_ok());
        let rec = submit(&state, valid_form()).unwrap();
        state
            .db
            .begin_reply_attempt(rec.id, &rec.email, "Re", "sending now")
            .unwrap();
        assert_eq!(reconcile(&state).unwrap().abandoned, 0);
        let attempts = state.db.list_reply_attempts(rec.id).unwrap();
        assert_eq!(attempts[0].state, ReplyAttemptState::Pending);
    }

    #[tokio::test]
    async fn reply_after_another_was_recorded_is_rejected() {
        let stub = AsyncStubTransport::new_ok();
        let state = stub_state(stub.clone());
        let rec = submit(&state, valid_form()).unwrap();

        // Reply B has read the request; reply A completes before B writes its intent.
        let seen_by_b = state.db.get_request(rec.id).unwrap().unwrap();
        assert!(seen_by_b.status.accepts_reply());
        reply(&state, input(rec.id, "first")).await.unwrap();

        let err = state
            .db
            .begin_reply_attempt(rec.id, &seen_by_b.email, "Re", "second")
            .unwrap_err();
        assert!(matches!(
            AppError::from(err),
            AppError::InvalidTransition {
                from: RequestStatus::Replied,
                to: RequestStatus::Replied
            }
        ));
        let after = state.db.get_request(rec.id).unwrap().unwrap();
        assert_eq!(after.reply_message.as_deref(), Some("first"));
        assert_eq!(stub.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn triage_during_in_flight_reply_conflicts() {
        let state = stub_state(AsyncStubTransport::new_ok());
        let rec = submit(&state, valid_form()).unwrap();
        let attempt = state
            .db
            .begin_reply_attempt(rec.id, &rec.email, "Re", "on its way")
            .unwrap();

        let err = triage(
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
        let recorded = state.db.record_reply(attempt.id).unwrap();
        assert_eq!(recorded.status, RequestStatus::Replied);
        assert_eq!(recorded.reply_message.as_deref(), Some("on its way"));
    }

    #[tokio::test]
    async fn subject_and_message_are_stored_as_given() {
        let state = stub_state(AsyncStubTransport::new_ok());
        let rec = submit(&state, valid_form()).unwrap();
        let out = reply(
            &state,
            ReplyInput {
                subject: "  Re: Your Prayer Request ".into(),
                ..input(rec.id, "\nWe are praying for you.\n")
            },
        )
        .await
        .unwrap();
        assert_eq!(
            out.reply_subject.as_deref(),
            Some("  Re: Your Prayer Request ")
        );
        assert_eq!(
            out.reply_message.as_deref(),
            Some("\nWe are praying for you.\n")
        );
    }
}
