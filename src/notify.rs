//! Notification delivery.
//!
//! Intake queues a confirmation and an admin alert in `notification_outbox`.
//! The worker here drains due rows, renders at execution time, sends, and
//! reschedules failures with exponential backoff until the retry policy gives
//! up, at which point the row is dead-lettered.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::email::EmailError;
use crate::error::{AppError, AppResult};
use crate::models::{Notification, NotificationKind, PrayerRequest};
use crate::state::AppState;
use crate::template::{AdminNotificationData, ConfirmationData, RenderedEmail};

const BATCH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    wait_min_max: (u64, u64),
    times: u16,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            wait_min_max: (60, 3600),
            times: 5,
        }
    }
}

impl RetryPolicy {
    /// Create a new RetryPolicy with custom min/max backoff (seconds) and number of attempts
    pub fn new(wait_min_max: (u64, u64), times: u16) -> Self {
        Self {
            wait_min_max,
            times,
        }
    }

    /// Exponential backoff in seconds: min * (2^attempt), capped at max
    pub fn calculate_backoff(&self, attempt_count: u16) -> u64 {
        let (min, max) = self.wait_min_max;
        1u64.checked_shl(u32::from(attempt_count))
            .and_then(|m| min.checked_mul(m))
            .map_or(max, |b| b.min(max))
    }

    /// Check if we should continue retrying
    pub fn should_retry(&self, attempt_count: u16) -> bool {
        attempt_count < self.times
    }
}

/// Outcome of one pass over the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub retried: usize,
    pub dead: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.sent + self.retried + self.dead
    }
}

pub struct NotificationWorker {
    state: Arc<AppState>,
    policy: RetryPolicy,
    poll: Duration,
}

impl NotificationWorker {
    pub fn new(state: Arc<AppState>) -> Self {
        let cfg = &state.config;
        let policy = RetryPolicy::new(
            (cfg.notify_retry_min_secs, cfg.notify_retry_max_secs),
            cfg.notify_retry_times,
        );
        let poll = Duration::from_secs(cfg.notify_poll_secs.max(1));
        Self {
            state,
            policy,
            poll,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run forever: drain, then sleep until woken by intake or the poll interval.
    pub async fn run(self) {
        info!("Notification worker started (poll every {:?})", self.poll);
        loop {
            match self.process_due(Utc::now()).await {
                Ok(report) if report.total() > 0 => debug!(
                    "Notification pass: {} sent, {} retried, {} dead",
                    report.sent, report.retried, report.dead
                ),
                Ok(_) => {}
                Err(e) => error!("Notification pass failed: {}", e),
            }
            tokio::select! {
                _ = self.state.notifier.notified() => {}
                _ = tokio::time::sleep(self.poll) => {}
            }
        }
    }

    /// Deliver every row due at `now`.
    pub async fn process_due(&self, now: DateTime<Utc>) -> AppResult<DrainReport> {
        let mut report = DrainReport::default();
        loop {
            let due = self.state.db.due_notifications(now, BATCH)?;
            let full = due.len() == BATCH;
            for n in due {
                self.process_one(&n, now, &mut report).await?;
            }
            if !full {
                return Ok(report);
            }
        }
    }

    async fn process_one(
        &self,
        n: &Notification,
        now: DateTime<Utc>,
        report: &mut DrainReport,
    ) -> AppResult<()> {
        let db = &self.state.db;
        let err = match self.deliver(n).await {
            Ok(message_id) => {
                db.mark_notification_sent(n.id)?;
                debug!(
                    "Notification {} ({}) for request {} sent (id {})",
                    n.id,
                    n.kind.as_str(),
                    n.request_id,
                    message_id
                );
                report.sent += 1;
                return Ok(());
            }
            Err(e) => e.to_string(),
        };

        let attempts = n.attempts.saturating_add(1);
        if self.policy.should_retry(attempts) {
            let wait = self.policy.calculate_backoff(attempts - 1);
            let next = now + chrono::Duration::seconds(i64::try_from(wait).unwrap_or(i64::MAX));
            warn!(
                "Notification {} ({}) for request {} failed (attempt {}), retrying in {}s: {}",
                n.id,
                n.kind.as_str(),
                n.request_id,
                attempts,
                wait,
                err
            );
            db.reschedule_notification(n.id, attempts, next, &err)?;
            report.retried += 1;
        } else {
            error!(
                notification_id = %n.id,
                request_id = %n.request_id,
                kind = n.kind.as_str(),
                recipient = %n.recipient,
                attempts,
                "Notification dead-lettered: {}",
                err
            );
            db.mark_notification_dead(n.id, attempts, &err)?;
            report.dead += 1;
        }
        Ok(())
    }

    async fn deliver(&self, n: &Notification) -> AppResult<String> {
        let record = self
            .state
            .db
            .get_request(n.request_id)?
            .ok_or(AppError::NotFound(n.request_id))?;
        let rendered = match n.kind {
            NotificationKind::Confirmation => render_confirmation(&self.state, &record)?,
            NotificationKind::AdminNotification => render_admin_alert(&self.state, &record)?,
        };
        Ok(self.state.dispatcher.send(&n.recipient, &rendered).await?)
    }
}

/// Spawn the worker on the current runtime.
pub fn spawn_worker(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(NotificationWorker::new(state).run())
}

fn render_confirmation(state: &AppState, r: &PrayerRequest) -> Result<RenderedEmail, EmailError> {
    state.templates.render_confirmation(&ConfirmationData {
        name: r.full_name.clone(),
        prayer_request: r.prayer_request.clone(),
        request_id: r.id,
        church_name: state.config.church_name.clone(),
    })
}

fn render_admin_alert(state: &AppState, r: &PrayerRequest) -> Result<RenderedEmail, EmailError> {
    state
        .templates
        .render_admin_notification(&AdminNotificationData {
            name: r.full_name.clone(),
            email: r.email.clone(),
            phone: r.phone.clone(),
            prayer_request: r.prayer_request.clone(),
            request_id: r.id,
            admin_url: state.admin_url(r.id),
            church_name: state.config.church_name.clone(),
        })
}

/// Direct confirmation send for clients that orchestrate their own notifications.
pub async fn send_confirmation(
    state: &AppState,
    to: &str,
    name: String,
    prayer_request: String,
    request_id: Uuid,
) -> AppResult<String> {
    let rendered = state.templates.render_confirmation(&ConfirmationData {
        name,
        prayer_request,
        request_id,
        church_name: state.config.church_name.clone(),
    })?;
    Ok(state.dispatcher.send(to, &rendered).await?)
}

/// Direct admin alert, always addressed to the operations mailbox.
pub async fn send_admin_notification(
    state: &AppState,
    name: String,
    email: String,
    phone: Option<String>,
    prayer_request: String,
    request_id: Uuid,
) -> AppResult<String> {
    let rendered = state
        .templates
        .render_admin_notification(&AdminNotificationData {
            name,
            email,
            phone,
            prayer_request,
            request_id,
            admin_url: state.admin_url(request_id),
            church_name: state.config.church_name.clone(),
        })?;
    Ok(state
        .dispatcher
        .send(&state.config.admin_email, &rendered)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationState, RequestStatus};
    use crate::service::intake::submit;
    use crate::service::testing::{stub_state, valid_form};
    use lettre::transport::stub::AsyncStubTransport;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new((60, 3600), 5);
        assert_eq!(p.calculate_backoff(0), 60);
        assert_eq!(p.calculate_backoff(1), 120);
        assert_eq!(p.calculate_backoff(3), 480);
        assert_eq!(p.calculate_backoff(10), 3600);
        assert_eq!(p.calculate_backoff(200), 3600);
        assert!(p.should_retry(4));
        assert!(!p.should_retry(5));
    }

    #[tokio::test]
    async fn due_notifications_are_delivered_once() {
        let stub = AsyncStubTransport::new_ok();
        let state = Arc::new(stub_state(stub.clone()));
        let rec = submit(&state, valid_form()).unwrap();
        let worker = NotificationWorker::new(state.clone());

        let report = worker.process_due(Utc::now()).await.unwrap();
        assert_eq!(report.sent, 2);

        let sent = stub.messages().await;
        assert_eq!(sent.len(), 2);
        let recipients: Vec<String> = sent
            .iter()
            .map(|(env, _)| env.to()[0].to_string())
            .collect();
        assert!(recipients.contains(&"jane@example.com".to_string()));
        assert!(recipients.contains(&"ops@church.example".to_string()));
        let alert = sent
            .iter()
            .find(|(env, _)| env.to()[0].to_string() == "ops@church.example")
            .unwrap();
        assert!(alert.1.contains(&rec.id.to_string()));

        let again = worker.process_due(Utc::now()).await.unwrap();
        assert_eq!(again.total(), 0);
        assert_eq!(stub.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn failures_retry_then_dead_letter_without_touching_record() {
        let state = Arc::new(stub_state(AsyncStubTransport::new_error()));
        let rec = submit(&state, valid_form()).unwrap();
        let worker =
            NotificationWorker::new(state.clone()).with_policy(RetryPolicy::new((60, 3600), 3));

        let t0 = Utc::now();
        let first = worker.process_due(t0).await.unwrap();
        assert_eq!(first.retried, 2);

        // Not due again until the backoff elapses.
        assert_eq!(worker.process_due(t0).await.unwrap().total(), 0);

        let second = worker
            .process_due(t0 + chrono::Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(second.retried, 2);

        let third = worker
            .process_due(t0 + chrono::Duration::seconds(61 + 121))
            .await
            .unwrap();
        assert_eq!(third.dead, 2);

        let dead = state
            .db
            .list_notifications(Some(NotificationState::Dead))
            .unwrap();
        assert_eq!(dead.len(), 2);
        assert!(dead.iter().all(|n| n.attempts == 3 && n.last_error.is_some()));

        let after = state.db.get_request(rec.id).unwrap().unwrap();
        assert_eq!(after.status, RequestStatus::Pending);
        assert_eq!(after, rec);
    }

    #[tokio::test]
    async fn direct_admin_notification_goes_to_ops() {
        let stub = AsyncStubTransport::new_ok();
        let state = stub_state(stub.clone());
        let id = Uuid::new_v4();
        send_admin_notification(
            &state,
            "Jane Doe".into(),
            "jane@example.com".into(),
            Some("555-0100".into()),
            "Healing".into(),
            id,
        )
        .await
        .unwrap();
        let sent = stub.messages().await;
        assert_eq!(sent[0].0.to()[0].to_string(), "ops@church.example");
        assert!(sent[0].1.contains("555-0100"));
    }
}
