use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::{NewPrayerRequest, NotificationKind, PrayerRequest};
use crate::state::AppState;

/// Validate and store a new request from the public form.
///
/// The confirmation and admin alert are queued in the same transaction as the
/// insert, then the notification worker is woken. Delivery outcome never
/// affects the result: once this returns `Ok`, the record exists as `pending`.
pub fn submit(state: &AppState, form: NewPrayerRequest) -> AppResult<PrayerRequest> {
    let new = validate(form)?;

    let notifications = if state.config.notify_on_intake {
        vec![
            (NotificationKind::Confirmation, new.email.clone()),
            (
                NotificationKind::AdminNotification,
                state.config.admin_email.clone(),
            ),
        ]
    } else {
        Vec::new()
    };

    let record = state.db.insert_request(&new, &notifications)?;
    info!(
        "Prayer request {} received ({} notification(s) queued)",
        record.id,
        notifications.len()
    );
    if !notifications.is_empty() {
        state.notifier.notify_one();
    }
    Ok(record)
}

fn validate(form: NewPrayerRequest) -> AppResult<NewPrayerRequest> {
    let full_name = required("fullName", &form.full_name)?;
    let email = required("email", &form.email)?;
    let prayer_request = required("prayerRequest", &form.prayer_request)?;
    email
        .parse::<lettre::Address>()
        .map_err(|_| AppError::Validation(format!("{email:?} is not a valid email address")))?;
    let phone = form
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    Ok(NewPrayerRequest {
        full_name,
        email,
        prayer_request,
        phone,
    })
}

fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}
