//! Route handlers for the prayer request API.
//! Every response body is `{"data": ...}` on success or `{"error": "..."}` on failure.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    NewPrayerRequest, NotificationState, ReplyInput, RequestFilter, RequestStatus, TriageInput,
};
use crate::state::AppState;
use crate::{notify, service, template};

type ApiResponse = AppResult<(StatusCode, Json<Value>)>;

fn ok(data: impl serde::Serialize) -> ApiResponse {
    Ok((StatusCode::OK, Json(json!({ "data": data }))))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/prayer-requests",
            post(create_prayer_request).get(list_prayer_requests),
        )
        .route(
            "/api/prayer-requests/{id}",
            get(get_prayer_request).patch(triage_prayer_request),
        )
        .route("/api/email/send-confirmation", post(send_confirmation))
        .route(
            "/api/email/send-admin-notification",
            post(send_admin_notification),
        )
        .route("/api/send-reply", post(send_reply))
        .route("/api/reply-templates", get(reply_templates))
        .route("/api/notifications", get(list_notifications))
        .route("/api/replies/reconcile", post(reconcile_replies))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Missing string fields deserialize as empty so validation can name them.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrayerRequest {
    #[serde(default)]
    full_name: String,
    phone_number: Option<String>,
    #[serde(default)]
    email: String,
    #[serde(default)]
    prayer_request: String,
}

/// POST `/api/prayer-requests` → `201 {"data": record}`
pub async fn create_prayer_request(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreatePrayerRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(body) = body?;
    let record = service::submit(
        &state,
        NewPrayerRequest {
            full_name: body.full_name,
            email: body.email,
            prayer_request: body.prayer_request,
            phone: body.phone_number,
        },
    )?;
    Ok((StatusCode::CREATED, Json(json!({ "data": record }))))
}

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<String>,
}

fn parse_status(raw: &str) -> AppResult<RequestStatus> {
    RequestStatus::from_str(raw)
        .ok_or_else(|| AppError::Validation(format!("unknown status {raw:?}")))
}

/// GET `/api/prayer-requests?status=pending`
pub async fn list_prayer_requests(
    State(state): State<Arc<AppState>>,
    q: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResponse {
    let Query(q) = q?;
    let status = q.status.as_deref().map(parse_status).transpose()?;
    ok(state.db.list_requests(&RequestFilter { status })?)
}

/// GET `/api/prayer-requests/{id}`
pub async fn get_prayer_request(
    State(state): State<Arc<AppState>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResponse {
    let Path(id) = id?;
    ok(state.db.get_request(id)?.ok_or(AppError::NotFound(id))?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageBody {
    #[serde(default)]
    status: String,
    admin_notes: Option<String>,
    expected_version: Option<i64>,
}

/// PATCH `/api/prayer-requests/{id}`
pub async fn triage_prayer_request(
    State(state): State<Arc<AppState>>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<TriageBody>, JsonRejection>,
) -> ApiResponse {
    let Path(id) = id?;
    let Json(body) = body?;
    let input = TriageInput {
        status: parse_status(&body.status)?,
        admin_notes: body.admin_notes,
        expected_version: body.expected_version,
    };
    ok(service::triage(&state, id, input)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReplyBody {
    to: Option<String>,
    #[serde(default)]
    subject: String,
    message: Option<String>,
    template: Option<String>,
    #[serde(default)]
    request_id: String,
    expected_version: Option<i64>,
}

fn parse_request_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::Validation(format!("requestId {raw:?} is not a valid id")))
}

/// POST `/api/send-reply`: send the reply, then record it as `replied`.
pub async fn send_reply(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendReplyBody>, JsonRejection>,
) -> ApiResponse {
    let Json(body) = body?;
    let input = ReplyInput {
        request_id: parse_request_id(&body.request_id)?,
        subject: body.subject,
        message: body.message,
        template: body.template,
        to: body.to,
        expected_version: body.expected_version,
    };
    ok(service::reply(&state, input).await?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    prayer_request: String,
    #[serde(default)]
    request_id: String,
}

/// POST `/api/email/send-confirmation`
pub async fn send_confirmation(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConfirmationBody>, JsonRejection>,
) -> ApiResponse {
    let Json(body) = body?;
    let request_id = parse_request_id(&body.request_id)?;
    let id = notify::send_confirmation(
        &state,
        &body.email,
        body.name,
        body.prayer_request,
        request_id,
    )
    .await?;
    ok(json!({ "status": "ok", "id": id }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotificationBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    phone: Option<String>,
    #[serde(default)]
    prayer_request: String,
    #[serde(default)]
    request_id: String,
}

/// POST `/api/email/send-admin-notification`
pub async fn send_admin_notification(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AdminNotificationBody>, JsonRejection>,
) -> ApiResponse {
    let Json(body) = body?;
    let request_id = parse_request_id(&body.request_id)?;
    let id = notify::send_admin_notification(
        &state,
        body.name,
        body.email,
        body.phone,
        body.prayer_request,
        request_id,
    )
    .await?;
    ok(json!({ "status": "ok", "id": id }))
}

/// GET `/api/reply-templates`
pub async fn reply_templates() -> ApiResponse {
    ok(template::canned_replies())
}

#[derive(Deserialize)]
pub struct NotificationQuery {
    state: Option<String>,
}

/// GET `/api/notifications?state=dead` lists dead letters.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    q: Result<Query<NotificationQuery>, QueryRejection>,
) -> ApiResponse {
    let Query(q) = q?;
    let filter = q
        .state
        .as_deref()
        .map(|s| {
            NotificationState::from_str(s)
                .ok_or_else(|| AppError::Validation(format!("unknown state {s:?}")))
        })
        .transpose()?;
    ok(state.db.list_notifications(filter)?)
}

/// POST `/api/replies/reconcile`
pub async fn reconcile_replies(State(state): State<Arc<AppState>>) -> ApiResponse {
    let report = service::reconcile(&state)?;
    ok(json!({ "reconciled": report.recorded, "abandoned": report.abandoned }))
}
