use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use uuid::Uuid;

use super::requests::get_request_in;
use super::{Database, StoreError, enum_col, tick_after, uuid_col};
use crate::models::{PrayerRequest, ReplyAttempt, ReplyAttemptState, RequestStatus};

const COLUMNS: &str =
    "id, request_id, recipient, subject, message, state, last_error, created_at, updated_at";

fn map_attempt(row: &Row<'_>) -> rusqlite::Result<ReplyAttempt> {
    Ok(ReplyAttempt {
        id: uuid_col(row, 0)?,
        request_id: uuid_col(row, 1)?,
        recipient: row.get(2)?,
        subject: row.get(3)?,
        message: row.get(4)?,
        state: enum_col(row, 5, ReplyAttemptState::from_str)?,
        last_error: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn get_attempt_in(conn: &Connection, id: Uuid) -> Result<Option<ReplyAttempt>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM reply_attempts WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], map_attempt)
        .optional()?)
}

fn set_attempt_state(
    conn: &Connection,
    id: Uuid,
    state: ReplyAttemptState,
    error: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE reply_attempts SET state = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
        params![state.as_str(), error, Utc::now(), id.to_string()],
    )?;
    Ok(())
}

/// True while an attempt for `request_id` is `pending` or `sent`.
pub(super) fn reply_in_flight_in(
    conn: &Connection,
    request_id: Uuid,
) -> Result<bool, StoreError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM reply_attempts
                       WHERE request_id = ?1 AND state IN ('pending', 'sent'))",
        params![request_id.to_string()],
        |row| row.get(0),
    )?)
}

impl Database {
    /// Write the intent record for a reply.
    ///
    /// The request's status is checked in the same transaction as the insert,
    /// so a request that was replied to (or closed) since the caller read it
    /// fails with [`StoreError::NotReplyable`]. Fails with
    /// [`StoreError::ReplyInFlight`] while another attempt for the same
    /// request is `pending` or `sent`.
    pub fn begin_reply_attempt(
        &self,
        request_id: Uuid,
        recipient: &str,
        subject: &str,
        message: &str,
    ) -> Result<ReplyAttempt, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let current =
                get_request_in(&tx, request_id)?.ok_or(StoreError::NotFound(request_id))?;
            if !current.status.accepts_reply() {
                return Err(StoreError::NotReplyable {
                    id: request_id,
                    status: current.status,
                });
            }
            let inserted = tx.execute(
                "INSERT INTO reply_attempts
                    (id, request_id, recipient, subject, message, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
                params![
                    id.to_string(),
                    request_id.to_string(),
                    recipient,
                    subject,
                    message,
                    now
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation
                        && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    return Err(StoreError::ReplyInFlight(request_id));
                }
                Err(e) => return Err(e.into()),
            }
            let attempt = get_attempt_in(&tx, id)?.ok_or(StoreError::NotFound(request_id))?;
            tx.commit()?;
            Ok(attempt)
        })
    }

    pub fn mark_reply_sent(&self, id: Uuid) -> Result<(), StoreError> {
        self.with_conn(|conn| set_attempt_state(conn, id, ReplyAttemptState::Sent, None))
    }

    pub fn mark_reply_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| set_attempt_state(conn, id, ReplyAttemptState::Failed, Some(error)))
    }

    /// Copy a `sent` attempt onto its request and close the attempt, atomically.
    ///
    /// A request that no longer accepts a reply is left alone and the attempt
    /// stays `sent`, visible to [`Database::unrecorded_replies`].
    pub fn record_reply(&self, attempt_id: Uuid) -> Result<PrayerRequest, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let attempt = get_attempt_in(&tx, attempt_id)?
                .filter(|a| a.state == ReplyAttemptState::Sent)
                .ok_or(StoreError::AttemptNotSent(attempt_id))?;
            let current = get_request_in(&tx, attempt.request_id)?
                .ok_or(StoreError::NotFound(attempt.request_id))?;
            if !current.status.accepts_reply() {
                return Err(StoreError::NotReplyable {
                    id: current.id,
                    status: current.status,
                });
            }
            tx.execute(
                "UPDATE prayer_requests
                 SET status = ?1, reply_email = ?2, reply_subject = ?3, reply_message = ?4,
                     version = version + 1, updated_at = ?5
                 WHERE id = ?6",
                params![
                    RequestStatus::Replied.as_str(),
                    attempt.recipient,
                    attempt.subject,
                    attempt.message,
                    tick_after(current.updated_at),
                    attempt.request_id.to_string(),
                ],
            )?;
            set_attempt_state(&tx, attempt_id, ReplyAttemptState::Recorded, None)?;
            let updated = get_request_in(&tx, attempt.request_id)?
                .ok_or(StoreError::NotFound(attempt.request_id))?;
            tx.commit()?;
            Ok(updated)
        })
    }

    pub fn list_reply_attempts(&self, request_id: Uuid) -> Result<Vec<ReplyAttempt>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM reply_attempts WHERE request_id = ?1 ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![request_id.to_string()], map_attempt)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Fail every `pending` attempt created at or before `cutoff`, freeing its
    /// request for a new reply. Returns the attempts that were failed.
    pub fn abandon_stale_replies(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<ReplyAttempt>, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let sql = format!(
                "SELECT {COLUMNS} FROM reply_attempts WHERE state = 'pending' ORDER BY created_at ASC"
            );
            let stale = {
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt
                    .query_map([], map_attempt)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .filter(|a| a.created_at <= cutoff)
                    .collect::<Vec<_>>()
            };
            for attempt in &stale {
                set_attempt_state(&tx, attempt.id, ReplyAttemptState::Failed, Some(reason))?;
            }
            tx.commit()?;
            Ok(stale)
        })
    }

    /// Attempts whose email went out but whose record was never updated.
    pub fn unrecorded_replies(&self) -> Result<Vec<ReplyAttempt>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM reply_attempts WHERE state = 'sent' ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], map_attempt)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
