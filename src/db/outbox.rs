use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use super::{Database, StoreError, enum_col, uuid_col};
use crate::models::{Notification, NotificationKind, NotificationState};

const COLUMNS: &str = "id, request_id, kind, recipient, state, attempts, next_attempt_at, \
                       last_error, created_at, updated_at";

fn map_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: uuid_col(row, 0)?,
        request_id: uuid_col(row, 1)?,
        kind: enum_col(row, 2, NotificationKind::from_str)?,
        recipient: row.get(3)?,
        state: enum_col(row, 4, NotificationState::from_str)?,
        attempts: row.get(5)?,
        next_attempt_at: row.get(6)?,
        last_error: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(super) fn enqueue_in(
    conn: &Connection,
    request_id: Uuid,
    kind: NotificationKind,
    recipient: &str,
    now: DateTime<Utc>,
) -> Result<Uuid, StoreError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO notification_outbox
            (id, request_id, kind, recipient, state, attempts, next_attempt_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5, ?5)",
        params![
            id.to_string(),
            request_id.to_string(),
            kind.as_str(),
            recipient,
            now
        ],
    )?;
    Ok(id)
}

impl Database {
    /// Pending notifications whose `next_attempt_at` has passed, oldest first.
    pub fn due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM notification_outbox
                 WHERE state = 'pending' AND next_attempt_at <= ?1
                 ORDER BY next_attempt_at ASC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![now, limit], map_notification)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_notifications(
        &self,
        state: Option<NotificationState>,
    ) -> Result<Vec<Notification>, StoreError> {
        self.with_conn(|conn| {
            let rows = match state {
                Some(state) => {
                    let sql = format!(
                        "SELECT {COLUMNS} FROM notification_outbox WHERE state = ?1 ORDER BY created_at ASC"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(params![state.as_str()], map_notification)?
                        .collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let sql =
                        format!("SELECT {COLUMNS} FROM notification_outbox ORDER BY created_at ASC");
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map([], map_notification)?
                        .collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    pub fn mark_notification_sent(&self, id: Uuid) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE notification_outbox
                 SET state = 'sent', attempts = attempts + 1, last_error = NULL, updated_at = ?1
                 WHERE id = ?2",
                params![Utc::now(), id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Record a failed attempt and push the row to `next_attempt_at`.
    pub fn reschedule_notification(
        &self,
        id: Uuid,
        attempts: u16,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE notification_outbox
                 SET attempts = ?1, next_attempt_at = ?2, last_error = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![attempts, next_attempt_at, error, Utc::now(), id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn mark_notification_dead(
        &self,
        id: Uuid,
        attempts: u16,
        error: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE notification_outbox
                 SET state = 'dead', attempts = ?1, last_error = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![attempts, error, Utc::now(), id.to_string()],
            )?;
            Ok(())
        })
    }
}
