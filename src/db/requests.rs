use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::replies::reply_in_flight_in;
use super::{Database, StoreError, enum_col, outbox, uuid_col};
use crate::models::{
    NewPrayerRequest, NotificationKind, PrayerRequest, RequestFilter, RequestStatus,
};

const COLUMNS: &str = "id, full_name, phone, email, prayer_request, status, admin_notes, \
                       reply_email, reply_subject, reply_message, version, created_at, updated_at";

fn map_request(row: &Row<'_>) -> rusqlite::Result<PrayerRequest> {
    Ok(PrayerRequest {
        id: uuid_col(row, 0)?,
        full_name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        prayer_request: row.get(4)?,
        status: enum_col(row, 5, RequestStatus::from_str)?,
        admin_notes: row.get(6)?,
        reply_email: row.get(7)?,
        reply_subject: row.get(8)?,
        reply_message: row.get(9)?,
        version: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub(super) fn get_request_in(
    conn: &Connection,
    id: Uuid,
) -> Result<Option<PrayerRequest>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM prayer_requests WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], map_request)
        .optional()?)
}

impl Database {
    /// Insert a new `pending` request and, in the same transaction, queue the
    /// given notifications for it.
    pub fn insert_request(
        &self,
        new: &NewPrayerRequest,
        notifications: &[(NotificationKind, String)],
    ) -> Result<PrayerRequest, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO prayer_requests
                    (id, full_name, phone, email, prayer_request, status, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
                params![
                    id.to_string(),
                    new.full_name,
                    new.phone,
                    new.email,
                    new.prayer_request,
                    RequestStatus::Pending.as_str(),
                    now,
                ],
            )?;
            for (kind, recipient) in notifications {
                outbox::enqueue_in(&tx, id, *kind, recipient, now)?;
            }
            let record = get_request_in(&tx, id)?.ok_or(StoreError::NotFound(id))?;
            tx.commit()?;
            Ok(record)
        })
    }

    pub fn get_request(&self, id: Uuid) -> Result<Option<PrayerRequest>, StoreError> {
        self.with_conn(|conn| get_request_in(conn, id))
    }

    /// Newest first.
    pub fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<PrayerRequest>, StoreError> {
        self.with_conn(|conn| {
            let rows = match filter.status {
                Some(status) => {
                    let sql = format!(
                        "SELECT {COLUMNS} FROM prayer_requests WHERE status = ?1 ORDER BY created_at DESC"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(params![status.as_str()], map_request)?
                        .collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let sql =
                        format!("SELECT {COLUMNS} FROM prayer_requests ORDER BY created_at DESC");
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map([], map_request)?
                        .collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    /// Set status (and optionally notes) if the row is still at `expected_version`.
    ///
    /// `notes = Some("")` clears the notes. Returns `false` when the version moved.
    /// Fails with [`StoreError::ReplyInFlight`] while a reply is being sent.
    pub fn apply_triage(
        &self,
        id: Uuid,
        expected_version: i64,
        status: RequestStatus,
        notes: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let set_notes = notes.is_some();
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        self.with_conn(|conn| {
            if reply_in_flight_in(conn, id)? {
                return Err(StoreError::ReplyInFlight(id));
            }
            let changed = conn.execute(
                "UPDATE prayer_requests
                 SET status = ?1,
                     admin_notes = CASE WHEN ?2 THEN ?3 ELSE admin_notes END,
                     version = version + 1,
                     updated_at = ?4
                 WHERE id = ?5 AND version = ?6",
                params![
                    status.as_str(),
                    set_notes,
                    notes,
                    updated_at,
                    id.to_string(),
                    expected_version,
                ],
            )?;
            Ok(changed == 1)
        })
    }
}
