use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One submitted petition and its triage/reply history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrayerRequest {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: String,
    pub prayer_request: String,
    pub status: RequestStatus,
    pub admin_notes: Option<String>,
    pub reply_email: Option<String>,
    pub reply_subject: Option<String>,
    pub reply_message: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Archived,
    Replied,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Archived,
        Self::Replied,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Archived => "archived",
            Self::Replied => "replied",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "archived" => Some(Self::Archived),
            "replied" => Some(Self::Replied),
            _ => None,
        }
    }

    /// Statuses reachable from `self` in one step, excluding `self`.
    pub fn successors(&self) -> &'static [RequestStatus] {
        match self {
            Self::Pending => &[Self::InProgress, Self::Archived, Self::Replied],
            Self::InProgress => &[Self::Completed, Self::Archived, Self::Replied],
            Self::Completed | Self::Archived | Self::Replied => &[],
        }
    }

    /// Re-applying the current status is always allowed.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        *self == next || self.successors().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }

    /// Whether a reply may still be sent. `replied` itself is excluded.
    pub fn accepts_reply(&self) -> bool {
        self.successors().contains(&RequestStatus::Replied)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated intake payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrayerRequest {
    pub full_name: String,
    pub email: String,
    pub prayer_request: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageInput {
    pub status: RequestStatus,
    /// `Some("")` clears the notes, `None` leaves them alone.
    pub admin_notes: Option<String>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyInput {
    pub request_id: Uuid,
    pub subject: String,
    /// Freehand body; takes precedence over `template`.
    pub message: Option<String>,
    /// Canned reply id, see [`crate::template::canned_reply`].
    pub template: Option<String>,
    pub to: Option<String>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
}
