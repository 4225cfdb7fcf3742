use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Intent record written before a reply email leaves the building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyAttempt {
    pub id: Uuid,
    pub request_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub message: String,
    pub state: ReplyAttemptState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyAttemptState {
    /// Intent written, send not attempted yet.
    Pending,
    /// Provider accepted the email; record not yet updated.
    Sent,
    /// Record carries the reply.
    Recorded,
    /// Send failed; record untouched.
    Failed,
}

impl ReplyAttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Recorded => "recorded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "recorded" => Some(Self::Recorded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
