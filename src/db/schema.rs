pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS prayer_requests (
    id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL,
    phone TEXT,
    email TEXT NOT NULL,
    prayer_request TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'in_progress', 'completed', 'archived', 'replied')),
    admin_notes TEXT,
    reply_email TEXT,
    reply_subject TEXT,
    reply_message TEXT,
    version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (status <> 'replied' OR (reply_email IS NOT NULL AND reply_subject IS NOT NULL AND reply_message IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS reply_attempts (
    id TEXT PRIMARY KEY,
    request_id TEXT NOT NULL REFERENCES prayer_requests(id) ON DELETE CASCADE,
    recipient TEXT NOT NULL,
    subject TEXT NOT NULL,
    message TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending' CHECK (state IN ('pending', 'sent', 'recorded', 'failed')),
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notification_outbox (
    id TEXT PRIMARY KEY,
    request_id TEXT NOT NULL REFERENCES prayer_requests(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK (kind IN ('confirmation', 'admin_notification')),
    recipient TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending' CHECK (state IN ('pending', 'sent', 'dead')),
    attempts INTEGER NOT NULL DEFAULT 0,
    next_attempt_at TEXT NOT NULL,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_prayer_requests_status ON prayer_requests(status);
CREATE INDEX IF NOT EXISTS idx_reply_attempts_request ON reply_attempts(request_id);
CREATE INDEX IF NOT EXISTS idx_outbox_due ON notification_outbox(state, next_attempt_at);

-- Only one reply in flight per request at a time
CREATE UNIQUE INDEX IF NOT EXISTS idx_one_inflight_reply
    ON reply_attempts(request_id) WHERE state IN ('pending', 'sent');
"#;
