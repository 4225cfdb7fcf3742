//! Configuration module for the prayer request service.

use std::str::FromStr;

use anyhow::Context;

/// Struct containing all configuration options.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub log_to_file: bool,
    pub log_to_stdout: bool,
    pub log_json: bool,
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub listen_addr: String,
    pub listen_port: u16,
    pub database_path: String,
    pub outbox_dir: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub mail_from: String,
    pub mail_reply_to: String,
    pub transport: String,
    pub admin_email: String,
    pub admin_base_url: String,
    pub church_name: String,
    pub notify_on_intake: bool,
    pub notify_poll_secs: u64,
    pub notify_retry_min_secs: u64,
    pub notify_retry_max_secs: u64,
    pub notify_retry_times: u16,
    pub reply_stale_secs: u64,
}

/// # get_defaults()
/// Returns an `ApiConfig` struct populated with default values for all configuration options.
/// These defaults are overridden by environment variables in [`ApiConfig::from_env`].
/// # Environment Variables:
/// |Variable|Description|
/// |:------:|:---------:|
/// |`LOG_LEVEL`|Log level (DEBUG, INFO, WARN, ERROR)|
/// |`LOG_TO_FILE`|Whether to log to file (true/false)|
/// |`LOG_TO_STDOUT`|Whether to log to stdout (true/false)|
/// |`LOG_JSON`|Write the file log as JSON lines (true/false)|
/// |`LOG_DIR`|Directory to log to (relative to executable)|
/// |`LOG_FILE`|File to log to (relative to `LOG_DIR`)|
/// |`LISTEN_ADDR`|Address to bind to (e.g. `127.0.0.1`)|
/// |`LISTEN_PORT`|Port to bind to (e.g. `8080`)|
/// |`DATABASE_PATH`|SQLite database file|
/// |`SMTP_HOST`|SMTP server hostname (e.g. `smtp.example.com`)|
/// |`SMTP_PORT`|SMTP server port (e.g. `587`)|
/// |`SMTP_USERNAME`|SMTP username for authentication|
/// |`SMTP_PASSWORD`|SMTP password for authentication|
/// |`MAIL_FROM`|Default "from" email address|
/// |`MAIL_REPLY_TO`|Default "reply-to" email address (empty disables)|
/// |`TRANSPORT`|Email transport method (`smtp`, `file` or `stub`)|
/// |`OUTBOX_DIR`|Directory to store emails when using `file` transport|
/// |`ADMIN_EMAIL`|Operations address receiving new-request alerts|
/// |`ADMIN_BASE_URL`|Base URL of the admin console, used for deep links|
/// |`CHURCH_NAME`|Name shown in email signatures|
/// |`NOTIFY_ON_INTAKE`|Queue confirmation + admin alert on intake (true/false)|
/// |`NOTIFY_POLL_SECS`|Notification worker poll interval|
/// |`NOTIFY_RETRY_MIN_SECS`|First retry backoff|
/// |`NOTIFY_RETRY_MAX_SECS`|Backoff cap|
/// |`NOTIFY_RETRY_TIMES`|Attempts before a notification is dead-lettered|
/// |`REPLY_STALE_SECS`|Age after which an unconfirmed reply attempt is failed by reconciliation|
///
/// --------------------------------------------------------------------
/// ## Log defaults:
/// |`log_file`|`log_dir` |`log_to_file`|`log_to_stdout`|`log_json`|`log_level`|
/// |:--------:|:--------:|:-----------:|:-------------:|:--------:|:---------:|
/// |`out.log` |`logs`    |`false`      |`true`         |`false`   |`INFO`     |
/// --------------------------------------------------------------------
/// ## App defaults:
/// |`listen_addr`|`listen_port`|`database_path`|
/// |:-----------:|:-----------:|:-------------:|
/// |`127.0.0.1`  |`8080`       |`vigil.db`     |
/// --------------------------------------------------------------------
/// ## SMTP defaults:
/// | `smtp_host`| `smtp_port`| `smtp_username`| `smtp_password`|
/// |:----------:|:----------:|:--------------:|:--------------:|
/// | `localhost`|`587`       |`user`          |`password`      |
/// --------------------------------------------------------------------
/// ## Mail defaults:
/// |         `mail_from`|     `mail_reply_to`|`transport`|`outbox_dir`|
/// |:------------------:|:------------------:|:---------:|:----------:|
/// |`prayer@localhost.com`|`prayer@localhost.com`|`file`   |`outbox`    |
/// --------------------------------------------------------------------
/// ## Notification defaults:
/// |`notify_on_intake`|`poll`|`retry_min`|`retry_max`|`retry_times`|
/// |:----------------:|:----:|:---------:|:---------:|:-----------:|
/// |`true`            |`15`  |`60`       |`3600`     |`5`          |
/// --------------------------------------------------------------------
/// ## Reply defaults:
/// |`reply_stale_secs`|
/// |:----------------:|
/// |`900`             |
/// --------------------------------------------------------------------
pub fn get_defaults() -> ApiConfig {
    ApiConfig {
        log_file: "out.log".into(),
        log_dir: "logs".into(),
        log_to_file: false,
        log_to_stdout: true,
        log_json: false,
        log_level: "INFO".into(),
        listen_addr: "127.0.0.1".into(),
        listen_port: 8080,
        database_path: "vigil.db".into(),
        outbox_dir: "outbox".into(),
        smtp_host: "localhost".into(),
        smtp_port: 587,
        smtp_username: "user".into(),
        smtp_password: "password".into(),
        mail_from: "prayer@localhost.com".into(),
        mail_reply_to: "prayer@localhost.com".into(),
        transport: "file".into(),
        admin_email: "admin@localhost.com".into(),
        admin_base_url: "http://localhost:3000".into(),
        church_name: "Our Church".into(),
        notify_on_intake: true,
        notify_poll_secs: 15,
        notify_retry_min_secs: 60,
        notify_retry_max_secs: 3600,
        notify_retry_times: 5,
        reply_stale_secs: 900,
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        get_defaults()
    }
}

impl ApiConfig {
    /// Start from [`get_defaults`] and override every field whose variable is set.
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ApiConfig::from_env`], with the variable source injected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut c = get_defaults();

        override_str(&lookup, "LOG_LEVEL", &mut c.log_level);
        override_parsed(&lookup, "LOG_TO_FILE", &mut c.log_to_file)?;
        override_parsed(&lookup, "LOG_TO_STDOUT", &mut c.log_to_stdout)?;
        override_parsed(&lookup, "LOG_JSON", &mut c.log_json)?;
        override_str(&lookup, "LOG_DIR", &mut c.log_dir);
        override_str(&lookup, "LOG_FILE", &mut c.log_file);

        override_str(&lookup, "LISTEN_ADDR", &mut c.listen_addr);
        override_parsed(&lookup, "LISTEN_PORT", &mut c.listen_port)?;
        override_str(&lookup, "DATABASE_PATH", &mut c.database_path);

        override_str(&lookup, "SMTP_HOST", &mut c.smtp_host);
        override_parsed(&lookup, "SMTP_PORT", &mut c.smtp_port)?;
        override_str(&lookup, "SMTP_USERNAME", &mut c.smtp_username);
        override_str(&lookup, "SMTP_PASSWORD", &mut c.smtp_password);
        override_str(&lookup, "MAIL_FROM", &mut c.mail_from);
        override_str(&lookup, "MAIL_REPLY_TO", &mut c.mail_reply_to);
        override_str(&lookup, "TRANSPORT", &mut c.transport);
        override_str(&lookup, "OUTBOX_DIR", &mut c.outbox_dir);

        override_str(&lookup, "ADMIN_EMAIL", &mut c.admin_email);
        override_str(&lookup, "ADMIN_BASE_URL", &mut c.admin_base_url);
        override_str(&lookup, "CHURCH_NAME", &mut c.church_name);

        override_parsed(&lookup, "NOTIFY_ON_INTAKE", &mut c.notify_on_intake)?;
        override_parsed(&lookup, "NOTIFY_POLL_SECS", &mut c.notify_poll_secs)?;
        override_parsed(&lookup, "NOTIFY_RETRY_MIN_SECS", &mut c.notify_retry_min_secs)?;
        override_parsed(&lookup, "NOTIFY_RETRY_MAX_SECS", &mut c.notify_retry_max_secs)?;
        override_parsed(&lookup, "NOTIFY_RETRY_TIMES", &mut c.notify_retry_times)?;
        override_parsed(&lookup, "REPLY_STALE_SECS", &mut c.reply_stale_secs)?;

        c.transport = c.transport.to_lowercase();
        c.admin_base_url = c.admin_base_url.trim_end_matches('/').to_string();
        Ok(c)
    }
}

fn override_str<F>(lookup: &F, key: &str, slot: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup(key) {
        *slot = v;
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), anyhow::Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(v) = lookup(key) {
        *slot = v
            .trim()
            .to_lowercase()
            .parse()
            .with_context(|| format!("invalid value for {key}: {v:?}"))?;
    }
    Ok(())
}
