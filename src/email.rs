//! Email transport + dispatch.
//! Sends exactly one rendered email per call; no retry, no queue.

use std::{path::Path, time::Duration};

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header},
    transport::{file::AsyncFileTransport, stub::AsyncStubTransport},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::template::RenderedEmail;

/// Transport selected at runtime (SMTP for prod, FILE for local dev, STUB for tests and dry runs).
#[derive(Clone)]
pub enum Mailer {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
    Stub(AsyncStubTransport),
}

impl Mailer {
    /// Unified `send` so callers don't care which transport we're using.
    /// We normalize errors to String to avoid mixing different transport error types.
    pub async fn send(&self, email: Message) -> Result<(), String> {
        match self {
            Mailer::Smtp(m) => m.send(email).await.map(|_| ()).map_err(|e| e.to_string()),
            Mailer::File(f) => f.send(email).await.map(|_| ()).map_err(|e| e.to_string()),
            Mailer::Stub(s) => s.send(email).await.map(|_| ()).map_err(|e| e.to_string()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Mailer::Smtp(_) => "smtp",
            Mailer::File(_) => "file",
            Mailer::Stub(_) => "stub",
        }
    }
}

/// Domain errors we surface to the service layer.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("render error: {0}")]
    Render(String),
    #[error("invalid address: {0}")]
    Address(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("config error: {0}")]
    Config(String),
}

/// Transport + addressing. Cheap to clone.
#[derive(Clone)]
pub struct EmailDispatcher {
    mailer: Mailer,
    from: Mailbox,
    reply_to: Option<Mailbox>,
}

impl EmailDispatcher {
    pub fn new(mailer: Mailer, from: Mailbox, reply_to: Option<Mailbox>) -> Self {
        Self {
            mailer,
            from,
            reply_to,
        }
    }

    /// Build the dispatcher described by the `MAIL_*`, `SMTP_*` and `TRANSPORT` settings.
    pub fn from_config(cfg: &ApiConfig) -> Result<Self, EmailError> {
        let from: Mailbox = cfg
            .mail_from
            .parse()
            .map_err(|e| EmailError::Config(format!("invalid MAIL_FROM: {e}")))?;
        let reply_to = if cfg.mail_reply_to.trim().is_empty() {
            None
        } else {
            Some(
                cfg.mail_reply_to
                    .parse()
                    .map_err(|e| EmailError::Config(format!("invalid MAIL_REPLY_TO: {e}")))?,
            )
        };
        let mailer = match cfg.transport.as_str() {
            "smtp" => build_smtp_mailer(
                &cfg.smtp_host,
                cfg.smtp_port,
                &cfg.smtp_username,
                &cfg.smtp_password,
            )?,
            "file" => build_file_mailer(Path::new(&cfg.outbox_dir))?,
            "stub" => Mailer::Stub(AsyncStubTransport::new_ok()),
            other => {
                return Err(EmailError::Config(format!(
                    "unknown TRANSPORT {other:?}, expected smtp, file or stub"
                )));
            }
        };
        info!("Email transport: {}", mailer.kind());
        Ok(Self::new(mailer, from, reply_to))
    }

    /// Build a multipart (text+html) message for `to` and hand it to the transport.
    /// Returns a pseudo message ID (random nanoid) on acceptance.
    pub async fn send(&self, to: &str, email: &RenderedEmail) -> Result<String, EmailError> {
        let to_mb: Mailbox = to
            .trim()
            .parse()
            .map_err(|e| EmailError::Address(format!("{to}: {e}")))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to_mb)
            .subject(email.subject.clone());
        if let Some(rt) = &self.reply_to {
            builder = builder.reply_to(rt.clone());
        }

        let message = builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(email.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(email.html.clone()),
                    ),
            )
            .map_err(|e| EmailError::Config(format!("message build error: {e}")))?;

        debug!("Sending \"{}\" to {} via {}", email.subject, to, self.mailer.kind());
        match self.mailer.send(message).await {
            Ok(()) => {
                let id = nanoid();
                info!("Email accepted for {} (id {})", to, id);
                Ok(id)
            }
            Err(e) => {
                warn!("Failed to send email to {}: {}", to, e);
                Err(EmailError::Send(e))
            }
        }
    }
}

/// Build a STARTTLS SMTP transport with creds and short timeout.
fn build_smtp_mailer(host: &str, port: u16, user: &str, pass: &str) -> Result<Mailer, EmailError> {
    use lettre::transport::smtp::authentication::Credentials;

    let creds = Credentials::new(user.to_string(), pass.to_string());
    Ok(Mailer::Smtp(
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| EmailError::Config(format!("smtp relay {host}: {e}")))?
            .port(port)
            .credentials(creds)
            .timeout(Some(Duration::from_secs(15)))
            .build(),
    ))
}

/// Build a file transport (writes `.eml` files), used for local/dev.
fn build_file_mailer(dir: &Path) -> Result<Mailer, EmailError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| EmailError::Config(format!("outbox dir {}: {e}", dir.display())))?;
    Ok(Mailer::File(AsyncFileTransport::new(dir)))
}

/// Generate a compact pseudo message id (22 chars, URL-safe).
fn nanoid() -> String {
    use rand::{Rng, distr::Alphanumeric, rng};
    rng()
        .sample_iter(&Alphanumeric)
        .take(22)
        .map(char::from)
        .collect()
}
