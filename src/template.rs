//! Email template rendering with Handlebars.
//!
//! Pure: structured data in, subject + HTML (+ plaintext alternative) out.
//! Templates are compiled into the binary and share the `base` layout partial
//! (`{{#> base}} ... {{/base}}`).

use handlebars::Handlebars;
use once_cell::sync::OnceCell;
use serde::Serialize;
use uuid::Uuid;

use crate::email::EmailError;

static REGISTRY: OnceCell<Handlebars<'static>> = OnceCell::new();

const BASE: &str = include_str!("../templates/base.hbs");
const TEMPLATES: &[(&str, &str)] = &[
    ("confirmation", include_str!("../templates/confirmation.hbs")),
    ("admin_notification", include_str!("../templates/admin_notification.hbs")),
    ("reply", include_str!("../templates/reply.hbs")),
];

/// Build the registry in strict mode so a missing variable is a render error.
fn build_registry() -> Result<Handlebars<'static>, EmailError> {
    let mut reg = Handlebars::new();
    reg.set_strict_mode(true);
    reg.register_partial("base", BASE)
        .map_err(|e| EmailError::Render(e.to_string()))?;
    for (name, src) in TEMPLATES {
        reg.register_template_string(name, *src)
            .map_err(|e| EmailError::Render(format!("{name}: {e}")))?;
    }
    Ok(reg)
}

/// A rendered email, ready for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationData {
    pub name: String,
    pub prayer_request: String,
    pub request_id: Uuid,
    pub church_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotificationData {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub prayer_request: String,
    pub request_id: Uuid,
    pub admin_url: String,
    pub church_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyData {
    pub name: String,
    pub original_prayer_request: String,
    pub admin_message: String,
    pub request_id: Uuid,
    pub church_name: String,
}

#[derive(Clone, Copy)]
pub struct TemplateEngine {
    registry: &'static Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Result<Self, EmailError> {
        Ok(Self {
            registry: REGISTRY.get_or_try_init(build_registry)?,
        })
    }

    pub fn render_confirmation(&self, data: &ConfirmationData) -> Result<RenderedEmail, EmailError> {
        self.render("confirmation", "We received your prayer request".into(), data)
    }

    pub fn render_admin_notification(
        &self,
        data: &AdminNotificationData,
    ) -> Result<RenderedEmail, EmailError> {
        let subject = format!("New prayer request from {}", data.name);
        self.render("admin_notification", subject, data)
    }

    /// The subject is the one the admin typed; it is passed through untouched.
    pub fn render_reply(&self, subject: &str, data: &ReplyData) -> Result<RenderedEmail, EmailError> {
        self.render("reply", subject.to_string(), data)
    }

    fn render<T: Serialize>(
        &self,
        name: &str,
        subject: String,
        data: &T,
    ) -> Result<RenderedEmail, EmailError> {
        if !self.registry.has_template(name) {
            return Err(EmailError::TemplateNotFound(name.to_string()));
        }
        let html = self
            .registry
            .render(name, data)
            .map_err(|e| EmailError::Render(e.to_string()))?;
        let text = strip_html::strip(&html);
        Ok(RenderedEmail { subject, html, text })
    }
}

/// One entry of the canned reply catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CannedReply {
    pub id: &'static str,
    pub label: &'static str,
    pub body: &'static str,
}

const CANNED_REPLIES: &[CannedReply] = &[
    CannedReply {
        id: "praying",
        label: "We're praying",
        body: "Thank you for trusting us with your prayer request. Our prayer team has been \
               lifting you up in prayer, and we will continue to do so in the days ahead.",
    },
    CannedReply {
        id: "encouragement",
        label: "Encouragement",
        body: "We want you to know that you are not alone. God sees you and cares deeply for \
               you, and our church family is standing with you during this season.",
    },
    CannedReply {
        id: "support",
        label: "Offering support",
        body: "Thank you for reaching out. If you would like to talk with one of our pastors \
               or need practical help, simply reply to this email and we will be in touch.",
    },
    CannedReply {
        id: "scripture",
        label: "Scripture",
        body: "\"Do not be anxious about anything, but in every situation, by prayer and \
               petition, with thanksgiving, present your requests to God. And the peace of God, \
               which transcends all understanding, will guard your hearts and your minds in \
               Christ Jesus.\" (Philippians 4:6-7)",
    },
    CannedReply {
        id: "follow_up",
        label: "Follow-up",
        body: "We have been praying for you since you shared your request and wanted to \
               check in. How are things going? We would love to hear how we can keep praying.",
    },
];

pub fn canned_replies() -> &'static [CannedReply] {
    CANNED_REPLIES
}

pub fn canned_reply(id: &str) -> Option<&'static CannedReply> {
    CANNED_REPLIES.iter().find(|c| c.id == id)
}

/// Tiny best-effort HTML→plaintext stripper for the text alternative.
mod strip_html {
    pub fn strip(html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut in_tag = false;
        for c in html.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                _ if !in_tag => out.push(c),
                _ => {}
            }
        }
        let out = out
            .replace("&nbsp;", " ")
            .replace("&middot;", "·")
            .replace("&quot;", "\"")
            .replace("&#x27;", "'")
            .replace("&#x3D;", "=")
            .replace("&#x60;", "`")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&");
        out.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
