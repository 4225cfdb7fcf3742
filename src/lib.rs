//! Prayer request intake, triage and reply service.
//!
//! Requests enter through the public form ([`service::submit`]), are triaged by
//! staff ([`service::triage`]) and are answered by email ([`service::reply`]).
//! Confirmation and admin-alert emails go through a persisted outbox drained by
//! [`notify::NotificationWorker`].

pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod logger;
pub mod models;
pub mod notify;
pub mod routes;
pub mod service;
pub mod state;
pub mod template;

pub use db::Database;
pub use error::{AppError, AppResult};
pub use state::AppState;
