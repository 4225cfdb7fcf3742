//! App-wide state shared by handlers, services and the notification worker.

use std::sync::Arc;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::db::Database;
use crate::email::EmailDispatcher;
use crate::template::TemplateEngine;

pub struct AppState {
    pub config: ApiConfig,
    pub db: Database,
    pub dispatcher: EmailDispatcher,
    pub templates: TemplateEngine,
    /// Wakes the notification worker after intake commits.
    pub notifier: Arc<Notify>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        db: Database,
        dispatcher: EmailDispatcher,
        templates: TemplateEngine,
    ) -> Self {
        Self {
            config,
            db,
            dispatcher,
            templates,
            notifier: Arc::new(Notify::new()),
        }
    }

    /// Deep link into the admin triage view for one request.
    pub fn admin_url(&self, id: Uuid) -> String {
        format!("{}/admin/prayer-requests/{id}", self.config.admin_base_url)
    }
}
