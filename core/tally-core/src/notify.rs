//! Notification intents.
//!
//! Delivery is fire-and-forget: callers log a failed delivery and move on.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn completed(project_name: &str) -> Self {
        Self {
            title: "Session completed".to_string(),
            body: format!("You completed your {} session!", project_name),
        }
    }

    pub fn auto_saved(project_name: &str) -> Self {
        Self {
            title: "Session auto-paused".to_string(),
            body: format!("Your {} session was saved automatically", project_name),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), String>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), String> {
        tracing::info!(
            title = %notification.title,
            body = %notification.body,
            "Notification"
        );
        Ok(())
    }
}
