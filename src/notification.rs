//! User-facing notifications and the channel they are dispatched on

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Danger,
    Warning,
    Info,
}

/// Semantic notification shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub text: String,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn danger(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            kind: NotificationKind::Danger,
        }
    }

    pub fn info(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            kind: NotificationKind::Info,
        }
    }
}

/// Centralized error-reporting channel owned by the embedding application
///
/// Every failure path of the coordinator dispatches here instead of
/// propagating a panic to the caller.
pub trait ErrorChannel: Send + Sync {
    /// Dispatch a notification
    fn emit(&self, notification: Notification);
}

impl ErrorChannel for mpsc::UnboundedSender<Notification> {
    fn emit(&self, notification: Notification) {
        if let Err(e) = self.send(notification) {
            warn!("Notification dropped, receiver closed: {}", e.0.text);
        }
    }
}
