use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

impl Notification {
    #[must_use]
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, description)
    }

    #[must_use]
    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Warning, title, description)
    }

    #[must_use]
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, description)
    }

    fn new(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Fire-and-forget side channel for user-facing messages. Delivery failures
/// are swallowed; state never depends on a notification arriving.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl NotificationSink for UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        let _ = self.send(notification);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let Notification {
            severity,
            title,
            description,
        } = notification;
        match severity {
            Severity::Info => info!(%title, %description, "notification"),
            Severity::Warning => warn!(%title, %description, "notification"),
            Severity::Error => error!(%title, %description, "notification"),
        }
    }
}
