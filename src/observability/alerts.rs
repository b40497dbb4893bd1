//! Operator alerts
//!
//! Conditions that need a human (schema files left inconsistent, a preserved
//! schema directory that could not be put back, schema files edited while
//! the server was down) are raised through an [`AlertNotifier`]. The default
//! notifier writes an `error` log line flagged with `alert = true`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Schema files could not be restored after a failed write.
    SchemaFilesInconsistent,
    /// A preserved schema directory could not be moved back after a failed restore.
    SchemaDirectoryNotRestored,
    /// Schema files changed while the server was offline.
    OfflineSchemaChanges,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SchemaFilesInconsistent => "SCHEMA_FILES_INCONSISTENT",
            AlertKind::SchemaDirectoryNotRestored => "SCHEMA_DIRECTORY_NOT_RESTORED",
            AlertKind::OfflineSchemaChanges => "OFFLINE_SCHEMA_CHANGES",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Sink for operator alerts.
pub trait AlertNotifier: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// Logs alerts through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertNotifier;

impl AlertNotifier for LogAlertNotifier {
    fn notify(&self, alert: Alert) {
        tracing::error!(
            event = Event::OperatorAlert.as_str(),
            alert = true,
            kind = alert.kind.as_str(),
            raised_at = %alert.raised_at.to_rfc3339(),
            "{}",
            alert.message
        );
    }
}

/// Keeps alerts in memory (for testing).
#[derive(Debug, Default, Clone)]
pub struct MemoryAlertNotifier {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl MemoryAlertNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts.lock().iter().filter(|a| a.kind == kind).count()
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

impl AlertNotifier for MemoryAlertNotifier {
    fn notify(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}
