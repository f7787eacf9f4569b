//! Side-effecting notification sink for failures and lifecycle changes
//!
//! Gateways and sessions never terminate the process; everything worth a human
//! looking at goes through a [`Notifier`]. The default forwards to `tracing`.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Notification level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotifyLevel::Debug => "DEBUG",
            NotifyLevel::Info => "INFO",
            NotifyLevel::Warn => "WARN",
            NotifyLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Logging collaborator
pub trait Notifier: Send + Sync + 'static {
    /// Report an event. `persist` asks the sink to keep it beyond the process
    /// log (e.g. forward to a log shipper).
    fn notify(&self, level: NotifyLevel, component: &str, message: &str, persist: bool);
}

/// Forwards notifications to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NotifyLevel, component: &str, message: &str, persist: bool) {
        match level {
            NotifyLevel::Debug => tracing::debug!(component, persist, "{}", message),
            NotifyLevel::Info => tracing::info!(component, persist, "{}", message),
            NotifyLevel::Warn => tracing::warn!(component, persist, "{}", message),
            NotifyLevel::Error => tracing::error!(component, persist, "{}", message),
        }
    }
}

/// A recorded notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotifyLevel,
    pub component: String,
    pub message: String,
    pub persist: bool,
}

/// Keeps every notification in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    entries: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn entries(&self) -> Vec<Notification> {
        self.entries.lock().clone()
    }

    /// Number of notifications from `component` at `level`
    pub fn count(&self, component: &str, level: NotifyLevel) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|n| n.component == component && n.level == level)
            .count()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, level: NotifyLevel, component: &str, message: &str, persist: bool) {
        self.entries.lock().push(Notification {
            level,
            component: component.to_string(),
            message: message.to_string(),
            persist,
        });
    }
}
