//! Error and notification policy.
//!
//! Every pipeline stage routes its per-item failures through one shared
//! [`Policy`]. The policy reports the failure through a [`Sink`] and lets the
//! stage carry on with the next item. One malformed source file never halts
//! a whole run.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ItemFailure;
use crate::manifest::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Error,
    Info,
}

/// A message produced by a stage, consumed once by the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: Kind,
    pub message: String,
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: Kind::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: Kind::Info,
            message: message.into(),
        }
    }
}

/// Where notifications end up.
pub trait Sink: Send + Sync {
    fn deliver(&self, notification: &Notification);
}

/// Writes notifications to the log.
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn deliver(&self, notification: &Notification) {
        match notification.kind {
            Kind::Error => tracing::error!("{}", notification.message),
            Kind::Info => tracing::info!("{}", notification.message),
        }
    }
}

/// Pops up a desktop notification, falling back to the console when the
/// platform command is unavailable.
pub struct DesktopSink {
    title: String,
}

impl DesktopSink {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    fn command(&self, message: &str) -> Command {
        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification {:?} with title {:?}",
                message, self.title
            );
            let mut cmd = Command::new("osascript");
            cmd.arg("-e").arg(script);
            cmd
        } else {
            let mut cmd = Command::new("notify-send");
            cmd.arg(&self.title).arg(message);
            cmd
        }
    }
}

impl Sink for DesktopSink {
    fn deliver(&self, notification: &Notification) {
        let status = self
            .command(&notification.message)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => {
                tracing::debug!("{}", notification.message)
            }
            _ => ConsoleSink.deliver(notification),
        }
    }
}

/// How many delivered notifications are kept around for inspection.
const RECENT: usize = 64;

/// The shared failure policy.
pub struct Policy {
    sink: Box<dyn Sink>,
    errors: AtomicUsize,
    recent: Mutex<VecDeque<Notification>>,
}

impl Policy {
    pub fn new(sink: impl Sink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            errors: AtomicUsize::new(0),
            recent: Mutex::new(VecDeque::with_capacity(RECENT)),
        }
    }

    /// Console sink when `notifyViaConsole` is set, desktop otherwise.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        if manifest.notify_via_console {
            Self::new(ConsoleSink)
        } else {
            Self::new(DesktopSink::new(format!(
                "gantry: {}",
                manifest.project_name()
            )))
        }
    }

    /// Reports a per-item failure. The caller drops the item and continues.
    pub fn on_error(&self, failure: ItemFailure) {
        self.notify(Notification::error(failure.to_string()));
    }

    pub fn notify(&self, notification: Notification) {
        self.sink.deliver(&notification);

        if notification.kind == Kind::Error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }

        let mut recent = self.recent.lock().unwrap_or_else(|poison| poison.into_inner());
        if recent.len() == RECENT {
            recent.pop_front();
        }
        recent.push_back(notification);
    }

    /// Number of error notifications delivered so far.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    /// The last few delivered notifications, oldest first.
    pub fn recent(&self) -> Vec<Notification> {
        self.recent
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Policy(*)")
    }
}
