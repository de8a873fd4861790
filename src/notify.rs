//! Notification and clipboard collaborators.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Success,
    Error,
    Info,
    Warning,
}

impl fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotifyKind::Success => "success",
            NotifyKind::Error => "error",
            NotifyKind::Info => "info",
            NotifyKind::Warning => "warning",
        };
        f.write_str(s)
    }
}

/// A toast-style message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub kind: NotifyKind,
    pub title: Option<String>,
    pub duration: Option<Duration>,
}

/// Fire-and-forget user notifications.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        message: &str,
        kind: NotifyKind,
        title: Option<&str>,
        duration: Option<Duration>,
    );
}

/// Writes notifications to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(
        &self,
        message: &str,
        kind: NotifyKind,
        title: Option<&str>,
        _duration: Option<Duration>,
    ) {
        let title = title.unwrap_or("");
        match kind {
            NotifyKind::Error => tracing::error!(title, "{message}"),
            NotifyKind::Warning => tracing::warn!(title, "{message}"),
            NotifyKind::Success | NotifyKind::Info => tracing::info!(%kind, title, "{message}"),
        }
    }
}

/// Forwards notifications to a channel, e.g. a UI event loop.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(
        &self,
        message: &str,
        kind: NotifyKind,
        title: Option<&str>,
        duration: Option<Duration>,
    ) {
        let notification = Notification {
            message: message.to_string(),
            kind,
            title: title.map(str::to_string),
            duration,
        };
        if self.tx.send(notification).is_err() {
            tracing::debug!("notification channel closed, dropping message");
        }
    }
}

/// Copy sink for detected codes. Failure is reported, never fatal.
#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn copy(&self, text: &str) -> bool;
}

/// The OS clipboard, via `arboard`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub async fn try_copy(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let mut clipboard =
                arboard::Clipboard::new().map_err(|e| Error::Clipboard(e.to_string()))?;
            clipboard
                .set_text(text)
                .map_err(|e| Error::Clipboard(e.to_string()))
        })
        .await
        .map_err(|e| Error::Clipboard(e.to_string()))?
    }
}

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn copy(&self, text: &str) -> bool {
        match self.try_copy(text).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "clipboard copy failed");
                false
            }
        }
    }
}

/// In-process clipboard that records every copy.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    copies: Mutex<Vec<String>>,
    fail: bool,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clipboard that rejects every copy.
    pub fn failing() -> Self {
        Self {
            copies: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn copies(&self) -> Vec<String> {
        self.copies
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.copies().pop()
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn copy(&self, text: &str) -> bool {
        if self.fail {
            return false;
        }
        match self.copies.lock() {
            Ok(mut copies) => {
                copies.push(text.to_string());
                true
            }
            Err(_) => false,
        }
    }
}
