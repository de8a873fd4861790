//! Email list watcher: polling, new-mail toasts and code auto-copy.

use crate::detector::CodeDetector;
use crate::error::Error;
use crate::models::Email;
use crate::notify::{Clipboard, Notifier, NotifyKind};
use crate::poller::{
    FetchTrigger, FreshnessPoller, ItemSource, PollStatus, PollerOptions, RefreshOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const NEW_MAIL_TOAST: Duration = Duration::from_secs(5);
const CODE_TOAST: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub poller: PollerOptions,
    /// Copy the code of the first new verification email.
    pub auto_copy: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poller: PollerOptions::default(),
            auto_copy: true,
        }
    }
}

struct Reporter {
    notifier: Arc<dyn Notifier>,
    clipboard: Arc<dyn Clipboard>,
    detector: CodeDetector,
    auto_copy: bool,
}

impl Reporter {
    fn new_emails(&self, emails: &[Email]) {
        let Some(first) = emails.first() else {
            return;
        };
        let message = match emails.len() {
            1 => "1 new email".to_string(),
            n => format!("{n} new emails"),
        };
        self.notifier.notify(
            &message,
            NotifyKind::Info,
            Some(first.subject.as_str()),
            Some(NEW_MAIL_TOAST),
        );

        if !self.auto_copy {
            return;
        }
        let Some(code) = self.detector.detect_in(first) else {
            return;
        };
        tracing::info!(message_id = %first.message_id, "verification code detected");

        let notifier = Arc::clone(&self.notifier);
        let clipboard = Arc::clone(&self.clipboard);
        tokio::spawn(async move {
            if clipboard.copy(&code).await {
                notifier.notify(
                    &format!("Verification code {code} copied"),
                    NotifyKind::Success,
                    None,
                    Some(CODE_TOAST),
                );
            } else {
                tracing::warn!("verification code could not be copied");
                notifier.notify(
                    &format!("Verification code {code} detected but not copied"),
                    NotifyKind::Warning,
                    None,
                    Some(CODE_TOAST),
                );
            }
        });
    }

    fn fetch_failed(&self, err: &Error, trigger: FetchTrigger) {
        let (kind, title) = match trigger {
            FetchTrigger::Automatic => (NotifyKind::Warning, "Auto refresh failed"),
            FetchTrigger::Manual | FetchTrigger::Forced => (NotifyKind::Error, "Refresh failed"),
        };
        self.notifier.notify(&err.to_string(), kind, Some(title), None);
    }
}

/// Keeps one account's email list fresh and reports new mail.
pub struct EmailWatcher<S: ItemSource<Item = Email>> {
    poller: FreshnessPoller<S>,
}

impl<S: ItemSource<Item = Email>> EmailWatcher<S> {
    pub fn new(
        source: S,
        notifier: Arc<dyn Notifier>,
        clipboard: Arc<dyn Clipboard>,
        options: WatchOptions,
    ) -> Self {
        Self::with_detector(source, notifier, clipboard, CodeDetector::default(), options)
    }

    pub fn with_detector(
        source: S,
        notifier: Arc<dyn Notifier>,
        clipboard: Arc<dyn Clipboard>,
        detector: CodeDetector,
        options: WatchOptions,
    ) -> Self {
        let reporter = Arc::new(Reporter {
            notifier,
            clipboard,
            detector,
            auto_copy: options.auto_copy,
        });
        let on_new = Arc::clone(&reporter);
        let poller = FreshnessPoller::builder(source)
            .options(options.poller)
            .on_new_items(move |emails: &[Email]| on_new.new_emails(emails))
            .on_error(move |err, trigger| reporter.fetch_failed(err, trigger))
            .build();
        Self { poller }
    }

    pub fn start(&self) -> bool {
        self.poller.start()
    }

    pub fn stop(&self) {
        self.poller.stop();
    }

    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.poller.refresh_now().await
    }

    pub async fn force_refresh(&self) -> RefreshOutcome {
        self.poller.force_refresh().await
    }

    pub fn emails(&self) -> Vec<Email> {
        self.poller.items()
    }

    pub fn status(&self) -> PollStatus {
        self.poller.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollStatus> {
        self.poller.subscribe()
    }

    pub fn poller(&self) -> &FreshnessPoller<S> {
        &self.poller
    }
}
