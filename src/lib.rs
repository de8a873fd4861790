pub mod client;
pub mod constants;
pub mod detector;
pub mod error;
pub mod models;
pub mod notify;
pub mod poller;
pub mod watch;

pub use client::{BatchJobSource, EmailListSource, EmailQuery, MailApi, MailApiBuilder};
pub use constants::{
    default_headers, default_poll_interval, default_timeout, DEFAULT_BASE_URL,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TIMEOUT_SECS,
};
pub use detector::{default_detector, detect_verification_code, CodeDetector, CodePattern};
pub use error::{Error, Result};
pub use models::{BatchJob, BatchJobResult, BatchJobStatus, Config, DetectionResult, Email, EmailPage};
pub use notify::{
    ChannelNotifier, Clipboard, MemoryClipboard, Notification, Notifier, NotifyKind,
    SystemClipboard, TracingNotifier,
};
pub use poller::{
    from_fn, CountdownDisplay, FetchTrigger, FnSource, FreshnessPoller, ItemSource, PollPhase,
    PollStatus, PollerBuilder, PollerOptions, RefreshOutcome,
};
pub use watch::{EmailWatcher, WatchOptions};
