//! Public data models exchanged with the dashboard API.

use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TIMEOUT_SECS,
};
use crate::error::{Error, Result};
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// A detected verification code, or `None` when the email carries none.
pub type DetectionResult = Option<String>;

/// One cached email as listed by the dashboard API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Email {
    /// Stable message identifier used for diffing across fetches.
    pub message_id: String,
    /// Message subject line.
    pub subject: String,
    /// Sender address if available.
    pub from_email: Option<String>,
    /// Receive time (RFC 3339, as provided by the API).
    pub received_at: Option<String>,
    /// Short plaintext preview.
    pub body_preview: String,
    /// Full body (HTML or text) when the list endpoint includes it.
    pub body: Option<String>,
    /// Folder the message was listed from.
    pub folder: Option<String>,
    /// Read flag.
    pub is_read: bool,
}

impl Email {
    /// Plaintext rendering of the body, or the preview when there is no body.
    pub fn text(&self) -> String {
        match self.body.as_deref().filter(|b| !b.trim().is_empty()) {
            Some(body) if looks_like_html(body) => {
                let doc = Html::parse_fragment(body);
                clean_text(&doc.root_element().text().collect::<String>())
            }
            Some(body) => clean_text(body),
            None => clean_text(&self.body_preview),
        }
    }

    /// Received time parsed as UTC, if present and well formed.
    pub fn received_at_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.received_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}

/// One page of an account's email list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailPage {
    /// Emails on this page, newest first.
    pub emails: Vec<Email>,
    /// Total number of emails in the folder.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    /// Page size used by the server.
    pub page_size: u32,
}

/// Lifecycle of an asynchronous batch job (e.g. bulk account import).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchJobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl BatchJobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Outcome for one account processed by a batch job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchJobResult {
    /// Account email address; unique within a job.
    pub email: String,
    /// Whether the account was processed successfully.
    pub success: bool,
    /// Server message for this account.
    pub message: Option<String>,
}

/// Batch job status snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchJob {
    /// Job identifier.
    pub job_id: String,
    /// Current status.
    pub status: BatchJobStatus,
    /// Number of accounts submitted.
    pub total: u64,
    /// Number of accounts processed so far.
    pub processed: u64,
    /// Results for processed accounts.
    pub results: Vec<BatchJobResult>,
}

impl BatchJob {
    /// Progress in percent, 0 when the job is empty.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.processed.min(self.total) * 100) / self.total) as u8
    }
}

/// Client and watcher configuration.
///
/// Every key is optional in TOML; missing keys take the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the dashboard API, without trailing slash.
    pub base_url: String,
    /// Request timeout.
    #[serde(rename = "timeout_secs", with = "duration_secs")]
    pub timeout: Duration,
    /// Optional proxy URL for all requests.
    pub proxy_url: Option<String>,
    /// Optional API key sent on every request.
    pub api_key: Option<String>,
    /// Seconds between automatic refreshes.
    pub poll_interval_secs: u64,
    /// Emails requested per page.
    pub page_size: u32,
    /// Copy detected codes of new emails to the clipboard.
    pub auto_copy_codes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            proxy_url: None,
            api_key: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            auto_copy_codes: true,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        if config.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be > 0".into()));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

fn looks_like_html(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["<html", "<body", "<div", "<p", "<br", "<table", "<span"]
        .iter()
        .any(|tag| lower.contains(tag))
}

fn clean_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_ws = false;
    for c in input.chars() {
        if c.is_whitespace() {
            if !last_ws {
                out.push(' ');
            }
            last_ws = true;
        } else {
            out.push(c);
            last_ws = false;
        }
    }
    out.trim().to_string()
}
