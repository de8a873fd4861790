use crate::constants::*;
use crate::detector::default_detector;
use crate::error::{Error, Result};
use crate::models::{BatchJob, BatchJobResult, BatchJobStatus, Config, Email, EmailPage};
use crate::poller::{FetchTrigger, ItemSource};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, ClientBuilder, Url,
};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Query parameters for an email list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailQuery {
    pub folder: String,
    pub page: u32,
    pub page_size: u32,
    /// Ask the backend to re-sync from the mail server first.
    pub refresh: bool,
}

impl Default for EmailQuery {
    fn default() -> Self {
        Self {
            folder: DEFAULT_FOLDER.to_string(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            refresh: false,
        }
    }
}

impl EmailQuery {
    fn params(&self) -> [(&'static str, String); 4] {
        [
            ("folder", self.folder.clone()),
            ("page", self.page.to_string()),
            ("page_size", self.page_size.to_string()),
            ("refresh", self.refresh.to_string()),
        ]
    }
}

fn build_headers(api_key: Option<&str>) -> Result<HeaderMap> {
    let mut headers = default_headers();
    if let Some(key) = api_key {
        let value = HeaderValue::from_str(key)
            .map_err(|_| Error::Config("api key is not a valid header value".into()))?;
        headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
    }
    Ok(headers)
}

/// Accept both bare payloads and `{"success": .., "data": ..}` envelopes.
fn unwrap_envelope(value: serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Object(mut map)
            if map.contains_key("data") || map.contains_key("success") =>
        {
            if map.get("success").and_then(|s| s.as_bool()) == Some(false) {
                let message = map
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("request failed")
                    .to_string();
                return Err(Error::Fetch(message));
            }
            Ok(map.remove("data").unwrap_or_default())
        }
        other => Ok(other),
    }
}

/// HTTP client for the mailbox dashboard API.
#[derive(Debug, Clone)]
pub struct MailApi {
    config: Config,
    base: Url,
    client: Client,
}

impl MailApi {
    pub fn new(config: Option<Config>) -> Result<Self> {
        let cfg = config.unwrap_or_default();
        let base = Url::parse(cfg.base_url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("invalid base url {}: {e}", cfg.base_url)))?;

        let mut builder = ClientBuilder::new()
            .timeout(cfg.timeout)
            .default_headers(build_headers(cfg.api_key.as_deref())?);

        if let Some(proxy) = &cfg.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(Error::Http)?);
        }

        let client = builder.build().map_err(Error::Http)?;

        Ok(Self {
            config: cfg,
            base,
            client,
        })
    }

    pub fn builder() -> MailApiBuilder {
        MailApiBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("base url cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        params: &[(&str, String)],
    ) -> Result<T> {
        let resp = self.client.get(url).query(params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Status { status, body });
        }
        let value: serde_json::Value = serde_json::from_str(&body)?;
        Ok(serde_json::from_value(unwrap_envelope(value)?)?)
    }

    /// List one page of an account's emails.
    pub async fn list_emails(&self, account: &str, query: &EmailQuery) -> Result<EmailPage> {
        let url = self.url(&["emails", account.trim()])?;
        tracing::debug!(account, page = query.page, refresh = query.refresh, "listing emails");
        self.get_json(url, &query.params()).await
    }

    /// Fetch one email with its full body.
    pub async fn get_email(&self, account: &str, message_id: &str) -> Result<Email> {
        let url = self.url(&["emails", account.trim(), message_id.trim()])?;
        self.get_json(url, &[]).await
    }

    /// Fetch the status of an asynchronous batch job.
    pub async fn batch_job(&self, job_id: &str) -> Result<BatchJob> {
        let url = self.url(&["batch-jobs", job_id.trim()])?;
        self.get_json(url, &[]).await
    }

    /// Newest email on the first page that carries a verification code.
    pub async fn latest_verification_code(&self, account: &str) -> Result<Option<(Email, String)>> {
        let query = EmailQuery {
            page_size: self.config.page_size,
            ..EmailQuery::default()
        };
        let page = self.list_emails(account, &query).await?;
        let detector = default_detector();
        Ok(page
            .emails
            .into_iter()
            .find_map(|email| detector.detect_in(&email).map(|code| (email, code))))
    }

    /// Poll source over an account's first inbox page.
    pub fn email_source(&self, account: impl Into<String>) -> EmailListSource {
        EmailListSource {
            api: self.clone(),
            account: account.into(),
            query: EmailQuery {
                page_size: self.config.page_size,
                ..EmailQuery::default()
            },
        }
    }

    /// Poll source over a batch job's per-account results.
    pub fn batch_source(&self, job_id: impl Into<String>) -> BatchJobSource {
        BatchJobSource {
            api: self.clone(),
            job_id: job_id.into(),
            status: Mutex::new(BatchJobStatus::Pending),
            percent: AtomicU8::new(0),
        }
    }
}

/// Builder for [`MailApi`].
#[derive(Debug, Default)]
pub struct MailApiBuilder {
    config: Config,
}

impl MailApiBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn build(self) -> Result<MailApi> {
        MailApi::new(Some(self.config))
    }
}

/// An account's email list as an [`ItemSource`]. Forced fetches ask the
/// backend to re-sync.
#[derive(Debug, Clone)]
pub struct EmailListSource {
    api: MailApi,
    account: String,
    query: EmailQuery,
}

impl EmailListSource {
    pub fn with_query(mut self, query: EmailQuery) -> Self {
        self.query = query;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }
}

#[async_trait]
impl ItemSource for EmailListSource {
    type Item = Email;
    type Id = String;

    async fn fetch(&self, trigger: FetchTrigger) -> Result<Vec<Email>> {
        let query = EmailQuery {
            refresh: self.query.refresh || trigger == FetchTrigger::Forced,
            ..self.query.clone()
        };
        let page = self.api.list_emails(&self.account, &query).await?;
        Ok(page.emails)
    }

    fn id_of(&self, item: &Email) -> String {
        item.message_id.clone()
    }

    fn is_bound(&self) -> bool {
        !self.account.trim().is_empty()
    }
}

/// A batch job's processed results as an [`ItemSource`], keyed by account.
#[derive(Debug)]
pub struct BatchJobSource {
    api: MailApi,
    job_id: String,
    status: Mutex<BatchJobStatus>,
    percent: AtomicU8,
}

impl BatchJobSource {
    /// Status seen by the most recent successful fetch.
    pub fn last_status(&self) -> BatchJobStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(BatchJobStatus::Pending)
    }

    /// Progress reported by the most recent successful fetch.
    pub fn last_percent(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ItemSource for BatchJobSource {
    type Item = BatchJobResult;
    type Id = String;

    async fn fetch(&self, _trigger: FetchTrigger) -> Result<Vec<BatchJobResult>> {
        let job = self.api.batch_job(&self.job_id).await?;
        if let Ok(mut status) = self.status.lock() {
            *status = job.status;
        }
        self.percent.store(job.percent(), Ordering::Relaxed);
        tracing::debug!(
            job_id = %self.job_id,
            processed = job.processed,
            total = job.total,
            percent = job.percent(),
            "batch job progress"
        );
        Ok(job.results)
    }

    fn id_of(&self, item: &BatchJobResult) -> String {
        item.email.clone()
    }

    fn is_bound(&self) -> bool {
        !self.job_id.trim().is_empty()
    }
}
