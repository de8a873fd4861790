use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const DEFAULT_FOLDER: &str = "inbox";
pub const API_KEY_HEADER: &str = "x-api-key";

// Countdown display: publish every COARSE_STEP seconds, every second below FINE_BELOW.
pub const COARSE_STEP_SECS: u64 = 5;
pub const FINE_BELOW_SECS: u64 = 10;

pub const MIN_CODE_LEN: usize = 4;
pub const MAX_CODE_LEN: usize = 8;
pub const MIN_ALPHA_CODE_LEN: usize = 6;

/// Lowercase phrases; at least one must occur in `subject + " " + body`.
pub const VERIFICATION_KEYWORDS: &[&str] = &[
    "verification code",
    "security code",
    "otp",
    "one-time password",
    "验证码",
    "安全码",
    "一次性密码",
    "激活码",
    "校验码",
    "动态码",
    "código de verificación",
    "código de verificação",
    "code de vérification",
    "bestätigungscode",
    "verifizierungscode",
    "codice di verifica",
    "weryfikacyjny",
];

/// Tokens that match a code shape but are ordinary words.
pub const EXCLUDED_CODES: &[&str] = &[
    "your", "code", "email", "click", "verify", "please", "here", "this", "that", "with", "from",
    "account", "password", "login", "signin", "sign", "enter", "below", "above", "microsoft",
    "outlook", "security", "expire", "expires", "minutes", "hours", "thanks", "regards", "team",
    "support", "confirm", "continue", "verification", "账户", "请", "您的", "验证", "邮箱", "代码",
];

pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("user-agent", concat!("mailwatch-rs/", env!("CARGO_PKG_VERSION"))),
    ("accept", "application/json"),
    ("accept-language", "en-US,en;q=0.9,zh-CN;q=0.8"),
];

pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (k, v) in DEFAULT_HEADERS {
        let name = HeaderName::from_static(k);
        if let Ok(val) = HeaderValue::from_str(v) {
            headers.insert(name, val);
        }
    }
    headers
}

pub fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

pub fn default_poll_interval() -> Duration {
    Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
}
