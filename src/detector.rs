//! Verification-code detection for email subjects and bodies.
//!
//! Detection is a two-stage heuristic. A keyword gate first checks that the
//! message talks about a verification code at all; only then is the text run
//! through an ordered list of patterns, most explicit first. The first
//! capture that survives validation wins.

use crate::constants::{
    EXCLUDED_CODES, MAX_CODE_LEN, MIN_ALPHA_CODE_LEN, MIN_CODE_LEN, VERIFICATION_KEYWORDS,
};
use crate::error::{Error, Result};
use crate::models::{DetectionResult, Email};
use once_cell::sync::Lazy;
use regex::Regex;

/// Default pattern table, in priority order.
///
/// Only labels and tag names are case-insensitive; code groups match
/// uppercase letters and digits only.
///
/// `(?-u:\b)` is an ASCII word boundary so that a code directly followed by
/// CJK text (`778899请`) still ends on a boundary.
const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    (
        "labelled",
        r"(?i:code|验证码|驗證碼)(?:\s*(?i:is|为|為|是))?\s*[:：]?\s*([A-Z0-9]{4,8})(?-u:\b)",
    ),
    (
        "otp",
        r"(?i)otp(?:\s*(?:code|is))?\s*[:：]?\s*([0-9]{4,8})(?-u:\b)",
    ),
    (
        "emphasis",
        r"<(?i:b|strong|span|em|font|h[1-6])(?:\s[^>]*)?>\s*([A-Z0-9]{4,8})\s*</",
    ),
    ("digits", r"(?-u:\b)([0-9]{4,8})(?-u:\b)"),
    ("letters-digits", r"(?-u:\b)([A-Z]{2,4}[0-9]{2,6})(?-u:\b)"),
    ("digits-letters", r"(?-u:\b)([0-9]{2,4}[A-Z]{2,4})(?-u:\b)"),
    ("six-alnum", r"(?-u:\b)([A-Z0-9]{6})(?-u:\b)"),
    (
        "triplet",
        r"(?-u:\b)([0-9]{3}[- ][0-9]{3}|[0-9]{2}[- ][0-9]{2}[- ][0-9]{2})(?-u:\b)",
    ),
];

static DEFAULT_DETECTOR: Lazy<CodeDetector> = Lazy::new(CodeDetector::default);

/// One named candidate pattern. The first capture group is the code.
#[derive(Debug, Clone)]
pub struct CodePattern {
    name: String,
    regex: Regex,
}

impl CodePattern {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Parse(format!("invalid code pattern: {e}")))?;
        if regex.captures_len() < 2 {
            return Err(Error::Parse(format!(
                "code pattern has no capture group: {pattern}"
            )));
        }
        Ok(Self {
            name: name.into(),
            regex,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn capture<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Keyword-gated, ordered-pattern code extractor.
///
/// The keyword, exclusion and pattern tables are plain data so new locales
/// can be added (and tested) without touching the matching logic.
#[derive(Debug, Clone)]
pub struct CodeDetector {
    keywords: Vec<String>,
    exclusions: Vec<String>,
    patterns: Vec<CodePattern>,
}

impl Default for CodeDetector {
    fn default() -> Self {
        Self {
            keywords: VERIFICATION_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            exclusions: EXCLUDED_CODES.iter().map(|w| w.to_string()).collect(),
            patterns: DEFAULT_PATTERNS
                .iter()
                .filter_map(|(name, src)| CodePattern::new(*name, src).ok())
                .collect(),
        }
    }
}

impl CodeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the ordered pattern list.
    pub fn with_patterns(mut self, patterns: Vec<CodePattern>) -> Self {
        self.patterns = patterns;
        self
    }

    /// Add gate keywords (matched against lowercased text).
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords
            .extend(keywords.into_iter().map(|k| k.as_ref().to_lowercase()));
        self
    }

    /// Add excluded tokens (compared case-insensitively).
    pub fn with_exclusions<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclusions
            .extend(words.into_iter().map(|w| w.as_ref().to_lowercase()));
        self
    }

    pub fn patterns(&self) -> &[CodePattern] {
        &self.patterns
    }

    /// Whether the text mentions a verification code at all.
    pub fn is_verification_text(&self, subject: &str, body: &str) -> bool {
        let text = format!("{subject} {body}").to_lowercase();
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }

    /// Extract a verification code from an email's subject and body.
    ///
    /// The body is searched when non-empty, otherwise the subject. Returns
    /// `None` when the keyword gate fails or no pattern yields a valid code.
    pub fn detect(&self, subject: &str, body: &str) -> DetectionResult {
        if !self.is_verification_text(subject, body) {
            return None;
        }

        let haystack = if body.is_empty() { subject } else { body };
        for pattern in &self.patterns {
            let Some(candidate) = pattern.capture(haystack) else {
                continue;
            };
            let code = candidate.trim();
            if self.accepts(code) {
                tracing::trace!(pattern = pattern.name(), code, "verification code matched");
                return Some(code.to_string());
            }
        }
        None
    }

    /// Detect using the email body, falling back to its preview text.
    pub fn detect_in(&self, email: &Email) -> DetectionResult {
        let body = email
            .body
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(email.body_preview.as_str());
        self.detect(&email.subject, body)
    }

    fn accepts(&self, code: &str) -> bool {
        let len = code.chars().count();
        if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&len) {
            return false;
        }
        let lower = code.to_lowercase();
        if self.exclusions.iter().any(|w| *w == lower) {
            return false;
        }
        if is_repeated(code) {
            return false;
        }
        if code.chars().all(char::is_alphabetic) && len < MIN_ALPHA_CODE_LEN {
            return false;
        }
        true
    }
}

fn is_repeated(code: &str) -> bool {
    let mut chars = code.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => false,
    }
}

/// Detect a code with the built-in tables.
pub fn detect_verification_code(subject: &str, body: &str) -> DetectionResult {
    DEFAULT_DETECTOR.detect(subject, body)
}

/// The process-wide detector with the built-in tables.
pub fn default_detector() -> &'static CodeDetector {
    &DEFAULT_DETECTOR
}
