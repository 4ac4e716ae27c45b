//! Content cleaning and quality filtering for crawled pages.
//!
//! Strips navigation and boilerplate lines before storage so that both the
//! stored text and the embeddings are built from article content, flags pages
//! that are mostly chrome, and detects error/rate-limit pages that should
//! never be ingested.

use std::sync::LazyLock;

use regex::Regex;

/// A line containing any of these tokens is treated as navigation chrome.
pub const NAV_KEYWORDS: &[&str] = &[
    "navigation",
    "menu",
    "sidebar",
    "breadcrumb",
    "skip to",
    "table of contents",
    "on this page",
    "quick links",
    "sign in",
    "log in",
    "subscribe",
    "newsletter",
    "follow us",
    "social media",
    "share on",
    "tweet",
    "copyright ©",
    "all rights reserved",
    "© 20",
    "privacy policy",
    "terms of service",
    "cookie policy",
    "back to top",
    "scroll to top",
    "go to top",
];

/// Social-media hosts that only ever appear in footer/share widgets.
const SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "linkedin.com",
    "instagram.com",
    "youtube.com",
    "github.com",
    "discord.",
    "reddit.com",
    "x.com",
    "bsky.app",
    "bluesky",
];

// Lines that are nothing but a bulleted markdown link, e.g. `* [Docs](/docs)`.
static LINK_LIST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s*\-]+\[.*?\]\s*\(.*?\)\s*$").expect("valid regex"));

// Nav entries shaped like `* Learn [` / `- Docs [` that markdown converters
// emit for menu bars.
static NAV_ENTRY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[*\-]\s+(Learn|Reference|API|Community|Blog|Docs?)\s*\[")
        .expect("valid regex")
});

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Cleaning outcome with the quality counters recorded into document metadata.
#[derive(Debug, Clone)]
pub struct CleanReport {
    pub cleaned: String,
    pub original_lines: usize,
    pub cleaned_lines: usize,
    pub reduction_ratio: f64,
    pub navigation_indicators: usize,
    pub quality_warning: Option<String>,
    pub is_clean: bool,
}

/// Strip navigation and boilerplate lines from markdown.
pub fn clean_content(markdown: &str) -> String {
    if markdown.is_empty() {
        return String::new();
    }

    let mut kept: Vec<&str> = Vec::new();
    for line in markdown.split('\n') {
        let lowered = line.to_lowercase();
        let lowered = lowered.trim();
        if lowered.is_empty() {
            continue;
        }
        if NAV_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            continue;
        }
        if SOCIAL_DOMAINS.iter().any(|d| lowered.contains(d)) {
            continue;
        }
        if LINK_LIST_LINE.is_match(line) || NAV_ENTRY_LINE.is_match(line) {
            continue;
        }
        kept.push(line);
    }

    let joined = kept.join("\n");
    BLANK_RUNS.replace_all(&joined, "\n\n").trim().to_string()
}

/// Clean the page (markdown preferred over HTML-derived text) and compute the
/// quality counters. `is_clean` is false when more than 70 % of the lines were
/// stripped or more than 10 navigation indicators were present.
pub fn clean_and_validate(content: &str, markdown: &str, _url: &str) -> CleanReport {
    let text = if markdown.is_empty() { content } else { markdown };

    let cleaned = clean_content(text);

    let original_lines = text.split('\n').count();
    let cleaned_lines = cleaned.split('\n').count();
    let reduction_ratio = if original_lines > 0 {
        (original_lines.saturating_sub(cleaned_lines)) as f64 / original_lines as f64
    } else {
        0.0
    };

    let lowered = text.to_lowercase();
    let navigation_indicators = NAV_KEYWORDS.iter().filter(|kw| lowered.contains(*kw)).count();

    let mostly_navigation = reduction_ratio > 0.7 || navigation_indicators > 10;

    CleanReport {
        cleaned,
        original_lines,
        cleaned_lines,
        reduction_ratio,
        navigation_indicators,
        quality_warning: mostly_navigation
            .then(|| "Content appears to be mostly navigation/boilerplate".to_string()),
        is_clean: !mostly_navigation,
    }
}

/// Chunk-level quality gate applied before embedding: drop chunks dominated by
/// navigation keywords or link markers, and chunks too short to carry meaning.
pub fn is_quality_chunk(chunk: &str) -> bool {
    let lowered = chunk.to_lowercase();

    let nav_count = NAV_KEYWORDS.iter().filter(|kw| lowered.contains(*kw)).count();
    if nav_count >= 3 {
        return false;
    }

    let link_markers = chunk.matches('[').count() + chunk.matches("](").count();
    let word_count = chunk.split_whitespace().count();
    if word_count > 0 && link_markers as f64 / word_count as f64 > 0.3 {
        return false;
    }
    if word_count < 10 {
        return false;
    }
    if chunk.matches('[').count() * 3 > word_count {
        return false;
    }

    true
}

#[derive(Debug, Clone)]
pub struct ErrorPageCheck {
    pub is_error: bool,
    pub reason: Option<String>,
}

impl ErrorPageCheck {
    fn error(reason: impl Into<String>) -> Self {
        Self { is_error: true, reason: Some(reason.into()) }
    }

    fn ok() -> Self {
        Self { is_error: false, reason: None }
    }
}

const TITLE_ERROR_TOKENS: &[&str] = &[
    "404",
    "not found",
    "page not found",
    "error",
    "access denied",
    "forbidden",
    "403",
    "401",
    "unauthorized",
    "unavailable",
    "does not exist",
];

const RATE_LIMIT_TOKENS: &[&str] = &[
    "rate limit",
    "too many requests",
    "please slow down",
    "bot detection",
    "captcha",
    "human verification",
    "access denied",
    "blocked",
    "suspicious activity",
    "verify you are human",
    "security check",
];

const SHORT_ERROR_PHRASES: &[&str] = &[
    "page not found",
    "404",
    "not found",
    "error occurred",
    "something went wrong",
    "page does not exist",
    "reach this site in error",
    "reached this page in error",
];

const LONG_ERROR_PHRASES: &[&str] = &[
    "page not found",
    "404 error",
    "page does not exist",
    "something went wrong",
    "error occurred",
    "cannot find",
    "reach this site in error",
    "reached this page in error",
    "page you are looking for",
    "page has been removed",
];

const REDIRECT_PHRASES: &[&str] =
    &["permanently moved", "page has moved", "redirecting", "this page has been moved to"];

/// Detect error, rate-limited and placeholder pages. Rules short-circuit in
/// order: status code, title tokens, rate-limit tokens near the top, then
/// content-length-scaled phrase checks.
pub fn is_error_page(content: &str, title: &str, status_code: u16) -> ErrorPageCheck {
    if content.trim().len() < 50 {
        return ErrorPageCheck::error("Empty or too short content");
    }

    let content_lower = content.to_lowercase();
    let title_lower = title.to_lowercase();

    if status_code >= 400 {
        return ErrorPageCheck::error(format!("HTTP {status_code} error"));
    }

    if TITLE_ERROR_TOKENS.iter().any(|t| title_lower.contains(t)) {
        return ErrorPageCheck::error(format!("Error in title: {title}"));
    }

    // Rate limiting banners appear near the top of the page.
    let sample: String = content_lower.chars().take(500).collect();
    for token in RATE_LIMIT_TOKENS {
        if sample.contains(token) {
            return ErrorPageCheck::error(format!("Rate limiting/bot detection: '{token}'"));
        }
    }

    let word_count = content.split_whitespace().count();

    if word_count < 100
        && SHORT_ERROR_PHRASES.iter().any(|p| content_lower.contains(p))
    {
        return ErrorPageCheck::error("Error page (short content)");
    }

    let long_hits = LONG_ERROR_PHRASES.iter().filter(|p| content_lower.contains(*p)).count();
    if long_hits >= 2 && word_count < 300 {
        return ErrorPageCheck::error(format!("Multiple error indicators ({long_hits})"));
    }

    if REDIRECT_PHRASES.iter().any(|p| content_lower.contains(p)) && word_count < 200 {
        return ErrorPageCheck::error("Redirect/moved page");
    }

    ErrorPageCheck::ok()
}
