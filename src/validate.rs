//! Request validation surface.
//!
//! Everything user-supplied is clamped and screened here before it reaches
//! the store or the crawler: URL structure and SSRF targets, injection
//! patterns, content keywords, tag/pattern charsets, and numeric ranges.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{AppError, AppResult};

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_QUERY_LENGTH: usize = 1000;
pub const MAX_TAGS_LENGTH: usize = 500;
pub const MAX_TAG_LENGTH: usize = 100;
pub const MAX_PATTERN_LENGTH: usize = 200;

pub const MIN_CRAWL_DEPTH: u32 = 1;
pub const MAX_CRAWL_DEPTH: u32 = 5;
pub const MIN_CRAWL_PAGES: usize = 1;
pub const MAX_CRAWL_PAGES: usize = 250;

/// Cloud metadata endpoints that must never be fetched.
const METADATA_IPS: &[&str] = &["169.254.169.254", "100.100.100.200", "192.0.0.192"];

const BLOCKED_HOST_SUFFIXES: &[&str] = &[".local", ".internal", ".corp"];

/// Fixed keyword set for refusing adult-content URLs.
const ADULT_KEYWORDS: &[&str] = &[
    "porn", "pron", "xxx", "nsfw", "hentai", "erotic", "fetish", "bdsm", "milf",
    "deepthroat", "incest", "rape", "slut", "cunt", "tits", "boobs", "pussy",
    "cock", "fuck", "spitroast", "nude", "naked",
];

/// Exact substrings (checked against the uppercased URL) that indicate SQL or
/// script injection attempts.
const INJECTION_PATTERNS: &[&str] = &[
    "; DROP",
    "; DELETE",
    "; SELECT",
    "; INSERT",
    "; UPDATE",
    "<SCRIPT",
    "JAVASCRIPT:",
    "UNION SELECT",
    "1=1",
    "1 = 1",
    "'OR'",
    "\"OR\"",
    "' OR '",
    "\" OR \"",
    "-- ",
    "/*",
    "*/",
];

const DANGEROUS_SEQUENCES: &[&str] = &["\0", "\x1a", "\r\n"];

// SQL keywords hiding in query parameters (after ?, & or =).
static SQL_IN_PARAMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[?&=][^&]*\b(UNION|SELECT|INSERT|UPDATE|DELETE|DROP|EXEC)\b")
        .expect("valid regex")
});

static TAG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\s\-_]+$").expect("valid regex"));

static PATTERN_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.*\-_]+$").expect("valid regex"));

/// Full URL screen: scheme, host, SSRF targets, content keywords, injection
/// patterns. Returns the error a user sees in the result envelope.
pub fn validate_url(url: &str) -> AppResult<()> {
    if url.len() > MAX_URL_LENGTH {
        return Err(AppError::Validation(format!(
            "URL exceeds maximum length of {MAX_URL_LENGTH}"
        )));
    }
    for seq in DANGEROUS_SEQUENCES {
        if url.contains(seq) {
            return Err(AppError::Validation("URL contains dangerous characters".into()));
        }
    }

    let parsed =
        Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "URL scheme '{}' not allowed, use http or https",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Validation("URL has no host".into()))?
        .to_lowercase();

    if host == "localhost" {
        return Err(AppError::Validation("URL targets a local address".into()));
    }

    let bare_host = host.trim_matches(|c| c == '[' || c == ']');
    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        let local = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_loopback(),
        };
        if local {
            return Err(AppError::Validation("URL targets a private or local address".into()));
        }
        if METADATA_IPS.contains(&ip.to_string().as_str()) {
            return Err(AppError::Validation("URL targets a metadata endpoint".into()));
        }
    } else if BLOCKED_HOST_SUFFIXES.iter().any(|s| host.ends_with(s)) {
        return Err(AppError::Validation(format!("URL targets a reserved host name: {host}")));
    }

    let lowered = url.to_lowercase();
    for word in ADULT_KEYWORDS {
        if lowered.contains(word) {
            return Err(AppError::Validation(format!(
                "URL contains inappropriate content keyword: {word}"
            )));
        }
    }

    let uppered = url.to_uppercase();
    for pattern in INJECTION_PATTERNS {
        if uppered.contains(pattern) {
            return Err(AppError::Validation(format!(
                "URL contains dangerous pattern: {pattern}"
            )));
        }
    }
    if SQL_IN_PARAMS.is_match(&uppered) {
        return Err(AppError::Validation(
            "URL contains SQL keywords in query parameters".into(),
        ));
    }

    Ok(())
}

/// Validate a comma-separated tags field: overall and per-tag length, and the
/// `[A-Za-z0-9 _-]` charset. Returns the tags unchanged.
pub fn sanitize_tags(tags: &str) -> AppResult<String> {
    if tags.trim().is_empty() {
        return Ok(String::new());
    }
    if tags.len() > MAX_TAGS_LENGTH {
        return Err(AppError::Validation(format!(
            "tags exceed maximum length of {MAX_TAGS_LENGTH}"
        )));
    }
    for tag in tags.split(',') {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if tag.len() > MAX_TAG_LENGTH {
            return Err(AppError::Validation(format!(
                "individual tag exceeds maximum length of {MAX_TAG_LENGTH}"
            )));
        }
        if !TAG_CHARS.is_match(tag) {
            return Err(AppError::Validation(format!(
                "tag contains invalid characters: {tag}. Only alphanumeric, spaces, hyphens, and underscores allowed"
            )));
        }
    }
    Ok(tags.to_string())
}

/// Split a validated tags field into the token list used as a search
/// predicate.
pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Validate a blocklist pattern: letters, digits, dots, hyphens, underscores
/// and asterisks only.
pub fn sanitize_pattern(pattern: &str) -> AppResult<String> {
    if pattern.is_empty() || pattern.len() > MAX_PATTERN_LENGTH {
        return Err(AppError::Validation(format!(
            "pattern must be 1..{MAX_PATTERN_LENGTH} characters"
        )));
    }
    if !PATTERN_CHARS.is_match(pattern) {
        return Err(AppError::Validation(
            "pattern can only contain letters, numbers, dots, hyphens, asterisks, and underscores"
                .into(),
        ));
    }
    Ok(pattern.to_string())
}

pub fn validate_query(query: &str) -> AppResult<()> {
    if query.trim().is_empty() {
        return Err(AppError::Validation("query must not be empty".into()));
    }
    if query.len() > MAX_QUERY_LENGTH {
        return Err(AppError::Validation(format!(
            "query exceeds maximum length of {MAX_QUERY_LENGTH}"
        )));
    }
    Ok(())
}

pub fn validate_deep_crawl_params(max_depth: u32, max_pages: usize) -> AppResult<(u32, usize)> {
    if !(MIN_CRAWL_DEPTH..=MAX_CRAWL_DEPTH).contains(&max_depth) {
        return Err(AppError::Validation(format!(
            "max_depth must be between {MIN_CRAWL_DEPTH} and {MAX_CRAWL_DEPTH}"
        )));
    }
    if !(MIN_CRAWL_PAGES..=MAX_CRAWL_PAGES).contains(&max_pages) {
        return Err(AppError::Validation(format!(
            "max_pages must be between {MIN_CRAWL_PAGES} and {MAX_CRAWL_PAGES}"
        )));
    }
    Ok((max_depth, max_pages))
}

/// Similarity thresholds and score weights live in `[0, 1]`.
pub fn validate_unit_interval(value: f64, field: &str) -> AppResult<f64> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(AppError::Validation(format!("{field} must be between 0 and 1")));
    }
    Ok(value)
}
