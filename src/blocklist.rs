//! Domain blocklist.
//!
//! Pattern grammar: `*.suffix` matches hosts ending with `.suffix`, `*word*`
//! matches the word anywhere in the lowercased URL or host, anything else is
//! an exact host match. Checks fail open: a URL that cannot be parsed is
//! allowed and the parse failure lands in the error journal.

use std::sync::Arc;

use rusqlite::params;
use serde::Serialize;
use url::Url;

use crate::errlog::ErrorJournal;
use crate::error::{AppError, AppResult};
use crate::store::Store;
use crate::validate;

#[derive(Debug, Clone, Serialize)]
pub struct BlockCheck {
    pub blocked: bool,
    pub pattern: Option<String>,
    pub reason: Option<String>,
}

impl BlockCheck {
    fn allowed() -> Self {
        Self { blocked: false, pattern: None, reason: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedPattern {
    pub pattern: String,
    pub description: String,
    pub created_at: String,
}

pub struct Blocklist {
    store: Arc<Store>,
    /// Removal authorisation secret; removals are refused when unset.
    removal_keyword: Option<String>,
    errors: Arc<ErrorJournal>,
}

impl Blocklist {
    pub fn new(store: Arc<Store>, removal_keyword: Option<String>, errors: Arc<ErrorJournal>) -> Self {
        Self { store, removal_keyword, errors }
    }

    /// First matching pattern wins. Never fails: errors are journalled and
    /// the URL is allowed.
    pub fn is_blocked(&self, url: &str) -> BlockCheck {
        match self.check(url) {
            Ok(check) => check,
            Err(e) => {
                self.errors.record("is_domain_blocked", &e.to_string(), url, "");
                BlockCheck::allowed()
            }
        }
    }

    fn check(&self, url: &str) -> AppResult<BlockCheck> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("unparseable URL: {e}")))?;
        let host = parsed.host_str().unwrap_or("").to_lowercase();
        let full_url = url.to_lowercase();

        let patterns: Vec<(String, Option<String>)> = self.store.with_retry(|conn| {
            let mut stmt =
                conn.prepare("SELECT pattern, description FROM blocked_domains ORDER BY id")?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            rows.collect()
        })?;

        for (pattern, description) in patterns {
            if pattern_matches(&pattern.to_lowercase(), &host, &full_url) {
                let reason = description
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| format!("Matches pattern: {pattern}"));
                return Ok(BlockCheck { blocked: true, pattern: Some(pattern), reason: Some(reason) });
            }
        }

        Ok(BlockCheck::allowed())
    }

    /// Add a pattern. A duplicate is reported as a structured
    /// `AlreadyExists` outcome, not a storage error.
    pub fn add(&self, pattern: &str, description: &str) -> AppResult<()> {
        let pattern = validate::sanitize_pattern(pattern)?;
        let result = self.store.with_retry(|conn| {
            conn.execute(
                "INSERT INTO blocked_domains (pattern, description) VALUES (?1, ?2)",
                params![pattern, description],
            )
        });
        match result {
            Ok(_) => {
                self.store.note_write();
                Ok(())
            }
            Err(AppError::Sqlite(rusqlite::Error::SqliteFailure(f, _)))
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(AppError::AlreadyExists(format!(
                    "Pattern '{pattern}' already exists in blocklist"
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a pattern. Requires the configured authorisation keyword.
    pub fn remove(&self, pattern: &str, keyword: &str) -> AppResult<()> {
        match &self.removal_keyword {
            Some(required) if !required.is_empty() && keyword == required => {}
            _ => return Err(AppError::Unauthorized),
        }

        let removed = self.store.with_retry(|conn| {
            conn.execute("DELETE FROM blocked_domains WHERE pattern = ?1", params![pattern])
        })?;
        if removed == 0 {
            return Err(AppError::NotFound(format!("Pattern '{pattern}' not found in blocklist")));
        }
        self.store.note_write();
        Ok(())
    }

    /// Enumerate patterns, newest first.
    pub fn list(&self) -> AppResult<Vec<BlockedPattern>> {
        self.store.with_retry(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pattern, description, created_at FROM blocked_domains
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(BlockedPattern {
                    pattern: r.get(0)?,
                    description: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    created_at: r.get(2)?,
                })
            })?;
            rows.collect()
        })
    }
}

fn pattern_matches(pattern: &str, host: &str, full_url: &str) -> bool {
    if let Some(rest) = pattern.strip_prefix("*.") {
        // `*.ru` means "host ends with .ru", never the bare suffix host.
        return host.ends_with(&format!(".{rest}"));
    }
    if pattern.len() > 2 && pattern.starts_with('*') && pattern.ends_with('*') {
        let keyword = &pattern[1..pattern.len() - 1];
        return !keyword.is_empty() && (full_url.contains(keyword) || host.contains(keyword));
    }
    pattern == host
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocklist_with_keyword(keyword: Option<&str>) -> Blocklist {
        let store = Arc::new(Store::open_in_memory().unwrap());
        Blocklist::new(store, keyword.map(String::from), Arc::new(ErrorJournal::stderr_only()))
    }

    #[test]
    fn suffix_pattern_matches_subdomains_only() {
        let bl = blocklist_with_keyword(None);
        bl.add("*.ru", "test").unwrap();

        assert!(bl.is_blocked("https://news.ru/a").blocked);
        assert!(bl.is_blocked("https://mirror.news.ru/a").blocked);
        assert!(!bl.is_blocked("https://ru.example.com").blocked);
    }

    #[test]
    fn keyword_pattern_matches_anywhere_in_url() {
        let bl = blocklist_with_keyword(None);
        bl.add("*casino*", "").unwrap();

        assert!(bl.is_blocked("https://best-casino.example.com/").blocked);
        assert!(bl.is_blocked("https://example.com/casino/top").blocked);
        assert!(!bl.is_blocked("https://example.com/cards").blocked);

        let check = bl.is_blocked("https://example.com/casino");
        assert_eq!(check.pattern.as_deref(), Some("*casino*"));
        assert!(check.reason.unwrap().contains("*casino*"));
    }

    #[test]
    fn exact_pattern_matches_host_only() {
        let bl = blocklist_with_keyword(None);
        bl.add("tracker.example.com", "").unwrap();

        assert!(bl.is_blocked("https://tracker.example.com/x").blocked);
        assert!(!bl.is_blocked("https://example.com/tracker.example.com").blocked);
    }

    #[test]
    fn duplicate_add_reports_already_exists() {
        let bl = blocklist_with_keyword(None);
        bl.add("*.test", "").unwrap();
        match bl.add("*.test", "") {
            Err(AppError::AlreadyExists(msg)) => assert!(msg.contains("*.test")),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[test]
    fn removal_requires_keyword() {
        let bl = blocklist_with_keyword(Some("hunter2"));
        bl.add("*.ru", "").unwrap();

        assert!(matches!(bl.remove("*.ru", "wrong"), Err(AppError::Unauthorized)));
        assert!(bl.is_blocked("https://news.ru/a").blocked);

        bl.remove("*.ru", "hunter2").unwrap();
        assert!(!bl.is_blocked("https://news.ru/a").blocked);

        assert!(matches!(bl.remove("*.ru", "hunter2"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn removal_refused_when_no_keyword_configured() {
        let bl = blocklist_with_keyword(None);
        bl.add("*.ru", "").unwrap();
        assert!(matches!(bl.remove("*.ru", ""), Err(AppError::Unauthorized)));
    }

    #[test]
    fn unparseable_url_fails_open() {
        let bl = blocklist_with_keyword(None);
        bl.add("*everything*", "").unwrap();
        assert!(!bl.is_blocked("not a url at all").blocked);
    }
}
