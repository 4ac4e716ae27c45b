//! Crawl orchestration.
//!
//! Single-URL crawls delegate to the render service and refuse error pages;
//! deep crawls run a bounded breadth-first traversal where every per-page
//! failure is recorded and skipped — a failed page never aborts the crawl.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::info;
use url::Url;

use crate::blocklist::Blocklist;
use crate::cleaner;
use crate::errlog::ErrorJournal;
use crate::error::{AppError, AppResult};
use crate::fetcher::{FetchedPage, PageFetcher, PageLinks};
use crate::ingest::{IngestContext, IngestOutcome, IngestRequest};
use crate::store::RetentionPolicy;
use crate::validate;

/// The deep-crawl language gate is deliberately permissive: one hit from this
/// list in the first 2000 characters passes a page as English. Technical
/// documentation often defeats statistical detectors, which is why this list
/// leans on common function words plus doc vocabulary.
const ENGLISH_INDICATORS: &[&str] = &[
    "the ", "and ", "for ", "are ", "not ", "you ", "with ", "from ", "this ",
    "that ", "have ", "was ", "can ", "will ", "about ", "when ", "where ",
    "what ", "which ", "who ", "use ", "example", "code", "function", "class",
    "method", "install", "configure", "documentation", "guide", "tutorial",
    "how to", "getting started", "introduction", "overview",
];

const ENGLISH_SAMPLE_CHARS: usize = 2000;
const MIN_GATE_CONTENT_CHARS: usize = 50;
const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, Serialize)]
pub struct CrawlPreview {
    pub url: String,
    pub title: String,
    pub content_preview: String,
    pub content_length: usize,
    pub status_code: u16,
}

#[derive(Debug, Clone)]
pub struct DeepCrawlRequest {
    pub url: String,
    pub max_depth: u32,
    pub max_pages: usize,
    pub include_external: bool,
    pub retention_policy: RetentionPolicy,
    pub tags: String,
}

impl DeepCrawlRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_depth: 2,
            max_pages: 10,
            include_external: false,
            retention_policy: RetentionPolicy::Permanent,
            tags: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeepCrawlSummary {
    pub starting_url: String,
    pub pages_crawled: usize,
    pub pages_stored: usize,
    pub pages_skipped_language: usize,
    pub pages_failed: usize,
    pub stored_pages: Vec<String>,
    pub skipped_pages: Vec<String>,
    pub failed_pages: Vec<String>,
    pub retention_policy: String,
    pub language_filter: String,
}

pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    ingest: Arc<IngestContext>,
    errors: Arc<ErrorJournal>,
}

impl Crawler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        ingest: Arc<IngestContext>,
        errors: Arc<ErrorJournal>,
    ) -> Self {
        Self { fetcher, ingest, errors }
    }

    /// Fetch one page. Error statuses and empty bodies are fetch errors, not
    /// pages.
    pub async fn crawl_one(&self, url: &str) -> AppResult<FetchedPage> {
        let page = self.fetcher.fetch(url).await?;
        if page.status_code >= 400 {
            return Err(AppError::Fetcher(format!("HTTP {} error", page.status_code)));
        }
        if page.content.is_empty() && page.markdown.is_empty() {
            return Err(AppError::Fetcher("empty page body".into()));
        }
        Ok(page)
    }

    /// Fetch without storing; returns a truncated preview.
    pub async fn crawl_preview(&self, url: &str) -> AppResult<CrawlPreview> {
        let page = self.crawl_one(url).await?;
        let preview: String = page.content.chars().take(PREVIEW_CHARS).collect();
        let content_length = page.content.chars().count();
        Ok(CrawlPreview {
            url: page.url,
            title: page.title,
            content_preview: if content_length > PREVIEW_CHARS {
                format!("{preview}...")
            } else {
                preview
            },
            content_length,
            status_code: page.status_code,
        })
    }

    /// Fetch one page and ingest it. Detected error pages are refused before
    /// they reach storage.
    pub async fn crawl_and_store(
        &self,
        url: &str,
        retention_policy: RetentionPolicy,
        tags: &str,
    ) -> IngestOutcome {
        let page = match self.crawl_one(url).await {
            Ok(page) => page,
            Err(e) => return IngestOutcome::failure(url, e.to_string()),
        };

        let gate_text = if page.markdown.is_empty() { &page.content } else { &page.markdown };
        let check = cleaner::is_error_page(gate_text, &page.title, page.status_code);
        if check.is_error {
            let reason = check.reason.unwrap_or_else(|| "error page".into());
            return IngestOutcome::failure(url, format!("Refusing to store error page: {reason}"));
        }

        self.ingest
            .ingest(IngestRequest {
                url: url.to_string(),
                title: page.title,
                content: page.content,
                markdown: page.markdown,
                retention_policy,
                tags: tags.to_string(),
                metadata: None,
            })
            .await
    }

    /// Bounded breadth-first crawl. Pages failing the English gate are
    /// counted separately and still have their links expanded; fetch and
    /// storage failures are per-page.
    pub async fn deep_crawl_and_store(
        &self,
        blocklist: &Blocklist,
        req: DeepCrawlRequest,
    ) -> AppResult<DeepCrawlSummary> {
        let (max_depth, max_pages) =
            validate::validate_deep_crawl_params(req.max_depth, req.max_pages)?;
        let base_host = Url::parse(&req.url)
            .map_err(|e| AppError::Validation(format!("Invalid starting URL: {e}")))?
            .host_str()
            .unwrap_or_default()
            .to_string();

        info!(
            url = %req.url,
            max_depth,
            max_pages,
            "Starting deep crawl (English only)"
        );

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::from([(req.url.clone(), 0)]);
        let mut stored: Vec<String> = Vec::new();
        let mut skipped_non_english: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if stored.len() >= max_pages {
                break;
            }
            if visited.contains(&current) || depth > max_depth {
                continue;
            }
            visited.insert(current.clone());

            if Url::parse(&current).is_err() {
                failed.push(current);
                continue;
            }
            if blocklist.is_blocked(&current).blocked {
                failed.push(current);
                continue;
            }

            info!(depth, url = %current, "Crawling");

            let page = match self.fetcher.fetch(&current).await {
                Ok(page) => page,
                Err(e) => {
                    self.errors.record("deep_crawl_and_store", &e.to_string(), &current, "");
                    failed.push(current);
                    continue;
                }
            };

            if page.status_code >= 400 {
                info!(url = %current, status = page.status_code, "Skipping error page");
                failed.push(current);
                continue;
            }
            if page.content.is_empty() && page.markdown.is_empty() {
                failed.push(current);
                continue;
            }

            let gate_text = if page.content.is_empty() { &page.markdown } else { &page.content };
            if !is_probably_english(gate_text) {
                skipped_non_english.push(current.clone());
                if depth < max_depth {
                    enqueue_links(
                        &page.links,
                        &visited,
                        &mut queue,
                        depth,
                        &base_host,
                        req.include_external,
                    );
                }
                continue;
            }

            let mut metadata = Map::<String, Value>::new();
            metadata.insert("depth".into(), json!(depth));
            metadata.insert("starting_url".into(), json!(req.url));
            metadata.insert("deep_crawl".into(), json!(true));
            metadata.insert("language".into(), json!("en"));

            let outcome = self
                .ingest
                .ingest(IngestRequest {
                    url: current.clone(),
                    title: page.title.clone(),
                    content: page.content.clone(),
                    markdown: page.markdown.clone(),
                    retention_policy: req.retention_policy,
                    tags: req.tags.clone(),
                    metadata: Some(metadata),
                })
                .await;

            if outcome.success {
                info!(depth, url = %current, "Stored English page");
                stored.push(current.clone());
            } else {
                failed.push(current.clone());
            }

            if depth < max_depth {
                enqueue_links(
                    &page.links,
                    &visited,
                    &mut queue,
                    depth,
                    &base_host,
                    req.include_external,
                );
            }
        }

        let pages_crawled = stored.len() + skipped_non_english.len() + failed.len();
        info!(
            pages_crawled,
            stored = stored.len(),
            skipped = skipped_non_english.len(),
            failed = failed.len(),
            "Deep crawl completed"
        );

        Ok(DeepCrawlSummary {
            starting_url: req.url,
            pages_crawled,
            pages_stored: stored.len(),
            pages_skipped_language: skipped_non_english.len(),
            pages_failed: failed.len(),
            stored_pages: stored,
            skipped_pages: skipped_non_english,
            failed_pages: failed,
            retention_policy: req.retention_policy.as_str().to_string(),
            language_filter: "en".to_string(),
        })
    }
}

/// Keyword-based English gate over the head of the page.
fn is_probably_english(content: &str) -> bool {
    if content.len() < MIN_GATE_CONTENT_CHARS {
        return false;
    }
    let sample: String = content.to_lowercase().chars().take(ENGLISH_SAMPLE_CHARS).collect();
    ENGLISH_INDICATORS.iter().any(|token| sample.contains(token))
}

/// Push a page's links for the next depth. Internal links always; external
/// links only when requested. Host filtering applies unless external links
/// are included; unparseable links are counted when they are popped.
fn enqueue_links(
    links: &PageLinks,
    visited: &HashSet<String>,
    queue: &mut VecDeque<(String, u32)>,
    depth: u32,
    base_host: &str,
    include_external: bool,
) {
    let candidates = links
        .internal
        .iter()
        .chain(include_external.then_some(&links.external).into_iter().flatten());

    for link in candidates {
        let href = link.href.as_str();
        if href.is_empty() || visited.contains(href) {
            continue;
        }
        if !include_external {
            if let Ok(parsed) = Url::parse(href) {
                if parsed.host_str().unwrap_or_default() != base_host {
                    continue;
                }
            }
        }
        queue.push_back((href.to_string(), depth + 1));
    }
}
