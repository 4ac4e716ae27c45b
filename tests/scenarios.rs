//! End-to-end scenarios against a full engine: memory image, change journal,
//! background sync monitors, stub fetcher and the deterministic hashing
//! encoder.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use ragstore::config::AppConfig;
use ragstore::crawler::DeepCrawlRequest;
use ragstore::embedder::HashingEncoder;
use ragstore::engine::Engine;
use ragstore::error::{AppError, AppResult};
use ragstore::fetcher::{FetchedPage, PageFetcher, PageLink, PageLinks};
use ragstore::ingest::IngestRequest;
use ragstore::search;
use ragstore::store::RetentionPolicy;

fn test_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        db_path: dir.path().join("store.db"),
        use_memory_db: true,
        crawl4ai_url: "http://127.0.0.1:1".to_string(),
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        local_api_key: Some("test-key".to_string()),
        rate_limit_per_minute: 60,
        blocked_domain_keyword: Some("sesame".to_string()),
        is_server: true,
        kg_service_url: None,
        error_log_path: dir.path().join("errors.log"),
    }
}

/// Fetcher that refuses everything; for tests that never crawl.
struct NoFetcher;

#[async_trait]
impl PageFetcher for NoFetcher {
    async fn fetch(&self, _url: &str) -> AppResult<FetchedPage> {
        Err(AppError::Fetcher("no fetcher in this test".into()))
    }
}

#[derive(Clone)]
struct StubPage {
    status_code: u16,
    content: String,
    links: Vec<String>,
}

/// Scripted fetcher for crawl scenarios.
struct StubFetcher {
    pages: HashMap<String, StubPage>,
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> AppResult<FetchedPage> {
        let page = self
            .pages
            .get(url)
            .ok_or_else(|| AppError::Fetcher(format!("unknown url: {url}")))?;
        Ok(FetchedPage {
            url: url.to_string(),
            title: format!("Page {url}"),
            content: page.content.clone(),
            markdown: page.content.clone(),
            status_code: page.status_code,
            links: PageLinks {
                internal: page.links.iter().map(|h| PageLink { href: h.clone() }).collect(),
                external: Vec::new(),
            },
        })
    }
}

async fn engine_with(dir: &TempDir, fetcher: Arc<dyn PageFetcher>) -> Engine {
    Engine::with_parts(test_config(dir), Arc::new(HashingEncoder), fetcher)
        .await
        .expect("engine boot")
}

fn request(url: &str, text: &str, tags: &str, policy: RetentionPolicy) -> IngestRequest {
    IngestRequest {
        url: url.to_string(),
        title: "X".to_string(),
        content: text.to_string(),
        markdown: text.to_string(),
        retention_policy: policy,
        tags: tags.to_string(),
        metadata: None,
    }
}

// ---------------------------------------------------------------------------
// S1 — ingest and search
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn s1_ingest_then_search_returns_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, Arc::new(NoFetcher)).await;

    let outcome = engine
        .ingest_context()
        .ingest(request(
            "https://a.test/x",
            "the quick brown fox jumps over the lazy dog",
            "docs,test",
            RetentionPolicy::Permanent,
        ))
        .await;
    assert!(outcome.success, "{:?}", outcome.error);

    let results = engine.simple_search("quick fox", 3, None).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].url, "https://a.test/x");
    assert!(results[0].similarity_score > 0.0 && results[0].similarity_score <= 1.0);
    assert_eq!(results[0].tags, "docs,test");

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// S2 — replace on re-ingest
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn s2_reingest_replaces_document_and_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, Arc::new(NoFetcher)).await;

    let first = engine
        .ingest_context()
        .ingest(request(
            "https://a.test/x",
            "The first revision describes the original behaviour of the storage engine in detail.",
            "",
            RetentionPolicy::Permanent,
        ))
        .await;
    assert!(first.success);

    let second = engine
        .ingest_context()
        .ingest(request(
            "https://a.test/x",
            "The system stores every document once and replaces the previous revision whenever \
             the same address is ingested again.",
            "",
            RetentionPolicy::Permanent,
        ))
        .await;
    assert!(second.success);

    let stats = engine.stats().unwrap();
    assert_eq!(stats.store.total_pages, 1);
    // The second body fits one chunk, so exactly one embedding survives.
    assert_eq!(stats.store.vector_embeddings, 1);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// S3 — target search
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn s3_target_search_discovers_tags_and_covers_initial_results() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, Arc::new(NoFetcher)).await;

    let docs = [
        (
            "https://a.test/async",
            "python concurrency with asyncio tasks futures and event loops in production",
            "python,async",
        ),
        (
            "https://a.test/web",
            "python web frameworks for building concurrent api services quickly",
            "python,web",
        ),
        (
            "https://a.test/rust",
            "rust systems programming with fearless concurrency and zero cost abstractions",
            "rust",
        ),
    ];
    for (url, text, tags) in docs {
        let outcome = engine
            .ingest_context()
            .ingest(request(url, text, tags, RetentionPolicy::Permanent))
            .await;
        assert!(outcome.success, "{url}: {:?}", outcome.error);
    }

    let encoder = HashingEncoder;
    let report =
        search::target_search(engine.store(), &encoder, "python concurrency", 2, 10).unwrap();
    assert!(report.expansion_used);
    assert!(report.discovered_tags.iter().any(|t| t == "python"));

    let initial = search::search(engine.store(), &encoder, "python concurrency", 2, None).unwrap();
    let expanded_urls: std::collections::HashSet<_> =
        report.results.iter().map(|r| r.url.clone()).collect();
    for result in &initial {
        assert!(expanded_urls.contains(&result.url), "missing {}", result.url);
    }

    for pair in report.results.windows(2) {
        assert!(pair[0].similarity_score >= pair[1].similarity_score);
    }

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// S4 — blocklist grammar and authorised removal
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn s4_blocklist_seeds_grammar_and_removal() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, Arc::new(NoFetcher)).await;
    let blocklist = engine.blocklist();

    // Seeded on first startup.
    let check = blocklist.is_blocked("https://news.ru/a");
    assert!(check.blocked);
    assert_eq!(check.pattern.as_deref(), Some("*.ru"));
    assert!(!blocklist.is_blocked("https://ru.example.com").blocked);

    assert!(matches!(blocklist.remove("*.ru", "WRONG"), Err(AppError::Unauthorized)));
    assert!(blocklist.is_blocked("https://news.ru/a").blocked);

    blocklist.remove("*.ru", "sesame").unwrap();
    assert!(!blocklist.is_blocked("https://news.ru/a").blocked);

    // Re-adding after removal works; duplicates are structured conflicts.
    blocklist.add("*.ru", "blocked again").unwrap();
    assert!(matches!(blocklist.add("*.ru", ""), Err(AppError::AlreadyExists(_))));

    let listing = blocklist.list().unwrap();
    assert!(listing.iter().any(|p| p.pattern == "*.ru"));

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// S5 — idle flush converges memory and disk, then goes quiet
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn s5_idle_flush_mirrors_memory_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, Arc::new(NoFetcher)).await;

    for i in 0..3 {
        let outcome = engine
            .ingest_context()
            .ingest(request(
                &format!("https://a.test/{i}"),
                "This page documents the configuration options for the service in plain English.",
                "docs",
                RetentionPolicy::Permanent,
            ))
            .await;
        assert!(outcome.success);
    }

    // Idle monitor ticks every second and fires after 5 s without writes.
    tokio::time::sleep(std::time::Duration::from_secs(8)).await;

    let stats = engine.stats().unwrap();
    let sync = stats.sync.clone().unwrap();
    assert!(sync.total_syncs >= 1, "idle flush should have run");
    assert_eq!(sync.pending_changes, 0, "journal should be empty after flush");

    // Row-level convergence on the disk image.
    let disk = rusqlite::Connection::open(dir.path().join("store.db")).unwrap();
    let disk_pages: i64 =
        disk.query_row("SELECT COUNT(*) FROM crawled_content", [], |r| r.get(0)).unwrap();
    let disk_vectors: i64 =
        disk.query_row("SELECT COUNT(*) FROM content_vectors", [], |r| r.get(0)).unwrap();
    assert_eq!(disk_pages, stats.store.total_pages);
    assert_eq!(disk_vectors, stats.store.vector_embeddings);

    let mut stmt = disk.prepare("SELECT url FROM crawled_content ORDER BY url").unwrap();
    let disk_urls: Vec<String> =
        stmt.query_map([], |r| r.get(0)).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(
        disk_urls,
        vec!["https://a.test/0", "https://a.test/1", "https://a.test/2"]
    );

    // No further writes: the idle latch prevents repeat flushes.
    let syncs_after_first = sync.total_syncs;
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    let later = engine.stats().unwrap().sync.unwrap();
    assert_eq!(later.total_syncs, syncs_after_first);
    assert_eq!(later.pending_changes, 0);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// S6 — deep crawl with partial failure
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn s6_deep_crawl_counts_stored_skipped_and_failed() {
    let english = "This guide explains how to configure the crawler service. The documentation \
                   covers installation and provides an overview of the example code in detail.";
    let finnish = "Kaikki järjestelmät toimivat nopeasti sekä turvallisesti ilman katkoksia \
                   verkossa tänään, mutta päivitykset jatkuvat koko viikon ajan.";

    let pages = HashMap::from([
        (
            "https://a.test/a".to_string(),
            StubPage {
                status_code: 200,
                content: english.to_string(),
                links: vec!["https://a.test/b".to_string(), "https://a.test/c".to_string()],
            },
        ),
        (
            "https://a.test/b".to_string(),
            StubPage { status_code: 200, content: finnish.to_string(), links: vec![] },
        ),
        (
            "https://a.test/c".to_string(),
            StubPage { status_code: 500, content: "error".to_string(), links: vec![] },
        ),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, Arc::new(StubFetcher { pages })).await;

    let mut req = DeepCrawlRequest::new("https://a.test/a");
    req.max_depth = 1;
    req.max_pages = 10;
    let summary = engine.deep_crawl_and_store(req).await.unwrap();

    assert_eq!(summary.pages_stored, 1);
    assert_eq!(summary.stored_pages, vec!["https://a.test/a"]);
    assert_eq!(summary.pages_skipped_language, 1);
    assert_eq!(summary.skipped_pages, vec!["https://a.test/b"]);
    assert_eq!(summary.pages_failed, 1);
    assert_eq!(summary.failed_pages, vec!["https://a.test/c"]);
    assert_eq!(summary.pages_crawled, 3);
    assert_eq!(summary.language_filter, "en");

    // The stored page is searchable.
    let results = engine.simple_search("configure the crawler service", 5, None).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].url, "https://a.test/a");

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cross-tier properties
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn explicit_flush_converges_and_deletes_propagate() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, Arc::new(NoFetcher)).await;

    for i in 0..2 {
        let outcome = engine
            .ingest_context()
            .ingest(request(
                &format!("https://a.test/doc{i}"),
                "A short but complete article about database synchronisation strategies and \
                 their tradeoffs in embedded systems.",
                "sync",
                RetentionPolicy::Permanent,
            ))
            .await;
        assert!(outcome.success);
    }
    engine.flush_now().await.unwrap();

    {
        let disk = rusqlite::Connection::open(dir.path().join("store.db")).unwrap();
        let pages: i64 =
            disk.query_row("SELECT COUNT(*) FROM crawled_content", [], |r| r.get(0)).unwrap();
        assert_eq!(pages, 2);
        let orphans: i64 = disk
            .query_row(
                "SELECT COUNT(*) FROM content_vectors
                 WHERE content_id NOT IN (SELECT id FROM crawled_content)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
    }

    // Forget one URL; the delete reaches the disk image on the next flush.
    assert_eq!(engine.forget_url("https://a.test/doc0").unwrap(), 1);
    engine.flush_now().await.unwrap();

    let disk = rusqlite::Connection::open(dir.path().join("store.db")).unwrap();
    let urls: Vec<String> = disk
        .prepare("SELECT url FROM crawled_content")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(urls, vec!["https://a.test/doc1"]);
    let vectors: i64 =
        disk.query_row("SELECT COUNT(*) FROM content_vectors", [], |r| r.get(0)).unwrap();
    let memory_vectors = engine.stats().unwrap().store.vector_embeddings;
    assert_eq!(vectors, memory_vectors);

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn session_purge_removes_only_session_scoped_documents() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, Arc::new(NoFetcher)).await;

    let permanent = request(
        "https://a.test/keep",
        "A permanent reference document that should survive the session purge entirely.",
        "",
        RetentionPolicy::Permanent,
    );
    let temporary = request(
        "https://a.test/tmp",
        "A scratch document that only matters for the duration of this session.",
        "",
        RetentionPolicy::SessionOnly,
    );
    assert!(engine.ingest_context().ingest(permanent).await.success);
    assert!(engine.ingest_context().ingest(temporary).await.success);

    assert_eq!(engine.clear_session_memory().unwrap(), 1);

    let listing = engine.list_memory(None, 10).unwrap();
    assert_eq!(listing.total_count, 1);
    assert_eq!(listing.content[0].url, "https://a.test/keep");

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_reloads_the_disk_image() {
    let dir = tempfile::tempdir().unwrap();

    {
        let engine = engine_with(&dir, Arc::new(NoFetcher)).await;
        let outcome = engine
            .ingest_context()
            .ingest(request(
                "https://a.test/persisted",
                "Documents written before shutdown must be visible after the next startup.",
                "durability",
                RetentionPolicy::Permanent,
            ))
            .await;
        assert!(outcome.success);
        // Shutdown runs the final flush.
        engine.shutdown().await;
    }

    let engine = engine_with(&dir, Arc::new(NoFetcher)).await;
    let results = engine.simple_search("documents visible after startup", 5, None).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].url, "https://a.test/persisted");
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn validation_rejects_bad_requests_at_the_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, Arc::new(NoFetcher)).await;

    let outcome = engine
        .crawl_and_store("http://169.254.169.254/latest", RetentionPolicy::Permanent, "")
        .await;
    assert!(!outcome.success);

    let outcome = engine
        .crawl_and_store("https://blocked.ru/page", RetentionPolicy::Permanent, "")
        .await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("blocked"));

    assert!(engine.simple_search("", 5, None).is_err());
    assert!(engine.simple_search("ok query", 5, Some("bad;tag")).is_err());

    let mut req = DeepCrawlRequest::new("https://a.test/a");
    req.max_depth = 9;
    assert!(engine.deep_crawl_and_store(req).await.is_err());

    engine.shutdown().await;
}
