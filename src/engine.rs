//! Long-lived wiring.
//!
//! `Engine` owns every process-wide value — config, store, encoder, sync
//! manager, fetcher, blocklist, error journal — and is the validated public
//! boundary: requests are screened here before they reach the components.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::blocklist::Blocklist;
use crate::config::AppConfig;
use crate::crawler::{CrawlPreview, Crawler, DeepCrawlRequest, DeepCrawlSummary};
use crate::embedder::{MiniLmEncoder, TextEncoder};
use crate::errlog::ErrorJournal;
use crate::error::{AppError, AppResult};
use crate::fetcher::{HttpFetcher, PageFetcher};
use crate::ingest::{IngestContext, IngestOutcome};
use crate::kg::KgQueue;
use crate::search::{
    self, SearchResult, TARGET_SEARCH_EXPANDED_K, TARGET_SEARCH_INITIAL_K, TargetSearchReport,
};
use crate::store::{ContentListing, RetentionPolicy, Store, StoreStats};
use crate::sync::{SyncManager, SyncMetrics};
use crate::validate;

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub database_path: String,
    pub using_memory_db: bool,
    #[serde(flatten)]
    pub store: StoreStats,
    pub sync: Option<SyncMetrics>,
}

pub struct Engine {
    pub config: AppConfig,
    store: Arc<Store>,
    encoder: Arc<dyn TextEncoder>,
    blocklist: Arc<Blocklist>,
    crawler: Crawler,
    ingest: Arc<IngestContext>,
    errors: Arc<ErrorJournal>,
    sync: Option<Arc<SyncManager>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Production wiring: MiniLM encoder, HTTP fetcher against the configured
    /// render service.
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let encoder: Arc<dyn TextEncoder> = Arc::new(MiniLmEncoder::new());
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.crawl4ai_url)?);
        Self::with_parts(config, encoder, fetcher).await
    }

    /// Wiring with injectable encoder and fetcher (tests, offline tooling).
    pub async fn with_parts(
        config: AppConfig,
        encoder: Arc<dyn TextEncoder>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> AppResult<Self> {
        let errors = Arc::new(ErrorJournal::open(&config.error_log_path)?);

        let (store, sync) = if config.use_memory_db {
            info!("Memory database mode enabled");
            let (conn, clock, manager) = SyncManager::bootstrap(&config.db_path, errors.clone())?;
            (Arc::new(Store::from_parts(conn, clock, true)), Some(manager))
        } else {
            info!("Disk database mode");
            (Arc::new(Store::open_disk(&config.db_path)?), None)
        };
        store.finish_init()?;

        let swept = store.purge_expired()?;
        if swept > 0 {
            info!("Retention sweep removed {swept} expired documents");
        }

        let kg = Arc::new(KgQueue::new(config.kg_service_url.clone(), store.clone(), errors.clone()));
        let ingest = Arc::new(IngestContext {
            store: store.clone(),
            encoder: encoder.clone(),
            kg,
            errors: errors.clone(),
        });
        let blocklist = Arc::new(Blocklist::new(
            store.clone(),
            config.blocked_domain_keyword.clone(),
            errors.clone(),
        ));
        let crawler = Crawler::new(fetcher, ingest.clone(), errors.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = match &sync {
            Some(manager) => manager.spawn_monitors(shutdown_rx),
            None => Vec::new(),
        };

        Ok(Self {
            config,
            store,
            encoder,
            blocklist,
            crawler,
            ingest,
            errors,
            sync,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    pub fn ingest_context(&self) -> &Arc<IngestContext> {
        &self.ingest
    }

    pub fn errors(&self) -> &Arc<ErrorJournal> {
        &self.errors
    }

    // ------------------------------------------------------------------
    // Crawling
    // ------------------------------------------------------------------

    pub async fn crawl_preview(&self, url: &str) -> AppResult<CrawlPreview> {
        validate::validate_url(url)?;
        self.refuse_blocked(url)?;
        self.crawler.crawl_preview(url).await
    }

    pub async fn crawl_and_store(
        &self,
        url: &str,
        retention_policy: RetentionPolicy,
        tags: &str,
    ) -> IngestOutcome {
        if let Err(e) = validate::validate_url(url)
            .and_then(|_| validate::sanitize_tags(tags).map(|_| ()))
            .and_then(|_| self.refuse_blocked(url))
        {
            return IngestOutcome::failure(url, e.to_string());
        }
        self.crawler.crawl_and_store(url, retention_policy, tags).await
    }

    pub async fn deep_crawl_and_store(&self, req: DeepCrawlRequest) -> AppResult<DeepCrawlSummary> {
        validate::validate_url(&req.url)?;
        validate::sanitize_tags(&req.tags)?;
        self.refuse_blocked(&req.url)?;
        self.crawler.deep_crawl_and_store(&self.blocklist, req).await
    }

    fn refuse_blocked(&self, url: &str) -> AppResult<()> {
        let check = self.blocklist.is_blocked(url);
        if check.blocked {
            return Err(AppError::Validation(format!(
                "URL is blocked ({})",
                check.reason.unwrap_or_else(|| "blocklisted".into())
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    pub fn simple_search(
        &self,
        query: &str,
        limit: usize,
        tags: Option<&str>,
    ) -> AppResult<Vec<SearchResult>> {
        validate::validate_query(query)?;
        let limit = limit.clamp(1, 1000);
        let tag_list = match tags {
            Some(raw) => {
                let sanitized = validate::sanitize_tags(raw)?;
                Some(validate::split_tags(&sanitized))
            }
            None => None,
        };
        search::search(&self.store, self.encoder.as_ref(), query, limit, tag_list.as_deref())
    }

    pub fn target_search(&self, query: &str) -> AppResult<TargetSearchReport> {
        validate::validate_query(query)?;
        search::target_search(
            &self.store,
            self.encoder.as_ref(),
            query,
            TARGET_SEARCH_INITIAL_K,
            TARGET_SEARCH_EXPANDED_K,
        )
    }

    // ------------------------------------------------------------------
    // Memory management
    // ------------------------------------------------------------------

    pub fn forget_url(&self, url: &str) -> AppResult<usize> {
        validate::validate_url(url)?;
        self.store.remove_by_url(url)
    }

    pub fn clear_session_memory(&self) -> AppResult<usize> {
        self.store.remove_session_only()
    }

    pub fn list_memory(
        &self,
        retention: Option<RetentionPolicy>,
        limit: usize,
    ) -> AppResult<ContentListing> {
        self.store.list_content(retention, limit)
    }

    pub fn stats(&self) -> AppResult<EngineStats> {
        Ok(EngineStats {
            database_path: self.config.db_path.display().to_string(),
            using_memory_db: self.config.use_memory_db,
            store: self.store.stats()?,
            sync: self.sync.as_ref().map(|s| s.metrics()),
        })
    }

    /// Force a differential flush (no-op in disk mode).
    pub async fn flush_now(&self) -> AppResult<usize> {
        match &self.sync {
            Some(manager) => manager.flush().await,
            None => Ok(0),
        }
    }

    /// Stop the background monitors and run the final flush. Monitors only
    /// observe the signal at their sleep boundary; an in-flight flush
    /// completes first.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        if let Some(manager) = &self.sync {
            if let Err(e) = manager.flush().await {
                warn!("Final flush on shutdown failed: {e}");
            }
        }
        info!("Engine shutdown complete");
    }
}
