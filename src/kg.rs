//! Knowledge-graph queue records.
//!
//! The store does not extract entities itself; it only emits queue rows for a
//! separately deployed graph service and gates them on a health probe. The
//! whole path is best-effort: failures are logged and swallowed so content
//! storage never depends on the graph service being up.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::params;
use tracing::debug;

use crate::errlog::ErrorJournal;
use crate::error::AppResult;
use crate::store::Store;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PRIORITY: i64 = 1;

pub struct KgQueue {
    service_url: Option<String>,
    client: reqwest::Client,
    store: Arc<Store>,
    errors: Arc<ErrorJournal>,
}

impl KgQueue {
    pub fn new(service_url: Option<String>, store: Arc<Store>, errors: Arc<ErrorJournal>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { service_url, client, store, errors }
    }

    pub fn enabled(&self) -> bool {
        self.service_url.is_some()
    }

    /// Queue a freshly stored document for graph processing. Inserts a
    /// `pending` row when the service answers its health probe, a `skipped`
    /// row otherwise. Never propagates errors.
    pub async fn enqueue(&self, content_id: i64, url: &str) {
        let Some(service_url) = &self.service_url else {
            return;
        };

        let healthy = self.probe_health(service_url).await;
        let result = if healthy {
            self.insert_row(content_id, "pending", None)
        } else {
            debug!("KG service unavailable, marking content {content_id} skipped");
            self.insert_row(content_id, "skipped", Some("kg service unavailable"))
        };

        if let Err(e) = result {
            self.errors.record("kg_enqueue", &e.to_string(), url, "");
        }
    }

    async fn probe_health(&self, service_url: &str) -> bool {
        let url = format!("{}/health", service_url.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn insert_row(&self, content_id: i64, status: &str, reason: Option<&str>) -> AppResult<()> {
        self.store.with_retry(|conn| {
            conn.execute(
                "INSERT INTO kg_processing_queue (content_id, status, priority, skipped_reason)
                 VALUES (?1, ?2, ?3, ?4)",
                params![content_id, status, DEFAULT_PRIORITY, reason],
            )?;
            Ok(())
        })?;
        self.store.note_write();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_row_count(store: &Store) -> i64 {
        store
            .with_retry(|c| c.query_row("SELECT COUNT(*) FROM kg_processing_queue", [], |r| r.get(0)))
            .unwrap()
    }

    #[tokio::test]
    async fn disabled_queue_emits_nothing() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let kg = KgQueue::new(None, store.clone(), Arc::new(ErrorJournal::stderr_only()));
        assert!(!kg.enabled());
        kg.enqueue(1, "https://a.test/x").await;
        assert_eq!(queue_row_count(&store), 0);
    }

    #[tokio::test]
    async fn unreachable_service_marks_row_skipped() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        // Nothing listens on port 1; the probe fails fast.
        let kg = KgQueue::new(
            Some("http://127.0.0.1:1".to_string()),
            store.clone(),
            Arc::new(ErrorJournal::stderr_only()),
        );
        kg.enqueue(7, "https://a.test/x").await;

        let (status, reason): (String, Option<String>) = store
            .with_retry(|c| {
                c.query_row(
                    "SELECT status, skipped_reason FROM kg_processing_queue WHERE content_id = 7",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
            })
            .unwrap();
        assert_eq!(status, "skipped");
        assert!(reason.unwrap().contains("unavailable"));
    }
}
