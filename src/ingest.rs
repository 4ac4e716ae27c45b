//! Content ingestion pipeline.
//!
//! clean → language gate → hash → atomic replace (document row, vectors,
//! chunk metadata, change-journal note in one transaction) → best-effort
//! knowledge-graph enqueue. Callers get a uniform outcome envelope; only the
//! language gate produces `skipped`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::chunker::{self, Chunk};
use crate::cleaner;
use crate::embedder::TextEncoder;
use crate::errlog::ErrorJournal;
use crate::error::{AppError, AppResult};
use crate::kg::KgQueue;
use crate::store::{NewDocument, RetentionPolicy, Store};

/// When chunk filtering removes everything, fall back to this many unfiltered
/// chunks so the document still gets vectors.
const FALLBACK_CHUNKS: usize = 3;

/// Language detection samples the head of the cleaned text.
const LANGUAGE_SAMPLE_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub url: String,
    pub title: String,
    pub content: String,
    pub markdown: String,
    pub retention_policy: RetentionPolicy,
    pub tags: String,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub success: bool,
    pub url: String,
    pub content_id: Option<i64>,
    pub skipped: bool,
    pub error: Option<String>,
}

impl IngestOutcome {
    pub fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            url: url.into(),
            content_id: None,
            skipped: false,
            error: Some(error.into()),
        }
    }
}

/// The long-lived ingestion wiring: store, encoder, KG queue, error journal.
pub struct IngestContext {
    pub store: Arc<Store>,
    pub encoder: Arc<dyn TextEncoder>,
    pub kg: Arc<KgQueue>,
    pub errors: Arc<ErrorJournal>,
}

impl IngestContext {
    pub async fn ingest(&self, req: IngestRequest) -> IngestOutcome {
        match self.try_ingest(&req).await {
            Ok(content_id) => IngestOutcome {
                success: true,
                url: req.url,
                content_id: Some(content_id),
                skipped: false,
                error: None,
            },
            Err(e) if e.is_language_skip() => IngestOutcome {
                success: false,
                url: req.url,
                content_id: None,
                skipped: true,
                error: Some(e.to_string()),
            },
            Err(e) => {
                self.errors.record("store_content", &e.to_string(), &req.url, "");
                IngestOutcome::failure(req.url, e.to_string())
            }
        }
    }

    async fn try_ingest(&self, req: &IngestRequest) -> AppResult<i64> {
        let report = cleaner::clean_and_validate(&req.content, &req.markdown, &req.url);
        if let Some(warning) = &report.quality_warning {
            warn!(
                url = %req.url,
                "{warning} (reduced from {} to {} lines)",
                report.original_lines,
                report.cleaned_lines
            );
        }

        let sample: String = report.cleaned.chars().take(LANGUAGE_SAMPLE_CHARS).collect();
        let language = match whatlang::detect(&sample) {
            Some(detection) if detection.lang() == whatlang::Lang::Eng => {
                detection.lang().code().to_string()
            }
            Some(detection) if detection.is_reliable() => {
                return Err(AppError::LanguageSkip(detection.lang().code().to_string()));
            }
            _ => {
                warn!(url = %req.url, "Language detection failed, continuing as English");
                "unknown".to_string()
            }
        };

        let original = if req.markdown.is_empty() { &req.content } else { &req.markdown };
        let mut metadata = req.metadata.clone().unwrap_or_default();
        metadata.insert("original_size_bytes".into(), json!(original.len()));
        metadata.insert("cleaned_size_bytes".into(), json!(report.cleaned.len()));
        metadata.insert("reduction_ratio".into(), json!(report.reduction_ratio));
        metadata.insert("navigation_indicators".into(), json!(report.navigation_indicators));
        metadata.insert("is_clean".into(), json!(report.is_clean));
        if let Some(warning) = &report.quality_warning {
            metadata.insert("quality_warning".into(), json!(warning));
        }
        metadata.insert("language".into(), json!(language));
        metadata.insert("cleaned_at".into(), json!(chrono::Utc::now().to_rfc3339()));
        let metadata_json = serde_json::to_string(&metadata)?;

        let content_hash = sha256_hex(&report.cleaned);

        let chunks = chunker::chunk_words(&report.cleaned);
        let mut kept: Vec<Chunk> =
            chunks.iter().filter(|c| cleaner::is_quality_chunk(&c.text)).cloned().collect();
        if kept.is_empty() && !chunks.is_empty() {
            warn!(url = %req.url, "No quality chunks after filtering, keeping head chunks");
            kept = chunks.iter().take(FALLBACK_CHUNKS).cloned().collect();
        }

        let texts: Vec<String> = kept.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.encoder.encode(&texts)?;

        let doc = NewDocument {
            url: &req.url,
            title: &req.title,
            text: &report.cleaned,
            content_hash: &content_hash,
            retention_policy: req.retention_policy,
            tags: &req.tags,
            metadata_json: &metadata_json,
        };
        let (content_id, prior) = self.store.replace_document_with_vectors(&doc, &kept, &embeddings)?;
        if prior.is_some() {
            info!(url = %req.url, "Replacing existing content");
        }

        self.kg.enqueue(content_id, &req.url).await;

        Ok(content_id)
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
