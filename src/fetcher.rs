//! Boundary to the external page-rendering service.
//!
//! The service is called with `POST {base}/crawl {"urls": [url]}` and returns
//! cleaned HTML, raw markdown, page metadata and extracted links. The trait
//! keeps the boundary stubbable for crawl tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Per-request timeout for the render service.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLink {
    #[serde(default)]
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub internal: Vec<PageLink>,
    #[serde(default)]
    pub external: Vec<PageLink>,
}

#[derive(Debug, Default, Deserialize)]
struct MarkdownBlock {
    #[serde(default)]
    raw_markdown: String,
}

#[derive(Debug, Default, Deserialize)]
struct PageMetadata {
    #[serde(default)]
    title: String,
    #[serde(default)]
    status_code: u16,
}

#[derive(Debug, Default, Deserialize)]
struct RenderResult {
    #[serde(default)]
    cleaned_html: String,
    #[serde(default)]
    markdown: MarkdownBlock,
    #[serde(default)]
    metadata: PageMetadata,
    #[serde(default)]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct RenderEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results: Vec<RenderResult>,
}

/// One fetched page, normalised from the render service's wire shape.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub url: String,
    pub title: String,
    /// HTML-derived text.
    pub content: String,
    /// Raw markdown rendering, preferred by the cleaner when present.
    pub markdown: String,
    pub status_code: u16,
    pub links: PageLinks,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> AppResult<FetchedPage>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AppError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> AppResult<FetchedPage> {
        let endpoint = format!("{}/crawl", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .json(&serde_json::json!({ "urls": [url] }))
            .send()
            .await
            .map_err(|e| AppError::Fetcher(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Fetcher(format!(
                "render service returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let envelope: RenderEnvelope = response
            .json()
            .await
            .map_err(|e| AppError::Fetcher(format!("invalid render response: {e}")))?;

        if !envelope.success {
            return Err(AppError::Fetcher("render service reported failure".into()));
        }
        let Some(result) = envelope.results.into_iter().next() else {
            return Err(AppError::Fetcher("render service returned no results".into()));
        };

        Ok(FetchedPage {
            url: url.to_string(),
            title: result.metadata.title,
            content: result.cleaned_html,
            markdown: result.markdown.raw_markdown,
            status_code: result.metadata.status_code,
            links: result.links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_deserialises_with_missing_fields() {
        let body = r#"{
            "success": true,
            "results": [{
                "cleaned_html": "<p>text</p>",
                "markdown": { "raw_markdown": "text" },
                "metadata": { "title": "T", "status_code": 200 },
                "links": { "internal": [{"href": "https://a.test/b"}], "external": [] }
            }]
        }"#;
        let envelope: RenderEnvelope = serde_json::from_str(body).unwrap();
        assert!(envelope.success);
        assert_eq!(envelope.results[0].metadata.status_code, 200);
        assert_eq!(envelope.results[0].links.internal[0].href, "https://a.test/b");

        // Fields the service omits default instead of failing.
        let sparse: RenderEnvelope = serde_json::from_str(r#"{"success": true, "results": [{}]}"#).unwrap();
        assert_eq!(sparse.results[0].metadata.status_code, 0);
    }
}
