//! Vector similarity retrieval.
//!
//! Basic search embeds the query (the query vector is never stored), pulls an
//! over-fetched KNN candidate set, deduplicates by URL and maps distances to
//! similarity scores. Target search runs two passes: the first discovers tag
//! tokens from the top hits, the second re-searches under those tags.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::embedder::TextEncoder;
use crate::error::{AppError, AppResult};
use crate::store::Store;

pub const TARGET_SEARCH_INITIAL_K: usize = 5;
pub const TARGET_SEARCH_EXPANDED_K: usize = 20;

/// KNN over-fetch factor: URL-level dedup collapses chunk hits, so the index
/// is asked for more candidates than the caller wants back.
const CANDIDATE_FACTOR: usize = 5;

/// Result text is truncated to this many characters (with an ellipsis).
const MAX_RESULT_CHARS: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub content: String,
    pub timestamp: String,
    pub tags: String,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSearchReport {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub discovered_tags: Vec<String>,
    pub expansion_used: bool,
    pub initial_results_count: usize,
    pub expanded_results_count: usize,
}

/// Similarity from index distance: `1 - d` in the cosine-like range, falling
/// back to `1 / (1 + d)` for larger metric values.
fn similarity_from_distance(distance: f64) -> f64 {
    if distance <= 1.0 { 1.0 - distance } else { 1.0 / (1.0 + distance) }
}

fn truncate_text(text: &str) -> String {
    if text.chars().count() > MAX_RESULT_CHARS {
        let mut out: String = text.chars().take(MAX_RESULT_CHARS).collect();
        out.push_str("...");
        out
    } else {
        text.to_string()
    }
}

/// Semantic search with optional tag filtering (OR across tag substrings).
/// Returned URLs are unique and similarities are non-increasing.
pub fn search(
    store: &Store,
    encoder: &dyn TextEncoder,
    query: &str,
    limit: usize,
    tags: Option<&[String]>,
) -> AppResult<Vec<SearchResult>> {
    let embeddings = encoder.encode(&[query.to_string()])?;
    let query_vector = embeddings
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Embedding("encoder returned no query embedding".into()))?;

    let rows = store.knn(&query_vector, limit * CANDIDATE_FACTOR, tags)?;

    // Keep the best (smallest) distance per URL.
    let mut best: HashMap<String, (f64, usize)> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        match best.get(&row.url) {
            Some((d, _)) if *d <= row.distance => {}
            _ => {
                best.insert(row.url.clone(), (row.distance, i));
            }
        }
    }

    let mut results: Vec<SearchResult> = best
        .into_values()
        .map(|(distance, i)| {
            let row = &rows[i];
            SearchResult {
                url: row.url.clone(),
                title: row.title.clone(),
                content: truncate_text(&row.text),
                timestamp: row.timestamp.clone(),
                tags: row.tags.clone(),
                similarity_score: similarity_from_distance(distance),
            }
        })
        .collect();

    results.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
    results.truncate(limit);
    Ok(results)
}

/// Two-pass tag-expansion search: discover tag tokens from the initial hits,
/// then re-search under them. Falls back to the initial results verbatim when
/// no tags were discovered.
pub fn target_search(
    store: &Store,
    encoder: &dyn TextEncoder,
    query: &str,
    initial_k: usize,
    expanded_k: usize,
) -> AppResult<TargetSearchReport> {
    let initial = search(store, encoder, query, initial_k, None)?;

    let mut discovered: BTreeSet<String> = BTreeSet::new();
    for result in &initial {
        for tag in result.tags.split(',') {
            let tag = tag.trim();
            if !tag.is_empty() {
                discovered.insert(tag.to_string());
            }
        }
    }

    if discovered.is_empty() {
        let count = initial.len();
        return Ok(TargetSearchReport {
            query: query.to_string(),
            results: initial,
            discovered_tags: Vec::new(),
            expansion_used: false,
            initial_results_count: count,
            expanded_results_count: count,
        });
    }

    let tag_list: Vec<String> = discovered.iter().cloned().collect();
    let expanded = search(store, encoder, query, expanded_k, Some(&tag_list))?;

    // Deduplicate by URL keeping the highest similarity.
    let mut best: HashMap<String, SearchResult> = HashMap::new();
    for result in expanded {
        match best.get(&result.url) {
            Some(existing) if existing.similarity_score >= result.similarity_score => {}
            _ => {
                best.insert(result.url.clone(), result);
            }
        }
    }
    let mut results: Vec<SearchResult> = best.into_values().collect();
    results.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));

    Ok(TargetSearchReport {
        query: query.to_string(),
        initial_results_count: initial.len(),
        expanded_results_count: results.len(),
        results,
        discovered_tags: tag_list,
        expansion_used: true,
    })
}
