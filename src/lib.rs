//! ragstore — a retrieval-augmented knowledge store for web content.
//!
//! URLs are fetched through an external render service, cleaned,
//! language-filtered, chunked and embedded with a 384-dimensional sentence
//! model, then persisted in an embedded relational + vector database. The
//! live image runs in memory with a change-journal-driven differential sync
//! to its durable disk mirror. Retrieval is vector KNN with tag predicates,
//! URL-level deduplication and a two-pass tag-expansion search.

pub mod blocklist;
pub mod chunker;
pub mod cleaner;
pub mod config;
pub mod crawler;
pub mod embedder;
pub mod engine;
pub mod errlog;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod kg;
pub mod search;
pub mod store;
pub mod sync;
pub mod validate;

pub use config::AppConfig;
pub use engine::Engine;
pub use error::{AppError, AppResult};
pub use store::RetentionPolicy;
