//! Embedded relational + vector store.
//!
//! One SQLite image holds the live state: the `crawled_content` table, the
//! supporting tables, and a vec0 virtual index of 384-dim float32 embeddings
//! joined on `content_id`. In memory mode the image lives in RAM and the sync
//! manager mirrors it to disk; in disk mode the image is the database file
//! itself. All multi-step mutations run inside a single transaction under one
//! write mutex, and transient "database busy" failures are retried with
//! exponential backoff.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::ffi::sqlite3_auto_extension;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunker::Chunk;
use crate::embedder::{EMBEDDING_DIM, vector_to_bytes};
use crate::error::{AppError, AppResult};
use crate::sync::WriteClock;

/// Transient-busy retry policy: 3 attempts, 100 ms initial backoff, doubling.
const BUSY_RETRIES: u32 = 3;
const BUSY_BACKOFF: Duration = Duration::from_millis(100);

/// Blocklist seeds applied once, when the table is first created empty.
const INITIAL_BLOCKED: &[(&str, &str)] = &[
    ("*.ru", "Block all Russian domains"),
    ("*.cn", "Block all Chinese domains"),
    ("*porn*", "Block URLs containing 'porn'"),
    ("*sex*", "Block URLs containing 'sex'"),
    ("*escort*", "Block URLs containing 'escort'"),
    ("*massage*", "Block URLs containing 'massage'"),
];

static VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension for every connection opened by this
/// process. Must run before the first `Connection::open`.
pub fn register_vector_extension() {
    VEC_INIT.call_once(|| unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

fn verify_vector_extension(conn: &Connection) -> AppResult<()> {
    conn.query_row("SELECT vec_version()", [], |r| r.get::<_, String>(0))
        .map_err(|e| AppError::Fatal(format!("vector extension not loadable: {e}")))?;
    Ok(())
}

/// Governs deletion: session purge removes `session_only` rows, the retention
/// sweep removes `30_days` rows past their window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RetentionPolicy {
    #[default]
    #[serde(rename = "permanent")]
    Permanent,
    #[serde(rename = "session_only")]
    SessionOnly,
    #[serde(rename = "30_days")]
    ThirtyDays,
}

impl RetentionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionPolicy::Permanent => "permanent",
            RetentionPolicy::SessionOnly => "session_only",
            RetentionPolicy::ThirtyDays => "30_days",
        }
    }
}

impl std::str::FromStr for RetentionPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "permanent" => Ok(RetentionPolicy::Permanent),
            "session_only" => Ok(RetentionPolicy::SessionOnly),
            "30_days" => Ok(RetentionPolicy::ThirtyDays),
            other => Err(AppError::Validation(format!(
                "Invalid retention policy '{other}'. Must be one of: permanent, session_only, 30_days"
            ))),
        }
    }
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Create every application table. Idempotent; runs on both images.
pub(crate) fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS crawled_content (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT UNIQUE NOT NULL,
            title TEXT,
            content TEXT,
            markdown TEXT,
            content_hash TEXT,
            timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
            added_by_session TEXT,
            retention_policy TEXT DEFAULT 'permanent',
            tags TEXT,
            metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            last_active DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS blocked_domains (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern TEXT UNIQUE NOT NULL,
            description TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS content_chunks (
            rowid INTEGER PRIMARY KEY,
            content_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            char_start INTEGER NOT NULL,
            char_end INTEGER NOT NULL,
            word_count INTEGER,
            kg_processed BOOLEAN DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (content_id) REFERENCES crawled_content(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS kg_processing_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_id INTEGER NOT NULL,
            status TEXT DEFAULT 'pending',
            priority INTEGER DEFAULT 1,
            queued_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            processing_started_at DATETIME,
            processed_at DATETIME,
            retry_count INTEGER DEFAULT 0,
            error_message TEXT,
            result_summary TEXT,
            skipped_reason TEXT,
            FOREIGN KEY (content_id) REFERENCES crawled_content(id) ON DELETE CASCADE
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS content_vectors USING vec0(
            embedding FLOAT[{EMBEDDING_DIM}],
            content_id INTEGER
        );"
    ))
}

/// Input for a document upsert. The cleaned text is stored in both `content`
/// and `markdown` fields.
#[derive(Debug, Clone)]
pub struct NewDocument<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub text: &'a str,
    pub content_hash: &'a str,
    pub retention_policy: RetentionPolicy,
    pub tags: &'a str,
    pub metadata_json: &'a str,
}

#[derive(Debug, Clone)]
pub struct KnnRow {
    pub url: String,
    pub title: String,
    pub text: String,
    pub timestamp: String,
    pub tags: String,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentSummary {
    pub url: String,
    pub title: String,
    pub timestamp: String,
    pub retention_policy: String,
    pub tags: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentListing {
    pub content: Vec<ContentSummary>,
    pub count: usize,
    pub total_count: i64,
    pub limited: bool,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_pages: i64,
    pub vector_embeddings: i64,
    pub sessions: i64,
    pub retention_breakdown: BTreeMap<String, i64>,
    pub top_tags: Vec<TagCount>,
}

pub struct Store {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<WriteClock>,
    journaled: bool,
    session_id: String,
}

impl Store {
    /// Wrap an already-bootstrapped memory image (sync manager path).
    pub fn from_parts(conn: Arc<Mutex<Connection>>, clock: Arc<WriteClock>, journaled: bool) -> Self {
        Self { conn, clock, journaled, session_id: uuid::Uuid::new_v4().to_string() }
    }

    /// Open the database file directly (disk mode, no sync manager).
    pub fn open_disk(path: &Path) -> AppResult<Self> {
        register_vector_extension();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        verify_vector_extension(&conn)?;
        ensure_schema(&conn).map_err(|e| AppError::Fatal(format!("schema init failed: {e}")))?;
        info!(path = %path.display(), "Opened disk database");
        Ok(Self::from_parts(Arc::new(Mutex::new(conn)), Arc::new(WriteClock::default()), false))
    }

    /// Throwaway in-memory store with no durable mirror. Used by tests and
    /// one-shot tooling.
    pub fn open_in_memory() -> AppResult<Self> {
        register_vector_extension();
        let conn = Connection::open_in_memory()?;
        verify_vector_extension(&conn)?;
        ensure_schema(&conn).map_err(|e| AppError::Fatal(format!("schema init failed: {e}")))?;
        Ok(Self::from_parts(Arc::new(Mutex::new(conn)), Arc::new(WriteClock::default()), false))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn note_write(&self) {
        self.clock.touch();
    }

    /// Seed the blocklist and register this process's session. Runs after the
    /// change journal exists so first-startup rows reach the disk image.
    pub fn finish_init(&self) -> AppResult<()> {
        self.with_retry(|conn| {
            let blocked: i64 =
                conn.query_row("SELECT COUNT(*) FROM blocked_domains", [], |r| r.get(0))?;
            if blocked == 0 {
                let mut stmt = conn.prepare(
                    "INSERT OR IGNORE INTO blocked_domains (pattern, description) VALUES (?1, ?2)",
                )?;
                for (pattern, description) in INITIAL_BLOCKED {
                    stmt.execute(params![pattern, description])?;
                }
            }
            conn.execute(
                "INSERT OR REPLACE INTO sessions (session_id, last_active)
                 VALUES (?1, CURRENT_TIMESTAMP)",
                params![self.session_id],
            )?;
            Ok(())
        })?;
        self.note_write();
        Ok(())
    }

    /// Run a statement against the live image, retrying transient busy
    /// failures with exponential backoff. Non-transient failures surface
    /// immediately. The closure may open its own transaction; a failed
    /// transaction rolls back on drop, so retrying the whole closure is safe.
    pub(crate) fn with_retry<T>(
        &self,
        mut f: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> AppResult<T> {
        let mut delay = BUSY_BACKOFF;
        let mut attempt = 0;
        loop {
            let result = {
                let conn = self.conn.lock();
                f(&conn)
            };
            match result {
                Ok(v) => return Ok(v),
                Err(e) if is_busy(&e) => {
                    attempt += 1;
                    if attempt >= BUSY_RETRIES {
                        return Err(AppError::Busy(e.to_string()));
                    }
                    warn!("database busy (attempt {attempt}), retrying in {delay:?}");
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Documents & vectors
    // ------------------------------------------------------------------

    /// Upsert the document row by URL. Returns `(content_id, prior_id)`;
    /// callers replacing a document must delete the prior vectors themselves
    /// (or use `replace_document_with_vectors` for the atomic form).
    pub fn insert_or_replace_document(&self, doc: &NewDocument) -> AppResult<(i64, Option<i64>)> {
        let out = self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            let result = upsert_document_tx(&tx, doc, &self.session_id)?;
            tx.commit()?;
            Ok(result)
        })?;
        self.note_write();
        Ok(out)
    }

    /// Remove every embedding referencing `content_id`.
    pub fn delete_vectors_for(&self, content_id: i64) -> AppResult<usize> {
        let n = self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            let n = tx.execute(
                "DELETE FROM content_vectors WHERE content_id = ?1",
                params![content_id],
            )?;
            note_vector_change_tx(&tx, self.journaled, content_id, "DELETE")?;
            tx.commit()?;
            Ok(n)
        })?;
        self.note_write();
        Ok(n)
    }

    /// Batch-insert embeddings for a document.
    pub fn insert_vectors(&self, content_id: i64, embeddings: &[Vec<f32>]) -> AppResult<usize> {
        check_dimensions(embeddings)?;
        let n = self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            let n = insert_vectors_tx(&tx, content_id, embeddings)?;
            note_vector_change_tx(&tx, self.journaled, content_id, "INSERT")?;
            tx.commit()?;
            Ok(n)
        })?;
        self.note_write();
        Ok(n)
    }

    /// The ingestion path's atomic replace: upsert the row, drop the prior
    /// document's vectors and chunk records, insert the new embeddings and
    /// chunk metadata, and journal the vector change — one transaction.
    pub fn replace_document_with_vectors(
        &self,
        doc: &NewDocument,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> AppResult<(i64, Option<i64>)> {
        if chunks.len() != embeddings.len() {
            return Err(AppError::Validation(format!(
                "chunk/embedding count mismatch: {} vs {}",
                chunks.len(),
                embeddings.len()
            )));
        }
        check_dimensions(embeddings)?;

        let out = self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;

            let (content_id, prior) = upsert_document_tx(&tx, doc, &self.session_id)?;
            if let Some(old_id) = prior {
                tx.execute(
                    "DELETE FROM content_vectors WHERE content_id = ?1",
                    params![old_id],
                )?;
                tx.execute(
                    "DELETE FROM content_chunks WHERE content_id = ?1",
                    params![old_id],
                )?;
                tx.execute(
                    "DELETE FROM kg_processing_queue WHERE content_id = ?1",
                    params![old_id],
                )?;
                note_vector_change_tx(&tx, self.journaled, old_id, "DELETE")?;
            }

            insert_vectors_tx(&tx, content_id, embeddings)?;
            if !embeddings.is_empty() {
                note_vector_change_tx(&tx, self.journaled, content_id, "INSERT")?;
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO content_chunks
                       (content_id, chunk_index, chunk_text, char_start, char_end, word_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (i, chunk) in chunks.iter().enumerate() {
                    stmt.execute(params![
                        content_id,
                        i as i64,
                        chunk.text,
                        chunk.char_start as i64,
                        chunk.char_end as i64,
                        chunk.word_count as i64,
                    ])?;
                }
            }

            tx.commit()?;
            Ok((content_id, prior))
        })?;
        self.note_write();
        Ok(out)
    }

    /// K-nearest-neighbour query over the vector index, joined to documents.
    /// `tags` applies an OR-of-substring predicate over the tags field.
    pub fn knn(&self, query: &[f32], k: usize, tags: Option<&[String]>) -> AppResult<Vec<KnnRow>> {
        if query.len() != EMBEDDING_DIM {
            return Err(AppError::Validation(format!(
                "query vector has {} dimensions, expected {EMBEDDING_DIM}",
                query.len()
            )));
        }
        let query_bytes = vector_to_bytes(query);

        self.with_retry(|conn| {
            let mut sql = String::from(
                "SELECT cc.url, cc.title, cc.markdown, cc.content, cc.timestamp, cc.tags, distance
                 FROM content_vectors
                 JOIN crawled_content cc ON content_vectors.content_id = cc.id
                 WHERE embedding MATCH ?1 AND k = ?2",
            );
            let mut bindings: Vec<Value> =
                vec![Value::Blob(query_bytes.clone()), Value::Integer(k as i64)];

            if let Some(tags) = tags.filter(|t| !t.is_empty()) {
                let conditions: Vec<String> =
                    (0..tags.len()).map(|i| format!("cc.tags LIKE ?{}", i + 3)).collect();
                sql.push_str(&format!(" AND ({})", conditions.join(" OR ")));
                for tag in tags {
                    bindings.push(Value::Text(format!("%{tag}%")));
                }
            }
            sql.push_str(" ORDER BY distance");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bindings.iter()), |r| {
                let title: Option<String> = r.get(1)?;
                let markdown: Option<String> = r.get(2)?;
                let content: Option<String> = r.get(3)?;
                let tags: Option<String> = r.get(5)?;
                Ok(KnnRow {
                    url: r.get(0)?,
                    title: title.unwrap_or_default(),
                    text: match markdown {
                        Some(m) if !m.is_empty() => m,
                        _ => content.unwrap_or_default(),
                    },
                    timestamp: r.get(4)?,
                    tags: tags.unwrap_or_default(),
                    distance: r.get(6)?,
                })
            })?;
            rows.collect()
        })
    }

    // ------------------------------------------------------------------
    // Listing & stats
    // ------------------------------------------------------------------

    pub fn list_content(
        &self,
        retention: Option<RetentionPolicy>,
        limit: usize,
    ) -> AppResult<ContentListing> {
        let limit = limit.clamp(1, 1000);

        self.with_retry(|conn| {
            let (total_count, rows) = match retention {
                Some(policy) => {
                    let total: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM crawled_content WHERE retention_policy = ?1",
                        params![policy.as_str()],
                        |r| r.get(0),
                    )?;
                    let mut stmt = conn.prepare(
                        "SELECT url, title, timestamp, retention_policy, tags
                         FROM crawled_content
                         WHERE retention_policy = ?1
                         ORDER BY timestamp DESC
                         LIMIT ?2",
                    )?;
                    let rows = stmt
                        .query_map(params![policy.as_str(), limit as i64], content_summary_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    (total, rows)
                }
                None => {
                    let total: i64 =
                        conn.query_row("SELECT COUNT(*) FROM crawled_content", [], |r| r.get(0))?;
                    let mut stmt = conn.prepare(
                        "SELECT url, title, timestamp, retention_policy, tags
                         FROM crawled_content
                         ORDER BY timestamp DESC
                         LIMIT ?1",
                    )?;
                    let rows = stmt
                        .query_map(params![limit as i64], content_summary_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    (total, rows)
                }
            };

            Ok(ContentListing {
                count: rows.len(),
                content: rows,
                total_count,
                limited: total_count > limit as i64,
                limit,
            })
        })
    }

    pub fn stats(&self) -> AppResult<StoreStats> {
        self.with_retry(|conn| {
            let total_pages: i64 =
                conn.query_row("SELECT COUNT(*) FROM crawled_content", [], |r| r.get(0))?;
            let vector_embeddings: i64 =
                conn.query_row("SELECT COUNT(*) FROM content_vectors", [], |r| r.get(0))?;
            let sessions: i64 =
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;

            let mut retention_breakdown = BTreeMap::new();
            let mut stmt = conn.prepare(
                "SELECT retention_policy, COUNT(*) FROM crawled_content GROUP BY retention_policy",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get::<_, Option<String>>(0)?.unwrap_or_default(), r.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (policy, count) = row?;
                retention_breakdown.insert(policy, count);
            }

            let mut stmt = conn.prepare(
                "SELECT tags, COUNT(*) AS count
                 FROM crawled_content
                 WHERE tags IS NOT NULL AND tags != ''
                 GROUP BY tags
                 ORDER BY count DESC
                 LIMIT 5",
            )?;
            let top_tags = stmt
                .query_map([], |r| Ok(TagCount { tag: r.get(0)?, count: r.get(1)? }))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(StoreStats {
                total_pages,
                vector_embeddings,
                sessions,
                retention_breakdown,
                top_tags,
            })
        })
    }

    // ------------------------------------------------------------------
    // Deletion lifecycles
    // ------------------------------------------------------------------

    /// Explicit removal of one URL and everything referencing it.
    pub fn remove_by_url(&self, url: &str) -> AppResult<usize> {
        self.remove_where(
            "SELECT id FROM crawled_content WHERE url = ?1",
            vec![Value::Text(url.to_string())],
        )
    }

    /// Purge this session's `session_only` documents.
    pub fn remove_session_only(&self) -> AppResult<usize> {
        self.remove_where(
            "SELECT id FROM crawled_content
             WHERE added_by_session = ?1 AND retention_policy = 'session_only'",
            vec![Value::Text(self.session_id.clone())],
        )
    }

    /// Retention sweep: drop `30_days` documents older than their window.
    pub fn purge_expired(&self) -> AppResult<usize> {
        self.remove_where(
            "SELECT id FROM crawled_content
             WHERE retention_policy = '30_days' AND timestamp < datetime('now', '-30 days')",
            vec![],
        )
    }

    fn remove_where(&self, id_query: &str, bindings: Vec<Value>) -> AppResult<usize> {
        let removed = self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            let ids: Vec<i64> = {
                let mut stmt = tx.prepare(id_query)?;
                let rows = stmt.query_map(params_from_iter(bindings.iter()), |r| r.get(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            for id in &ids {
                tx.execute("DELETE FROM content_vectors WHERE content_id = ?1", params![id])?;
                tx.execute("DELETE FROM content_chunks WHERE content_id = ?1", params![id])?;
                tx.execute(
                    "DELETE FROM kg_processing_queue WHERE content_id = ?1",
                    params![id],
                )?;
                note_vector_change_tx(&tx, self.journaled, *id, "DELETE")?;
                tx.execute("DELETE FROM crawled_content WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            Ok(ids.len())
        })?;
        if removed > 0 {
            self.note_write();
        }
        Ok(removed)
    }
}

fn content_summary_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ContentSummary> {
    Ok(ContentSummary {
        url: r.get(0)?,
        title: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
        timestamp: r.get(2)?,
        retention_policy: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
        tags: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
    })
}

fn upsert_document_tx(
    conn: &Connection,
    doc: &NewDocument,
    session_id: &str,
) -> rusqlite::Result<(i64, Option<i64>)> {
    let prior: Option<i64> = conn
        .query_row("SELECT id FROM crawled_content WHERE url = ?1", params![doc.url], |r| {
            r.get(0)
        })
        .optional()?;

    conn.execute(
        "INSERT OR REPLACE INTO crawled_content
           (url, title, content, markdown, content_hash,
            added_by_session, retention_policy, tags, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            doc.url,
            doc.title,
            doc.text,
            doc.text,
            doc.content_hash,
            session_id,
            doc.retention_policy.as_str(),
            doc.tags,
            doc.metadata_json,
        ],
    )?;

    Ok((conn.last_insert_rowid(), prior))
}

fn insert_vectors_tx(
    conn: &Connection,
    content_id: i64,
    embeddings: &[Vec<f32>],
) -> rusqlite::Result<usize> {
    let mut stmt =
        conn.prepare("INSERT INTO content_vectors (embedding, content_id) VALUES (?1, ?2)")?;
    for embedding in embeddings {
        stmt.execute(params![vector_to_bytes(embedding), content_id])?;
    }
    Ok(embeddings.len())
}

/// The vector index is virtual and cannot carry triggers, so every vector
/// mutation journals itself here, inside the mutating transaction.
fn note_vector_change_tx(
    conn: &Connection,
    journaled: bool,
    content_id: i64,
    op: &str,
) -> rusqlite::Result<()> {
    if !journaled {
        return Ok(());
    }
    conn.execute(
        "INSERT OR REPLACE INTO _sync_tracker (table_name, record_id, operation, timestamp)
         VALUES ('content_vectors', ?1, ?2, strftime('%s', 'now'))",
        params![content_id, op],
    )?;
    Ok(())
}

fn check_dimensions(embeddings: &[Vec<f32>]) -> AppResult<()> {
    for e in embeddings {
        if e.len() != EMBEDDING_DIM {
            return Err(AppError::Validation(format!(
                "embedding has {} dimensions, expected {EMBEDDING_DIM}",
                e.len()
            )));
        }
    }
    Ok(())
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(
                f.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}
