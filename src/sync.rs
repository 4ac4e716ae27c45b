//! Memory → disk synchronisation.
//!
//! The live image runs in RAM; this module keeps the database file on disk
//! eventually consistent with it. Writes are captured in the `_sync_tracker`
//! change journal — by triggers for ordinary tables, by explicit
//! `note_vector_change` calls for the virtual vector index — and two
//! background monitors flush the journal differentially: an idle monitor
//! (1 s tick, fires after 5 s without writes) and a periodic monitor (every
//! 300 s). The journal survives failed flushes, so the next trigger retries
//! with nothing lost.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errlog::ErrorJournal;
use crate::error::{AppError, AppResult};
use crate::store::{ensure_schema, register_vector_extension};

const IDLE_TICK: Duration = Duration::from_secs(1);
const IDLE_THRESHOLD: Duration = Duration::from_secs(5);
const PERIODIC_INTERVAL: Duration = Duration::from_secs(300);

/// Shared between writers and the monitors: when the last write happened, and
/// whether the idle flush already ran since then.
#[derive(Default)]
pub struct WriteClock {
    last_write: Mutex<Option<Instant>>,
    idle_sync_completed: AtomicBool,
}

impl WriteClock {
    /// Called on every write. Re-arms the idle monitor.
    pub fn touch(&self) {
        *self.last_write.lock() = Some(Instant::now());
        self.idle_sync_completed.store(false, Ordering::Release);
    }

    pub fn idle_for(&self) -> Option<Duration> {
        self.last_write.lock().map(|t| t.elapsed())
    }

    fn idle_sync_completed(&self) -> bool {
        self.idle_sync_completed.load(Ordering::Acquire)
    }

    fn mark_idle_sync(&self) {
        self.idle_sync_completed.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncMetrics {
    pub total_syncs: u64,
    pub failed_syncs: u64,
    pub total_records_synced: u64,
    pub last_sync_duration_ms: u64,
    pub last_sync_unix: Option<i64>,
    pub pending_changes: i64,
}

struct TableSync {
    name: &'static str,
    pk: &'static str,
    columns: &'static [&'static str],
}

/// Ordinary tables mirrored by the flush. The vector index is handled
/// separately below.
const SYNCED_TABLES: &[TableSync] = &[
    TableSync {
        name: "crawled_content",
        pk: "id",
        columns: &[
            "id",
            "url",
            "title",
            "content",
            "markdown",
            "content_hash",
            "timestamp",
            "added_by_session",
            "retention_policy",
            "tags",
            "metadata",
        ],
    },
    TableSync { name: "sessions", pk: "session_id", columns: &["session_id", "created_at", "last_active"] },
    TableSync {
        name: "blocked_domains",
        pk: "id",
        columns: &["id", "pattern", "description", "created_at"],
    },
    TableSync {
        name: "content_chunks",
        pk: "rowid",
        columns: &[
            "rowid",
            "content_id",
            "chunk_index",
            "chunk_text",
            "char_start",
            "char_end",
            "word_count",
            "kg_processed",
            "created_at",
        ],
    },
    TableSync {
        name: "kg_processing_queue",
        pk: "id",
        columns: &[
            "id",
            "content_id",
            "status",
            "priority",
            "queued_at",
            "processing_started_at",
            "processed_at",
            "retry_count",
            "error_message",
            "result_summary",
            "skipped_reason",
        ],
    },
];

// The vec0 index cannot be introspected (PRAGMA table_info returns nothing
// for it), so its shape is declared here: journal entries are keyed by
// content_id and a flush replaces that document's whole vector set.
const VECTOR_TABLE: &str = "content_vectors";

#[derive(Debug, Clone)]
struct JournalEntry {
    table: String,
    record_id: Value,
    op: String,
    timestamp: f64,
}

enum SyncOp {
    Replace { table: &'static str, columns: &'static [&'static str], row: Vec<Value> },
    Delete { table: &'static str, pk: &'static str, key: Value },
    ReplaceVectors { content_id: i64, rows: Vec<(i64, Vec<u8>)> },
    DeleteVectors { content_id: i64 },
}

pub struct SyncManager {
    disk_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    clock: Arc<WriteClock>,
    /// Mutually excludes flushes; held for the whole flush, which is
    /// non-cancellable once started.
    flush_lock: tokio::sync::Mutex<()>,
    is_syncing: AtomicBool,
    metrics: RwLock<SyncMetrics>,
    errors: Arc<ErrorJournal>,
}

impl SyncManager {
    /// Load the disk image into a fresh memory image and wire up change
    /// tracking. Creates the disk database (with schema) when missing.
    ///
    /// Returns the memory connection for the store, the shared write clock,
    /// and the manager itself.
    pub fn bootstrap(
        disk_path: &Path,
        errors: Arc<ErrorJournal>,
    ) -> AppResult<(Arc<Mutex<Connection>>, Arc<WriteClock>, Arc<SyncManager>)> {
        register_vector_extension();

        if let Some(parent) = disk_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !disk_path.exists() {
            info!(path = %disk_path.display(), "Disk database not found, creating");
            let disk = Connection::open(disk_path)?;
            ensure_schema(&disk)
                .map_err(|e| AppError::Fatal(format!("disk schema init failed: {e}")))?;
        }

        let disk = Connection::open(disk_path)?;
        let mut memory = Connection::open_in_memory()?;
        {
            let backup = rusqlite::backup::Backup::new(&disk, &mut memory)?;
            backup.run_to_completion(256, Duration::from_millis(5), None)?;
        }
        drop(disk);

        // Adds any tables newer than the disk image; also proves vec0 loaded.
        ensure_schema(&memory)
            .map_err(|e| AppError::Fatal(format!("memory schema init failed: {e}")))?;
        create_sync_tracker(&memory)
            .map_err(|e| AppError::Fatal(format!("sync tracker init failed: {e}")))?;

        info!(path = %disk_path.display(), "Database loaded into memory");

        let conn = Arc::new(Mutex::new(memory));
        let clock = Arc::new(WriteClock::default());
        let manager = Arc::new(SyncManager {
            disk_path: disk_path.to_path_buf(),
            conn: conn.clone(),
            clock: clock.clone(),
            flush_lock: tokio::sync::Mutex::new(()),
            is_syncing: AtomicBool::new(false),
            metrics: RwLock::new(SyncMetrics::default()),
            errors,
        });

        Ok((conn, clock, manager))
    }

    /// Spawn the idle and periodic monitors. Both observe the shutdown signal
    /// only at their sleep boundary; a flush in progress runs to completion.
    pub fn spawn_monitors(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let idle = {
            let mgr = self.clone();
            let mut rx = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_TICK) => {}
                        _ = rx.changed() => break,
                    }
                    if mgr.is_syncing.load(Ordering::Acquire) || mgr.clock.idle_sync_completed() {
                        continue;
                    }
                    let Some(idle) = mgr.clock.idle_for() else { continue };
                    let pending = match mgr.pending_changes() {
                        Ok(p) => p,
                        Err(e) => {
                            mgr.errors.record("idle_sync_monitor", &e.to_string(), "", "");
                            continue;
                        }
                    };
                    mgr.metrics.write().pending_changes = pending;
                    if idle >= IDLE_THRESHOLD && pending > 0 {
                        info!(
                            "Idle for {:.1}s, flushing {pending} pending changes to disk",
                            idle.as_secs_f64()
                        );
                        let _ = mgr.flush().await;
                        // Even a failed attempt arms the latch; the periodic
                        // monitor picks up the retry.
                        mgr.clock.mark_idle_sync();
                    }
                }
            })
        };

        let periodic = {
            let mgr = self.clone();
            let mut rx = shutdown;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(PERIODIC_INTERVAL) => {}
                        _ = rx.changed() => break,
                    }
                    if mgr.is_syncing.load(Ordering::Acquire) {
                        continue;
                    }
                    match mgr.pending_changes() {
                        Ok(pending) if pending > 0 => {
                            info!("Periodic sync, flushing {pending} pending changes to disk");
                            let _ = mgr.flush().await;
                        }
                        Ok(_) => {}
                        Err(e) => mgr.errors.record("periodic_sync_monitor", &e.to_string(), "", ""),
                    }
                }
            })
        };

        vec![idle, periodic]
    }

    /// Differential flush: propagate journalled rows to the disk image inside
    /// one disk transaction, then retire exactly the journal entries that
    /// were applied. On failure the journal is left intact for the next
    /// trigger.
    pub async fn flush(&self) -> AppResult<usize> {
        if self.is_syncing.load(Ordering::Acquire) {
            return Ok(0);
        }
        let _guard = self.flush_lock.lock().await;
        self.is_syncing.store(true, Ordering::Release);
        let start = Instant::now();
        let result = self.run_flush();
        self.is_syncing.store(false, Ordering::Release);

        match result {
            Ok(0) => Ok(0),
            Ok(synced) => {
                let mut m = self.metrics.write();
                m.total_syncs += 1;
                m.total_records_synced += synced as u64;
                m.last_sync_duration_ms = start.elapsed().as_millis() as u64;
                m.last_sync_unix = Some(chrono::Utc::now().timestamp());
                m.pending_changes = 0;
                info!("Synced {synced} changes to disk in {:?}", start.elapsed());
                Ok(synced)
            }
            Err(e) => {
                self.metrics.write().failed_syncs += 1;
                warn!("Sync to disk failed: {e}");
                self.errors.record("differential_sync", &e.to_string(), "", "");
                Err(e)
            }
        }
    }

    fn run_flush(&self) -> AppResult<usize> {
        // Snapshot the journal and the referenced row payloads while holding
        // the memory image. These are the only critical sections a flush
        // imposes on writers.
        let (entries, plan) = {
            let conn = self.conn.lock();
            let entries = read_journal(&conn)?;
            if entries.is_empty() {
                return Ok(0);
            }
            let plan = build_plan(&conn, &entries)?;
            (entries, plan)
        };

        let mut disk = Connection::open(&self.disk_path)?;
        let _mode: String = disk.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        disk.pragma_update(None, "synchronous", "NORMAL")?;

        let tx = disk.transaction()?;
        apply_plan(&tx, &plan)?;
        tx.commit()?;

        // Retire the snapshotted entries only: a key re-journalled while the
        // flush ran keeps its newer entry for the next cycle.
        {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "DELETE FROM _sync_tracker
                 WHERE table_name = ?1 AND record_id = ?2 AND operation = ?3 AND timestamp = ?4",
            )?;
            for e in &entries {
                stmt.execute(params![e.table, e.record_id, e.op, e.timestamp])?;
            }
        }

        Ok(entries.len())
    }

    pub fn pending_changes(&self) -> AppResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM _sync_tracker", [], |r| r.get(0))?)
    }

    pub fn metrics(&self) -> SyncMetrics {
        let mut snapshot = self.metrics.read().clone();
        if let Ok(pending) = self.pending_changes() {
            snapshot.pending_changes = pending;
        }
        snapshot
    }
}

/// Journal table plus capture triggers for every ordinary table. The journal
/// is keyed by `(table, record)` with last-write-wins collapse.
fn create_sync_tracker(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _sync_tracker (
            table_name TEXT NOT NULL,
            record_id INTEGER NOT NULL,
            operation TEXT NOT NULL,
            timestamp REAL NOT NULL,
            PRIMARY KEY (table_name, record_id)
        )",
    )?;

    for table in SYNCED_TABLES {
        let name = table.name;
        let pk = table.pk;
        conn.execute_batch(&format!(
            "CREATE TRIGGER IF NOT EXISTS track_{name}_insert
             AFTER INSERT ON {name}
             BEGIN
                 INSERT OR REPLACE INTO _sync_tracker (table_name, record_id, operation, timestamp)
                 VALUES ('{name}', NEW.{pk}, 'INSERT', strftime('%s', 'now'));
             END;

             CREATE TRIGGER IF NOT EXISTS track_{name}_update
             AFTER UPDATE ON {name}
             BEGIN
                 INSERT OR REPLACE INTO _sync_tracker (table_name, record_id, operation, timestamp)
                 VALUES ('{name}', NEW.{pk}, 'UPDATE', strftime('%s', 'now'));
             END;

             CREATE TRIGGER IF NOT EXISTS track_{name}_delete
             AFTER DELETE ON {name}
             BEGIN
                 INSERT OR REPLACE INTO _sync_tracker (table_name, record_id, operation, timestamp)
                 VALUES ('{name}', OLD.{pk}, 'DELETE', strftime('%s', 'now'));
             END;"
        ))?;
    }

    Ok(())
}

fn read_journal(conn: &Connection) -> AppResult<Vec<JournalEntry>> {
    let mut stmt = conn.prepare(
        "SELECT table_name, record_id, operation, timestamp
         FROM _sync_tracker
         ORDER BY timestamp ASC",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(JournalEntry {
            table: r.get(0)?,
            record_id: r.get(1)?,
            op: r.get(2)?,
            timestamp: r.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Resolve journal entries into concrete disk operations, reading current row
/// payloads from memory. Grouped per table, ordinary tables first.
fn build_plan(conn: &Connection, entries: &[JournalEntry]) -> AppResult<Vec<SyncOp>> {
    let mut plan = Vec::new();

    for table in SYNCED_TABLES {
        for entry in entries.iter().filter(|e| e.table == table.name) {
            if entry.op == "DELETE" {
                plan.push(SyncOp::Delete {
                    table: table.name,
                    pk: table.pk,
                    key: entry.record_id.clone(),
                });
                continue;
            }
            let sql = format!(
                "SELECT {} FROM {} WHERE {} = ?1",
                table.columns.join(", "),
                table.name,
                table.pk
            );
            let row: Option<Vec<Value>> = conn
                .query_row(&sql, params![entry.record_id], |r| {
                    let mut values = Vec::with_capacity(table.columns.len());
                    for i in 0..table.columns.len() {
                        values.push(r.get::<_, Value>(i)?);
                    }
                    Ok(values)
                })
                .optional()?;
            // A row deleted after being journalled has a DELETE entry of its
            // own; nothing to copy here.
            if let Some(row) = row {
                plan.push(SyncOp::Replace { table: table.name, columns: table.columns, row });
            }
        }
    }

    for entry in entries.iter().filter(|e| e.table == VECTOR_TABLE) {
        let content_id = match &entry.record_id {
            Value::Integer(i) => *i,
            other => {
                warn!("Ignoring vector journal entry with non-integer key: {other:?}");
                continue;
            }
        };
        if entry.op == "DELETE" {
            plan.push(SyncOp::DeleteVectors { content_id });
        } else {
            let mut stmt = conn
                .prepare("SELECT rowid, embedding FROM content_vectors WHERE content_id = ?1")?;
            let rows = stmt
                .query_map(params![content_id], |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            plan.push(SyncOp::ReplaceVectors { content_id, rows });
        }
    }

    Ok(plan)
}

fn apply_plan(conn: &Connection, plan: &[SyncOp]) -> rusqlite::Result<()> {
    for op in plan {
        match op {
            SyncOp::Replace { table, columns, row } => {
                let placeholders =
                    (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO {table} ({}) VALUES ({placeholders})",
                        columns.join(", ")
                    ),
                    params_from_iter(row.iter()),
                )?;
            }
            SyncOp::Delete { table, pk, key } => {
                conn.execute(&format!("DELETE FROM {table} WHERE {pk} = ?1"), params![key])?;
            }
            SyncOp::ReplaceVectors { content_id, rows } => {
                conn.execute(
                    "DELETE FROM content_vectors WHERE content_id = ?1",
                    params![content_id],
                )?;
                let mut stmt = conn.prepare(
                    "INSERT INTO content_vectors (rowid, embedding, content_id)
                     VALUES (?1, ?2, ?3)",
                )?;
                for (rowid, bytes) in rows {
                    stmt.execute(params![rowid, bytes, content_id])?;
                }
            }
            SyncOp::DeleteVectors { content_id } => {
                conn.execute(
                    "DELETE FROM content_vectors WHERE content_id = ?1",
                    params![content_id],
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bootstrap_in(dir: &tempfile::TempDir) -> (Arc<Mutex<Connection>>, Arc<WriteClock>, Arc<SyncManager>) {
        let path = dir.path().join("mirror.db");
        SyncManager::bootstrap(&path, Arc::new(ErrorJournal::stderr_only())).unwrap()
    }

    #[test]
    fn bootstrap_creates_disk_image_with_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");
        let _ = SyncManager::bootstrap(&path, Arc::new(ErrorJournal::stderr_only())).unwrap();
        assert!(path.exists());

        let disk = Connection::open(&path).unwrap();
        let tables: i64 = disk
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('crawled_content', 'sessions', 'blocked_domains')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn triggers_capture_inserts_with_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, _clock, _mgr) = bootstrap_in(&dir);

        let guard = conn.lock();
        guard
            .execute(
                "INSERT INTO crawled_content (url, title, content) VALUES ('https://a.test/x', 't', 'c')",
                [],
            )
            .unwrap();
        let id = guard.last_insert_rowid();
        guard
            .execute("UPDATE crawled_content SET title = 't2' WHERE id = ?1", params![id])
            .unwrap();

        let (count, op): (i64, String) = guard
            .query_row(
                "SELECT COUNT(*), MAX(operation) FROM _sync_tracker
                 WHERE table_name = 'crawled_content' AND record_id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(op, "UPDATE");
    }

    #[tokio::test]
    async fn flush_copies_rows_and_clears_journal() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, _clock, mgr) = bootstrap_in(&dir);

        {
            let guard = conn.lock();
            guard
                .execute(
                    "INSERT INTO crawled_content (url, title, content) VALUES ('https://a.test/x', 'T', 'body')",
                    [],
                )
                .unwrap();
        }

        let synced = mgr.flush().await.unwrap();
        assert!(synced >= 1);
        assert_eq!(mgr.pending_changes().unwrap(), 0);

        let disk = Connection::open(dir.path().join("mirror.db")).unwrap();
        let title: String = disk
            .query_row(
                "SELECT title FROM crawled_content WHERE url = 'https://a.test/x'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(title, "T");

        let metrics = mgr.metrics();
        assert_eq!(metrics.total_syncs, 1);
        assert_eq!(metrics.failed_syncs, 0);
    }

    #[tokio::test]
    async fn flush_propagates_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, _clock, mgr) = bootstrap_in(&dir);

        {
            let guard = conn.lock();
            guard
                .execute(
                    "INSERT INTO crawled_content (url, content) VALUES ('https://a.test/x', 'body')",
                    [],
                )
                .unwrap();
        }
        mgr.flush().await.unwrap();

        {
            let guard = conn.lock();
            guard
                .execute("DELETE FROM crawled_content WHERE url = 'https://a.test/x'", [])
                .unwrap();
        }
        mgr.flush().await.unwrap();

        let disk = Connection::open(dir.path().join("mirror.db")).unwrap();
        let count: i64 = disk
            .query_row("SELECT COUNT(*) FROM crawled_content", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn empty_journal_is_a_no_op_flush() {
        let dir = tempfile::tempdir().unwrap();
        let (_conn, _clock, mgr) = bootstrap_in(&dir);
        assert_eq!(mgr.flush().await.unwrap(), 0);
        assert_eq!(mgr.metrics().total_syncs, 0);
    }

    #[test]
    fn write_clock_rearms_on_touch() {
        let clock = WriteClock::default();
        assert!(clock.idle_for().is_none());
        clock.mark_idle_sync();
        assert!(clock.idle_sync_completed());
        clock.touch();
        assert!(!clock.idle_sync_completed());
        assert!(clock.idle_for().unwrap() < Duration::from_secs(1));
    }
}
