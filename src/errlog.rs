//! Append-only structured error journal.
//!
//! Every non-fatal anomaly inside background tasks lands here; records are
//! also mirrored to stderr in short form through `tracing`. The journal is a
//! line-oriented pipe-delimited file:
//! `ISO8601 | calling_function | url_or_empty | message | code_or_empty | stack_trace`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;

pub struct ErrorJournal {
    file: Mutex<Option<File>>,
}

impl ErrorJournal {
    /// Open (creating if needed) the journal file in append mode.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(Some(file)) })
    }

    /// Journal that only mirrors to stderr. Used by tests and tooling that
    /// has no durable log location.
    pub fn stderr_only() -> Self {
        Self { file: Mutex::new(None) }
    }

    /// Append one record. Never fails: a broken log file must not take down
    /// the operation that was being reported.
    pub fn record(&self, calling_function: &str, message: &str, url: &str, code: &str) {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let trace = flatten(&std::backtrace::Backtrace::capture().to_string());
        let line = format!(
            "{timestamp}|{calling_function}|{url}|{}|{code}|{trace}",
            flatten(message)
        );

        if let Some(file) = self.file.lock().as_mut() {
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }

        tracing::error!(target: "ragstore::errors", "{calling_function}: {message}");
    }
}

/// Keep the journal line-oriented: embedded newlines and pipes would break
/// downstream parsers.
fn flatten(s: &str) -> String {
    s.replace(['\n', '\r'], " / ").replace('|', "¦")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_pipe_delimited_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        let journal = ErrorJournal::open(&path).unwrap();

        journal.record("store_content", "boom", "https://a.test/x", "E42");
        journal.record("search_similar", "multi\nline", "", "");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("|store_content|https://a.test/x|boom|E42|"));
        assert!(lines[1].contains("multi / line"));
    }

    #[test]
    fn stderr_only_never_panics() {
        let journal = ErrorJournal::stderr_only();
        journal.record("noop", "nothing to write", "", "");
    }
}
