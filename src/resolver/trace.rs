use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Per-query trace files.
///
/// Each client-originated recursive query gets its own
/// `log-<client id>.txt` in the trace directory, created on first
/// write and appended to as the query progresses.  Stale files from
/// previous runs are removed at startup (`remove_stale_logs`).
///
/// Tracing must never take the server down: write failures are
/// reported on stderr and otherwise ignored.
#[derive(Debug, Clone)]
pub struct QueryTrace {
    /// `None` disables per-query tracing entirely (used by tests).
    dir: Option<PathBuf>,
}

impl QueryTrace {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Append one line, prefixed `[HH:MM:SS.mmm] `, to the query's
    /// trace file.
    pub fn append(&self, client_id: u16, line: &str) {
        let Some(dir) = &self.dir else { return };

        let path = dir.join(format!("log-{client_id}.txt"));
        let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "[{stamp}] {line}"));

        if let Err(error) = result {
            tracing::debug!(?path, ?error, "could not write query trace");
        }
    }
}

/// Delete `log-*.txt` files left over from a previous run.
pub fn remove_stale_logs(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::debug!(?dir, ?error, "could not scan for stale query traces");
            return;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with("log-") && name.ends_with(".txt") {
            if let Err(error) = std::fs::remove_file(entry.path()) {
                tracing::debug!(?name, ?error, "could not remove stale query trace");
            }
        }
    }
}
