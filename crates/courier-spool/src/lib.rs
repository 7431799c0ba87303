//! Spool — the durable on-disk fallback used when the backend is
//! unreachable. A filesystem directory with one subfolder per record kind
//! (`msgs`, `statuses`, `events`); each record is a JSON file named
//! `<unix_nanos>.json`, written via write-then-rename so a reader never
//! observes a partial file. On startup and every 30s a walker hands each
//! file to a registered flusher; on success the file is removed, on
//! failure it stays for the next sweep.
//!
//! Structured as a periodic `tokio::time::interval` loop retrying
//! idempotently on failure, the same recovery-task shape used for
//! outbox-style retry sweeps, adapted from database rows to spool files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpoolError>;

/// The three record kinds the spool buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Msgs,
    Statuses,
    Events,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Msgs, RecordKind::Statuses, RecordKind::Events];

    fn subdir(self) -> &'static str {
        match self {
            RecordKind::Msgs => "msgs",
            RecordKind::Statuses => "statuses",
            RecordKind::Events => "events",
        }
    }
}

/// A flusher offers a spooled record's bytes to its eventual destination
/// (the backend). Must be idempotent: the same payload may be re-offered
/// after a crash between a successful write and the file's removal.
#[async_trait]
pub trait Flusher: Send + Sync {
    async fn flush(&self, kind: RecordKind, payload: &[u8]) -> std::result::Result<(), String>;
}

/// Filesystem spool rooted at `dir`, with `msgs/`, `statuses/`, `events/`
/// subfolders created on first use.
#[derive(Clone)]
pub struct Spool {
    root: PathBuf,
    file_mode: u32,
}

impl Spool {
    pub fn new(root: impl Into<PathBuf>, file_mode: u32) -> Self {
        Self { root: root.into(), file_mode }
    }

    async fn ensure_dirs(&self) -> Result<()> {
        for kind in RecordKind::ALL {
            fs::create_dir_all(self.root.join(kind.subdir())).await?;
        }
        Ok(())
    }

    /// Writes `record` as `<unix_nanos>.json` into `kind`'s subfolder via
    /// write-then-rename (mode 0640), so a reader never observes a partial
    /// file.
    pub async fn write<T: Serialize + Sync>(&self, kind: RecordKind, record: &T) -> Result<PathBuf> {
        self.ensure_dirs().await?;
        let bytes = serde_json::to_vec(record)?;
        let dir = self.root.join(kind.subdir());
        let unix_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_nanos();
        let final_path = dir.join(format!("{unix_nanos}.json"));
        let tmp_path = dir.join(format!("{unix_nanos}.json.tmp"));

        fs::write(&tmp_path, &bytes).await?;
        set_mode(&tmp_path, self.file_mode).await?;
        fs::rename(&tmp_path, &final_path).await?;

        debug!(path = %final_path.display(), kind = ?kind, "spooled record to disk");
        Ok(final_path)
    }

    /// Enumerate and flush every regular `.json` file currently spooled for
    /// `kind`, removing each on success and leaving it for the next sweep
    /// on failure.
    pub async fn flush_kind(&self, kind: RecordKind, flusher: &dyn Flusher) -> Result<FlushReport> {
        let dir = self.root.join(kind.subdir());
        if !dir.exists() {
            return Ok(FlushReport::default());
        }

        let mut report = FlushReport::default();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let bytes = match fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read spooled file");
                    report.failed += 1;
                    continue;
                }
            };

            match flusher.flush(kind, &bytes).await {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %e, "flushed but failed to remove spool file");
                    }
                    report.flushed += 1;
                }
                Err(reason) => {
                    debug!(path = %path.display(), reason = %reason, "spool flush failed, retrying next sweep");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// One sweep across all record kinds.
    pub async fn sweep(&self, flushers: &SpoolFlushers) -> FlushReport {
        let mut total = FlushReport::default();
        for kind in RecordKind::ALL {
            let flusher = flushers.for_kind(kind);
            match self.flush_kind(kind, flusher).await {
                Ok(report) => total.merge(report),
                Err(e) => error!(error = %e, kind = ?kind, "spool sweep failed for record kind"),
            }
        }
        total
    }

    /// Spawn the periodic sweep loop (default every 30s), running once
    /// immediately on startup and then on the given interval until
    /// `shutdown` fires.
    pub fn spawn_sweeper(
        self,
        flushers: SpoolFlushers,
        interval: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let report = self.sweep(&flushers).await;
            if report.flushed > 0 || report.failed > 0 {
                info!(flushed = report.flushed, failed = report.failed, "startup spool sweep");
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.sweep(&flushers).await;
                        if report.flushed > 0 || report.failed > 0 {
                            debug!(flushed = report.flushed, failed = report.failed, "spool sweep");
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("spool sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FlushReport {
    pub flushed: u64,
    pub failed: u64,
}

impl FlushReport {
    fn merge(&mut self, other: FlushReport) {
        self.flushed += other.flushed;
        self.failed += other.failed;
    }
}

/// Bundles the three per-kind flushers the spool sweeper dispatches to.
pub struct SpoolFlushers {
    pub msgs: std::sync::Arc<dyn Flusher>,
    pub statuses: std::sync::Arc<dyn Flusher>,
    pub events: std::sync::Arc<dyn Flusher>,
}

impl SpoolFlushers {
    fn for_kind(&self, kind: RecordKind) -> &dyn Flusher {
        match kind {
            RecordKind::Msgs => self.msgs.as_ref(),
            RecordKind::Statuses => self.statuses.as_ref(),
            RecordKind::Events => self.events.as_ref(),
        }
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingFlusher {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl Flusher for CountingFlusher {
        async fn flush(&self, _kind: RecordKind, _payload: &[u8]) -> std::result::Result<(), String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err("simulated failure".into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn write_then_flush_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path(), 0o640);
        spool.write(RecordKind::Msgs, &serde_json::json!({"channel_uuid": "x"})).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let flusher = Arc::new(CountingFlusher { calls: calls.clone(), fail_first: false });
        let report = spool.flush_kind(RecordKind::Msgs, flusher.as_ref()).await.unwrap();

        assert_eq!(report.flushed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut entries = fs::read_dir(dir.path().join("msgs")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_flush_leaves_file_for_next_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path(), 0o640);
        spool.write(RecordKind::Statuses, &serde_json::json!({"status": "Errored"})).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let flusher = Arc::new(CountingFlusher { calls: calls.clone(), fail_first: true });

        let first = spool.flush_kind(RecordKind::Statuses, flusher.as_ref()).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.flushed, 0);

        let second = spool.flush_kind(RecordKind::Statuses, flusher.as_ref()).await.unwrap();
        assert_eq!(second.flushed, 1);
    }

    #[tokio::test]
    async fn no_directory_yields_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path(), 0o640);
        let calls = Arc::new(AtomicUsize::new(0));
        let flusher = Arc::new(CountingFlusher { calls, fail_first: false });
        let report = spool.flush_kind(RecordKind::Events, flusher.as_ref()).await.unwrap();
        assert_eq!(report.flushed, 0);
        assert_eq!(report.failed, 0);
    }
}
