//! # msgsync-watch
//!
//! Filesystem change detection for the message store.
//!
//! Watches the store's containing directory (non-recursive), filters events
//! to the primary database file and its write-ahead/shared-memory
//! companions, and debounces bursts: a single logical write to the store
//! fans out into several filesystem events across those files in quick
//! succession, and the debounce collapses them into one downstream signal.
//!
//! The watcher never touches the store itself — it only reports "something
//! changed".

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors that can occur when starting the watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The store's containing directory does not exist (store not
    /// initialized, or no permission to see it).
    #[error("store directory missing: {0}")]
    DirectoryMissing(PathBuf),

    /// The platform watch backend refused the subscription.
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// A running store watcher.
///
/// Holds the platform watcher and the debounce task; dropping it stops both.
pub struct StoreWatcher {
    _watcher: RecommendedWatcher,
    debounce_task: tokio::task::JoinHandle<()>,
}

impl StoreWatcher {
    /// Watch the directory containing `db_path` and deliver one unit on
    /// `signal_tx` per debounced burst of store changes.
    ///
    /// Fails when the directory is missing or the watch cannot be
    /// registered; the caller is expected to fall back to periodic polling.
    pub fn start(
        db_path: &Path,
        debounce: Duration,
        signal_tx: mpsc::Sender<()>,
    ) -> Result<Self, WatchError> {
        let dir = db_path
            .parent()
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| WatchError::DirectoryMissing(db_path.to_path_buf()))?;

        let db_name = db_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("chat.db")
            .to_string();

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let filter_name = db_name.clone();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => {
                        if event
                            .paths
                            .iter()
                            .any(|path| is_store_file(path, &filter_name))
                        {
                            let _ = raw_tx.send(());
                        }
                    }
                    Err(err) => warn!(error = %err, "watch backend error"),
                }
            })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching store directory");

        let debounce_task = tokio::spawn(debounce_loop(raw_rx, debounce, signal_tx));

        Ok(Self {
            _watcher: watcher,
            debounce_task,
        })
    }

    /// Stop watching.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for StoreWatcher {
    fn drop(&mut self) {
        self.debounce_task.abort();
        debug!("store watcher stopped");
    }
}

/// Whether `path` names the store's primary file or one of its companions.
fn is_store_file(path: &Path, db_name: &str) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
        name == db_name
            || name == format!("{db_name}-wal")
            || name == format!("{db_name}-shm")
    })
}

/// Collapse raw event bursts into single signals.
///
/// The debounce deadline is an explicit state field: every qualifying event
/// re-arms it, and only when it expires without being re-armed does one unit
/// go out.
async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
    signal_tx: mpsc::Sender<()>,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        match deadline {
            Some(when) => {
                tokio::select! {
                    event = raw_rx.recv() => match event {
                        Some(()) => deadline = Some(Instant::now() + debounce),
                        None => break,
                    },
                    () = tokio::time::sleep_until(when) => {
                        deadline = None;
                        if signal_tx.send(()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            None => match raw_rx.recv().await {
                Some(()) => deadline = Some(Instant::now() + debounce),
                None => break,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_file_filter() {
        assert!(is_store_file(Path::new("/a/chat.db"), "chat.db"));
        assert!(is_store_file(Path::new("/a/chat.db-wal"), "chat.db"));
        assert!(is_store_file(Path::new("/a/chat.db-shm"), "chat.db"));
        assert!(!is_store_file(Path::new("/a/chat.db-journal"), "chat.db"));
        assert!(!is_store_file(Path::new("/a/other.db"), "chat.db"));
        assert!(!is_store_file(Path::new("/a"), "chat.db"));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_one_signal() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (signal_tx, mut signal_rx) = mpsc::channel(8);
        let task = tokio::spawn(debounce_loop(raw_rx, Duration::from_millis(100), signal_tx));

        for _ in 0..5 {
            raw_tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(signal_rx.try_recv(), Ok(()));
        assert!(signal_rx.try_recv().is_err());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_signal_separately() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (signal_tx, mut signal_rx) = mpsc::channel(8);
        let task = tokio::spawn(debounce_loop(raw_rx, Duration::from_millis(100), signal_tx));

        raw_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        raw_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(signal_rx.try_recv(), Ok(()));
        assert_eq!(signal_rx.try_recv(), Ok(()));
        assert!(signal_rx.try_recv().is_err());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn rearmed_deadline_defers_signal() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (signal_tx, mut signal_rx) = mpsc::channel(8);
        let task = tokio::spawn(debounce_loop(raw_rx, Duration::from_millis(100), signal_tx));

        raw_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(signal_rx.try_recv().is_err(), "signaled before quiet interval");
        raw_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(signal_rx.try_recv().is_err(), "re-arm did not defer");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(signal_rx.try_recv(), Ok(()));
        task.abort();
    }

    #[tokio::test]
    async fn start_fails_on_missing_directory() {
        let (signal_tx, _signal_rx) = mpsc::channel(1);
        let result = StoreWatcher::start(
            Path::new("/nonexistent/dir/chat.db"),
            Duration::from_millis(50),
            signal_tx,
        );
        assert!(matches!(result, Err(WatchError::DirectoryMissing(_))));
    }

    #[tokio::test]
    async fn file_writes_produce_a_signal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chat.db");
        std::fs::write(&db_path, b"seed").unwrap();

        let (signal_tx, mut signal_rx) = mpsc::channel(8);
        let watcher =
            StoreWatcher::start(&db_path, Duration::from_millis(50), signal_tx).unwrap();

        // Several quick writes across the primary and companion files.
        std::fs::write(&db_path, b"update").unwrap();
        std::fs::write(dir.path().join("chat.db-wal"), b"wal").unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), signal_rx.recv()).await;
        assert_eq!(signal.unwrap(), Some(()));
        watcher.stop();
    }

    #[tokio::test]
    async fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chat.db");
        std::fs::write(&db_path, b"seed").unwrap();

        let (signal_tx, mut signal_rx) = mpsc::channel(8);
        let watcher =
            StoreWatcher::start(&db_path, Duration::from_millis(50), signal_tx).unwrap();

        std::fs::write(dir.path().join("unrelated.txt"), b"noise").unwrap();
        let signal =
            tokio::time::timeout(Duration::from_millis(400), signal_rx.recv()).await;
        assert!(signal.is_err(), "unrelated file produced a signal");
        watcher.stop();
    }
}
