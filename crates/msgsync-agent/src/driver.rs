//! The sync driver: change signal → fetch since cursor → push → advance.
//!
//! The driver is the only owner of the sync cursor. It advances the cursor
//! strictly after a batch was handed to the network layer, and persists it
//! before the next read, bounding the re-send window after a crash to the
//! last unacknowledged batch (at-least-once delivery).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use msgsync_client::SyncHandle;
use msgsync_core::WireMessage;
use msgsync_settings::Settings;
use msgsync_store::{HistoryQuery, StoreWorker};

/// Delay before retrying a fetch that lost the single-flight gate to a
/// history scan, or before draining the next page of a large burst.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Where forwarded record batches go.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Hand a batch to the network layer; reports whether it was sent.
    async fn push_records(&self, records: &[WireMessage]) -> bool;
}

#[async_trait]
impl RecordSink for SyncHandle {
    async fn push_records(&self, records: &[WireMessage]) -> bool {
        SyncHandle::push_records(self, records).await
    }
}

/// Outcome of one fetch-and-push attempt.
enum SyncStep {
    /// The signal was fully handled.
    Done,
    /// More work remains (gate was busy, or a full batch suggests another
    /// page is pending).
    Again,
}

/// Drives forward sync from change signals.
pub struct SyncDriver<S: RecordSink> {
    worker: Arc<StoreWorker>,
    sink: S,
    settings: Settings,
    settings_path: PathBuf,
}

impl<S: RecordSink> SyncDriver<S> {
    /// Create a driver owning the cursor stored in `settings`.
    pub fn new(
        worker: Arc<StoreWorker>,
        sink: S,
        settings: Settings,
        settings_path: PathBuf,
    ) -> Self {
        Self {
            worker,
            sink,
            settings,
            settings_path,
        }
    }

    /// Consume change signals until the channel closes.
    ///
    /// Signals arriving while a fetch is pending are absorbed; a busy
    /// single-flight gate re-arms a short retry instead of dropping the
    /// signal.
    pub async fn run(mut self, mut signal_rx: mpsc::Receiver<()>) {
        let mut dirty = false;
        let mut closed = false;

        loop {
            if !dirty {
                if closed {
                    break;
                }
                match signal_rx.recv().await {
                    Some(()) => dirty = true,
                    None => break,
                }
            }

            dirty = matches!(self.sync_once().await, SyncStep::Again);

            if dirty && !closed {
                // Absorb further signals while waiting out the retry delay.
                tokio::select! {
                    signal = signal_rx.recv() => {
                        if signal.is_none() {
                            closed = true;
                        }
                    }
                    () = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
        debug!("sync driver stopped");
    }

    async fn sync_once(&mut self) -> SyncStep {
        let cursor = self.settings.last_message_rowid;
        let query = HistoryQuery::Since {
            rowid: cursor,
            limit: self.settings.batch_limit,
        };
        let Some(result_rx) = self.worker.request_history(query) else {
            debug!("store busy with a history scan, retrying shortly");
            return SyncStep::Again;
        };
        let Ok(messages) = result_rx.await else {
            return SyncStep::Done;
        };
        if messages.is_empty() {
            return SyncStep::Done;
        }

        let batch: Vec<WireMessage> = messages
            .iter()
            .map(|msg| WireMessage::from_message(msg, &self.settings.attachments_dir))
            .collect();
        if !self.sink.push_records(&batch).await {
            // No retry here: the cursor stays put, so the same records are
            // re-derived on the next cycle.
            debug!("push failed, batch will be re-derived from the cursor");
            return SyncStep::Done;
        }

        let max_rowid = messages.iter().map(|msg| msg.rowid).max().unwrap_or(cursor);
        self.settings.last_message_rowid = max_rowid.max(cursor);
        if let Err(err) = self.settings.save_to_path(&self.settings_path) {
            error!(error = %err, "failed to persist sync cursor");
        }
        info!(
            count = messages.len(),
            cursor = self.settings.last_message_rowid,
            "forwarded records"
        );

        // A full batch suggests the burst was larger than one page.
        if messages.len() == self.settings.batch_limit {
            SyncStep::Again
        } else {
            SyncStep::Done
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
