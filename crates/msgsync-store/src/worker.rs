//! Dedicated worker thread owning the store connection.
//!
//! All store access is funneled through a single-consumer request queue, so
//! the connection is never touched from two threads. History requests are
//! additionally single-flight: a submission while one is outstanding is
//! rejected immediately, never queued. The in-flight flag is set at
//! submission and cleared only once the corresponding result (success or
//! internal failure) has been produced.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use msgsync_core::Message;

use crate::errors::Result;
use crate::reader::{HistoryQuery, MessageStore};

/// How long the worker blocks on the queue before re-checking the running
/// flag.
const QUEUE_POLL: Duration = Duration::from_secs(1);

/// How long `stop` waits for the worker thread before proceeding anyway.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

enum Request {
    History {
        query: HistoryQuery,
        reply: oneshot::Sender<Vec<Message>>,
    },
    LatestRowid {
        reply: oneshot::Sender<i64>,
    },
    Shutdown,
}

/// Handle to the store access worker.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct StoreWorker {
    tx: mpsc::Sender<Request>,
    running: Arc<AtomicBool>,
    history_in_flight: Arc<AtomicBool>,
    join: Mutex<Option<(JoinHandle<()>, mpsc::Receiver<()>)>>,
}

impl StoreWorker {
    /// Validate connectivity, then spawn the worker thread.
    ///
    /// The probe connection is opened and closed synchronously so the one
    /// unrecoverable condition — the store not being readable at all — is
    /// reported to the caller up front.
    pub fn start(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        let mut probe = MessageStore::new(&db_path);
        probe.connect()?;
        probe.close();

        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let history_in_flight = Arc::new(AtomicBool::new(false));

        let thread_running = Arc::clone(&running);
        let thread_flag = Arc::clone(&history_in_flight);
        let handle = std::thread::spawn(move || {
            run_worker(&db_path, &rx, &thread_running, &thread_flag);
            let _ = done_tx.send(());
        });

        info!("store worker started");
        Ok(Self {
            tx,
            running,
            history_in_flight,
            join: Mutex::new(Some((handle, done_rx))),
        })
    }

    /// Whether the worker thread is accepting requests.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a history request is currently outstanding.
    pub fn is_history_in_flight(&self) -> bool {
        self.history_in_flight.load(Ordering::SeqCst)
    }

    /// Submit a history query.
    ///
    /// Returns the receiver for the result page, or `None` — immediately,
    /// without enqueuing — when another history request is outstanding or
    /// the worker has stopped. Internal query failures deliver an empty
    /// page, never an error.
    pub fn request_history(&self, query: HistoryQuery) -> Option<oneshot::Receiver<Vec<Message>>> {
        if self
            .history_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(?query, "history request already in flight, rejecting");
            return None;
        }

        let (reply, rx) = oneshot::channel();
        if self.tx.send(Request::History { query, reply }).is_err() {
            self.history_in_flight.store(false, Ordering::SeqCst);
            warn!("store worker is gone, dropping history request");
            return None;
        }
        Some(rx)
    }

    /// Ask for the current highest record position.
    ///
    /// Not subject to the history single-flight gate. `None` only when the
    /// worker has stopped.
    pub fn request_latest_rowid(&self) -> Option<oneshot::Receiver<i64>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Request::LatestRowid { reply }).ok()?;
        Some(rx)
    }

    /// Stop the worker: signal shutdown, drain, and join with a bounded
    /// timeout. Safe to call multiple times; proceeds with teardown even if
    /// the thread does not exit in time.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Request::Shutdown);

        if let Some((handle, done_rx)) = self.join.lock().take() {
            match done_rx.recv_timeout(STOP_TIMEOUT) {
                Ok(()) => {
                    let _ = handle.join();
                    info!("store worker stopped");
                }
                Err(_) => {
                    warn!("store worker did not stop in time, detaching");
                }
            }
        }
    }

    #[cfg(test)]
    fn detached_for_tests() -> (Self, mpsc::Receiver<Request>) {
        let (tx, rx) = mpsc::channel();
        let worker = Self {
            tx,
            running: Arc::new(AtomicBool::new(true)),
            history_in_flight: Arc::new(AtomicBool::new(false)),
            join: Mutex::new(None),
        };
        (worker, rx)
    }
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker thread body: owns the only live connection while running.
fn run_worker(
    db_path: &std::path::Path,
    rx: &mpsc::Receiver<Request>,
    running: &AtomicBool,
    history_in_flight: &AtomicBool,
) {
    let mut store = MessageStore::new(db_path);
    if let Err(err) = store.connect() {
        error!(error = %err, "store worker failed to connect");
        running.store(false, Ordering::SeqCst);
        return;
    }
    debug!("store worker connected");

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(QUEUE_POLL) {
            Ok(Request::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Ok(request) => process(&store, request, history_in_flight),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    store.close();
}

fn process(store: &MessageStore, request: Request, history_in_flight: &AtomicBool) {
    match request {
        Request::History { query, reply } => {
            let page = match store.fetch(query) {
                Ok(messages) => messages,
                Err(err) => {
                    error!(error = %err, ?query, "history query failed, delivering empty page");
                    Vec::new()
                }
            };
            // Clear before delivery so the requester can immediately submit
            // a follow-up page.
            history_in_flight.store(false, Ordering::SeqCst);
            let _ = reply.send(page);
        }
        Request::LatestRowid { reply } => {
            let rowid = match store.latest_rowid() {
                Ok(rowid) => rowid,
                Err(err) => {
                    error!(error = %err, "latest rowid query failed");
                    0
                }
            };
            let _ = reply.send(rowid);
        }
        Request::Shutdown => {}
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
