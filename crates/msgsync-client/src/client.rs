//! The sync client proper: connection state machine, outbound pushes,
//! inbound dispatch, and history responses.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use msgsync_core::{Inbound, Message, Outbound, WireAttachment, WireMessage};
use msgsync_store::{HistoryQuery, StoreWorker};

use crate::backoff::Backoff;
use crate::failure_log::FailureLog;

/// Largest attachment that will be inlined on the wire.
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Page size used when `request_history` does not name one.
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// Pause between streamed attachments so a large history page does not
/// saturate the channel.
const ATTACHMENT_STREAM_DELAY: Duration = Duration::from_millis(50);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Local automation surface: executes a remote-initiated "send a message".
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send `text` to `handle_id`; reports success.
    async fn send_message(&self, handle_id: &str, text: &str) -> bool;
}

/// Configuration for the sync client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint of the remote counterpart.
    pub url: String,
    /// Permanent attachments directory for path resolution.
    pub attachments_dir: PathBuf,
    /// Path of the attachment failure audit log.
    pub failure_log: PathBuf,
}

/// An outbound frame awaiting the socket, acknowledged once written.
struct SendCommand {
    frame: String,
    ack: oneshot::Sender<bool>,
}

enum Command {
    Send(SendCommand),
    Disconnect,
}

/// State readable from any thread (the status surface).
struct Shared {
    running: AtomicBool,
    connected: AtomicBool,
    status: parking_lot::RwLock<String>,
}

impl Shared {
    fn set_status(&self, status: &str) {
        *self.status.write() = status.to_string();
    }
}

/// Everything the serve loop and spawned responders need.
struct ClientCtx {
    config: ClientConfig,
    shared: Arc<Shared>,
    worker: Option<Arc<StoreWorker>>,
    sender: Arc<dyn MessageSender>,
    handle: SyncHandle,
}

/// The driving half of the sync client. Consumed by [`SyncClient::run`].
pub struct SyncClient {
    ctx: ClientCtx,
    cmd_rx: mpsc::Receiver<Command>,
    backoff: Backoff,
}

/// Cloneable handle for submitting outbound work and reading channel state.
#[derive(Clone)]
pub struct SyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    attachments_dir: PathBuf,
    failure_log: Arc<FailureLog>,
}

impl SyncClient {
    /// Build a client and its handle.
    ///
    /// `worker` serves inbound history requests; without one they are
    /// ignored. `sender` executes remote-initiated message sends.
    pub fn new(
        config: ClientConfig,
        worker: Option<Arc<StoreWorker>>,
        sender: Arc<dyn MessageSender>,
    ) -> (Self, SyncHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            status: parking_lot::RwLock::new("Disconnected".to_string()),
        });
        let handle = SyncHandle {
            cmd_tx,
            shared: Arc::clone(&shared),
            attachments_dir: config.attachments_dir.clone(),
            failure_log: Arc::new(FailureLog::new(&config.failure_log)),
        };
        let client = Self {
            ctx: ClientCtx {
                config,
                shared,
                worker,
                sender,
                handle: handle.clone(),
            },
            cmd_rx,
            backoff: Backoff::default(),
        };
        (client, handle)
    }

    /// Drive the connection until [`SyncHandle::disconnect`] is called.
    ///
    /// While running: if not connected, attempt to connect; on failure sleep
    /// for the current backoff delay (doubling up to the ceiling) and retry;
    /// on success reset the delay and serve the channel until it closes.
    pub async fn run(mut self) {
        while self.ctx.shared.running.load(Ordering::SeqCst) {
            self.ctx.shared.set_status("Connecting");
            match connect_async(self.ctx.config.url.as_str()).await {
                Ok((ws, _)) => {
                    self.backoff.reset();
                    self.ctx.shared.connected.store(true, Ordering::SeqCst);
                    self.ctx.shared.set_status("Connected");
                    info!(url = %self.ctx.config.url, "connected");

                    serve(&self.ctx, &mut self.cmd_rx, ws).await;

                    self.ctx.shared.connected.store(false, Ordering::SeqCst);
                    self.ctx.shared.set_status("Reconnecting");
                }
                Err(err) => {
                    warn!(error = %err, url = %self.ctx.config.url, "connect failed");
                    self.ctx.shared.connected.store(false, Ordering::SeqCst);
                    let delay = self.backoff.next_delay();
                    self.ctx
                        .shared
                        .set_status(&format!("Reconnecting in {}s", delay.as_secs()));
                    sleep_and_refuse(&mut self.cmd_rx, delay).await;
                }
            }
        }
        self.ctx.shared.set_status("Disconnected");
        debug!("sync client loop ended");
    }
}

/// Serve one live connection until it closes, faults, or is told to
/// disconnect.
async fn serve(ctx: &ClientCtx, cmd_rx: &mut mpsc::Receiver<Command>, ws: WsStream) {
    let (mut sink, mut source): (WsSink, WsSource) = ws.split();

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(Command::Send(send)) => {
                    match sink.send(WsMessage::Text(send.frame.into())).await {
                        Ok(()) => {
                            let _ = send.ack.send(true);
                        }
                        Err(err) => {
                            error!(error = %err, "send failed");
                            let _ = send.ack.send(false);
                            return;
                        }
                    }
                }
                Some(Command::Disconnect) => {
                    let _ = sink.close().await;
                    return;
                }
                None => return,
            },
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if handle_inbound(ctx, &mut sink, text.as_str()).await.is_err() {
                        return;
                    }
                }
                Some(Ok(WsMessage::Close(_))) => {
                    info!("connection closed by remote");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    error!(error = %err, "receive error");
                    return;
                }
                None => return,
            },
        }
    }
}

/// Dispatch one inbound frame. `Err` means the channel faulted while
/// replying and the connection should be torn down.
async fn handle_inbound(ctx: &ClientCtx, sink: &mut WsSink, raw: &str) -> Result<(), ()> {
    let inbound: Inbound = match serde_json::from_str(raw) {
        Ok(inbound) => inbound,
        Err(err) => {
            warn!(error = %err, raw = %raw.chars().take(100).collect::<String>(), "ignoring invalid inbound payload");
            return Ok(());
        }
    };

    match inbound {
        Inbound::SendMessage { handle_id, text } => {
            let sender = Arc::clone(&ctx.sender);
            drop(tokio::spawn(async move {
                if sender.send_message(&handle_id, &text).await {
                    info!(handle_id = %handle_id, "sent message via automation surface");
                } else {
                    warn!(handle_id = %handle_id, "automation surface failed to send message");
                }
            }));
            Ok(())
        }
        Inbound::Ping => {
            let pong = serde_json::to_string(&Outbound::Pong).unwrap_or_default();
            sink.send(WsMessage::Text(pong.into())).await.map_err(|err| {
                error!(error = %err, "failed to send pong");
            })
        }
        Inbound::RequestHistory {
            since_rowid,
            before_rowid,
            limit,
        } => {
            spawn_history_response(ctx, since_rowid, before_rowid, limit);
            Ok(())
        }
        Inbound::Unknown => {
            debug!("ignoring unrecognized inbound message type");
            Ok(())
        }
    }
}

/// Translate an inbound history request into a worker query and spawn the
/// asynchronous response sequence.
fn spawn_history_response(
    ctx: &ClientCtx,
    since_rowid: Option<i64>,
    before_rowid: Option<i64>,
    limit: Option<usize>,
) {
    let Some(worker) = &ctx.worker else {
        warn!("history requested but no store worker is attached");
        return;
    };

    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let query = match (since_rowid, before_rowid) {
        (_, Some(rowid)) => HistoryQuery::Before { rowid, limit },
        (Some(rowid), None) => HistoryQuery::Since { rowid, limit },
        (None, None) => HistoryQuery::Latest { limit },
    };
    info!(?query, "processing history request");

    let Some(result_rx) = worker.request_history(query) else {
        warn!("history request already in progress, ignoring");
        return;
    };

    let handle = ctx.handle.clone();
    drop(tokio::spawn(async move {
        let messages = result_rx.await.unwrap_or_default();
        handle
            .send_history_page(&messages, since_rowid, before_rowid, limit)
            .await;
    }));
}

/// Sleep out a backoff delay, refusing (not queuing) any sends submitted
/// while disconnected.
async fn sleep_and_refuse(cmd_rx: &mut mpsc::Receiver<Command>, delay: Duration) {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => return,
            command = cmd_rx.recv() => match command {
                Some(Command::Send(send)) => {
                    let _ = send.ack.send(false);
                }
                Some(Command::Disconnect) | None => return,
            },
        }
    }
}

impl SyncHandle {
    /// Whether the channel is currently connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Human-readable channel status.
    pub fn status(&self) -> String {
        self.shared.status.read().clone()
    }

    /// Stop the client loop and close the channel.
    pub async fn disconnect(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Disconnect).await;
    }

    /// Push a batch of freshly captured records.
    ///
    /// Returns false when not connected or on a send fault (which flips the
    /// channel to disconnected). No retry here: the cursor owner re-derives
    /// the batch from the persisted cursor on the next cycle.
    pub async fn push_records(&self, records: &[WireMessage]) -> bool {
        if !self.is_connected() {
            return false;
        }
        let sent = self
            .send_frame(&Outbound::NewMessages {
                messages: records.to_vec(),
                timestamp: Utc::now().to_rfc3339(),
            })
            .await;
        if sent {
            debug!(count = records.len(), "pushed records");
        }
        sent
    }

    /// Send one attachment envelope, optionally inlining the file content.
    ///
    /// Content is inlined only when a local path resolves, the file exists,
    /// and its size is within [`MAX_ATTACHMENT_BYTES`]; otherwise the
    /// envelope carries a machine-readable error tag and one line goes to
    /// the failure audit log.
    pub async fn push_attachment(&self, attachment: &WireAttachment, include_data: bool) -> bool {
        let mut data = None;
        let mut error = None;

        if include_data {
            match attachment.local_path.as_deref() {
                None => {
                    warn!(guid = %attachment.guid, "no local path for attachment");
                    error = Some("no_local_path".to_string());
                }
                Some(path) => match tokio::fs::metadata(path).await {
                    Err(_) => {
                        warn!(guid = %attachment.guid, path, "attachment file not found");
                        error = Some("file_not_found".to_string());
                    }
                    Ok(meta) if meta.len() > MAX_ATTACHMENT_BYTES => {
                        warn!(
                            guid = %attachment.guid,
                            size = meta.len(),
                            "attachment exceeds inline size cap"
                        );
                        error = Some("file_too_large".to_string());
                    }
                    Ok(_) => match tokio::fs::read(path).await {
                        Ok(bytes) => {
                            data = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
                        }
                        Err(err) => {
                            error!(guid = %attachment.guid, error = %err, "failed to read attachment");
                            error = Some(format!("read_error: {err}"));
                        }
                    },
                },
            }
            if let Some(tag) = &error {
                self.failure_log.append(tag, attachment);
            }
        }

        self.send_frame(&Outbound::Attachment {
            attachment: attachment.clone(),
            data,
            error,
        })
        .await
    }

    /// Send one history page and stream its attachments.
    ///
    /// The envelope goes out even for an empty page. Attachments are
    /// streamed sequentially with content, pausing between items; the
    /// remainder is abandoned (without failing the response) the moment the
    /// channel is no longer connected.
    pub(crate) async fn send_history_page(
        &self,
        messages: &[Message],
        since_rowid: Option<i64>,
        before_rowid: Option<i64>,
        limit: usize,
    ) {
        if !self.is_connected() {
            warn!("cannot send history response: not connected");
            return;
        }

        let wire: Vec<WireMessage> = messages
            .iter()
            .map(|msg| WireMessage::from_message(msg, &self.attachments_dir))
            .collect();
        let attachments: Vec<WireAttachment> = wire
            .iter()
            .flat_map(|msg| msg.attachments.iter().cloned())
            .collect();
        let count = wire.len();
        // Hitting the cap exactly suggests more may exist; it is a
        // heuristic, not an exact count.
        let has_more = count == limit;

        let sent = self
            .send_frame(&Outbound::HistoryResponse {
                messages: wire,
                has_more,
                since_rowid,
                before_rowid,
            })
            .await;
        if !sent {
            warn!("failed to send history response");
            return;
        }
        info!(count, has_more, "sent history page");

        if count == 0 || attachments.is_empty() {
            return;
        }

        let total = attachments.len();
        let mut sent_count = 0usize;
        let mut failed = 0usize;
        for attachment in &attachments {
            if !self.is_connected() {
                error!(
                    sent = sent_count,
                    remaining = total - sent_count - failed,
                    "connection lost during attachment transfer, stopping"
                );
                return;
            }
            if self.push_attachment(attachment, true).await {
                sent_count += 1;
            } else {
                failed += 1;
                warn!(guid = %attachment.guid, "failed to send attachment");
            }
            tokio::time::sleep(ATTACHMENT_STREAM_DELAY).await;
        }
        info!(sent = sent_count, failed, "attachment transfer complete");
    }

    async fn send_frame(&self, outbound: &Outbound) -> bool {
        if !self.is_connected() {
            return false;
        }
        let frame = match serde_json::to_string(outbound) {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = %err, "failed to serialize outbound frame");
                return false;
            }
        };
        let (ack, ack_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Send(SendCommand { frame, ack }))
            .await
            .is_err()
        {
            return false;
        }
        ack_rx.await.unwrap_or(false)
    }
}
