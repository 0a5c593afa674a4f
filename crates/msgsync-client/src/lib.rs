//! # msgsync-client
//!
//! The network half of the sync agent: a WebSocket client that owns the
//! channel to the remote counterpart.
//!
//! - Connect/reconnect state machine with exponential [`Backoff`]
//! - Outbound record batches and attachment envelopes (size-capped, with an
//!   append-only [`FailureLog`] for attachments that could not be moved)
//! - Inbound command dispatch: `send_message`, `ping`, `request_history`
//! - Paginated history responses with sequential attachment streaming
//!
//! The socket is owned by a single driving task; [`SyncHandle`] submits
//! outbound work over a command channel, so no lock is ever held across a
//! network call.

#![deny(unsafe_code)]

mod backoff;
mod client;
mod failure_log;

pub use backoff::Backoff;
pub use client::{
    ClientConfig, DEFAULT_HISTORY_LIMIT, MAX_ATTACHMENT_BYTES, MessageSender, SyncClient,
    SyncHandle,
};
pub use failure_log::FailureLog;
