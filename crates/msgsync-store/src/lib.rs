//! # msgsync-store
//!
//! Read-only access to the local message store:
//!
//! - [`MessageStore`]: paginated record queries by position (ascending or
//!   descending), attachments joined in per record, text recovered from the
//!   rich-text blob when the plain-text column is empty
//! - [`StoreWorker`]: a dedicated thread owning the only live connection,
//!   serializing all access through a request queue and enforcing the
//!   one-history-scan-at-a-time contract
//!
//! The store is never written to; every connection is opened read-only.

#![deny(unsafe_code)]

mod errors;
mod reader;
mod worker;

pub use errors::{Result, StoreError};
pub use reader::{HistoryQuery, MessageStore};
pub use worker::StoreWorker;
