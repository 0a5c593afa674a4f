//! # msgsync-core
//!
//! Shared types and pure codecs for the message sync agent:
//!
//! - **Model types**: [`Message`] and [`Attachment`] as read from the local
//!   store, including derived (never stored) attachment path resolution
//! - **Timestamp codec**: the store's nanosecond ticks → calendar time
//! - **Rich-text extractor**: best-effort plain text from the serialized
//!   rich-text blob some records carry instead of a plain-text column
//! - **Wire protocol**: JSON envelopes exchanged with the remote endpoint

#![deny(unsafe_code)]

pub mod richtext;
pub mod timestamp;
pub mod types;
pub mod wire;

pub use types::{Attachment, Message};
pub use wire::{Inbound, Outbound, WireAttachment, WireMessage};
