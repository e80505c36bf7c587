//! Command listener and outbound message pipeline.
//!
//! Packets come in through a [`transport::Connection`], pass the admission
//! filter in [`listener`], get parsed by [`commands`], and the answers are
//! shaped by [`format`] and [`dedup`] before [`sender`] splits them with
//! [`chunker`] and puts them on air.

pub mod chunker;
pub mod commands;
pub mod dedup;
pub mod format;
pub mod listener;
pub mod query;
pub mod sender;
pub mod transport;
#[cfg(feature = "weather")]
pub mod weather;

use crate::traffic::EventRecord;

/// An event record paired with its human-readable location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedEvent {
    pub record: EventRecord,
    /// Reverse-geocoded text or coordinate fallback; `None` when the record has no coordinates.
    pub location: Option<String>,
}

impl LocatedEvent {
    pub fn new(record: EventRecord, location: Option<String>) -> Self {
        Self { record, location }
    }
}

pub use chunker::chunk_message;
pub use commands::{normalize_interstate, parse_command, Command, CommandKind, ParsedCommand};
pub use dedup::{dedup_by_key, DedupKey, DedupStats, Deduplicator};
pub use format::EventFormatter;
pub use listener::{ListenerHandle, ListenerState, PacketOutcome, RejectReason};
pub use sender::{OutboundSender, SendReport};
pub use transport::{Connection, Connector, InboundPacket, RadioTransport, TransportError};
