//! Radio transport seam.
//!
//! The listener and sender only ever see [`RadioTransport`] and
//! [`InboundPacket`]; the Meshtastic adapter (or a test double) sits behind it.

use async_trait::async_trait;
use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::logutil::escape_log;

/// Broadcast destination node number.
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("transport closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application port of a decoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    TextMessage,
    Position,
    NodeInfo,
    Routing,
    Admin,
    TextMessageCompressed,
    Telemetry,
    Traceroute,
    NeighborInfo,
    Other(i32),
}

impl PayloadType {
    /// Map a Meshtastic `PortNum` value.
    pub fn from_portnum(portnum: i32) -> Self {
        match portnum {
            1 => PayloadType::TextMessage,
            3 => PayloadType::Position,
            4 => PayloadType::NodeInfo,
            5 => PayloadType::Routing,
            6 => PayloadType::Admin,
            7 => PayloadType::TextMessageCompressed,
            67 => PayloadType::Telemetry,
            70 => PayloadType::Traceroute,
            71 => PayloadType::NeighborInfo,
            other => PayloadType::Other(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PayloadType::TextMessage => "TEXT_MESSAGE_APP",
            PayloadType::Position => "POSITION_APP",
            PayloadType::NodeInfo => "NODEINFO_APP",
            PayloadType::Routing => "ROUTING_APP",
            PayloadType::Admin => "ADMIN_APP",
            PayloadType::TextMessageCompressed => "TEXT_MESSAGE_COMPRESSED_APP",
            PayloadType::Telemetry => "TELEMETRY_APP",
            PayloadType::Traceroute => "TRACEROUTE_APP",
            PayloadType::NeighborInfo => "NEIGHBORINFO_APP",
            PayloadType::Other(_) => "UNKNOWN_APP",
        }
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadType::Other(n) => write!(f, "UNKNOWN_APP({})", n),
            known => f.write_str(known.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub payload_type: PayloadType,
    pub text: Option<String>,
}

/// One packet as seen by the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPacket {
    pub from: u32,
    pub to: u32,
    pub channel: u32,
    pub decoded: Option<DecodedPayload>,
}

impl InboundPacket {
    /// A broadcast text message, as the radio would hand it up.
    pub fn text(from: u32, channel: u32, text: impl Into<String>) -> Self {
        Self {
            from,
            to: BROADCAST_ADDR,
            channel,
            decoded: Some(DecodedPayload {
                payload_type: PayloadType::TextMessage,
                text: Some(text.into()),
            }),
        }
    }

    pub fn payload_type(&self) -> Option<PayloadType> {
        self.decoded.as_ref().map(|d| d.payload_type)
    }
}

/// Render a node number the way Meshtastic clients display it (`!1a2b3c4d`).
pub fn format_node_id(id: u32) -> String {
    format!("!{:08x}", id)
}

/// Parse `!1a2b3c4d`, `0x1a2b3c4d`, or a plain decimal node number.
pub fn parse_node_id(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix('!').or_else(|| raw.strip_prefix("0x")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    raw.parse().ok()
}

#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Transmit one text packet on `channel`; returns the packet id.
    async fn send_text(&self, text: &str, channel: u32) -> Result<u32, TransportError>;

    /// Our own node number, once the radio has reported it.
    fn local_node_id(&self) -> Option<u32>;

    /// Periodic link keepalive.
    async fn keepalive(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Release the link. Safe to call more than once.
    async fn close(&self);
}

/// An open link: the send half plus the stream of inbound packets.
pub struct Connection {
    pub transport: Arc<dyn RadioTransport>,
    pub packets: mpsc::Receiver<InboundPacket>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, TransportError>;
}

/// Prints outbound text to stdout; used when no radio is attached.
pub struct ConsoleTransport {
    local_node_id: Option<u32>,
    next_id: AtomicU32,
    closed: AtomicBool,
}

impl ConsoleTransport {
    pub fn new(local_node_id: Option<u32>) -> Self {
        Self {
            local_node_id,
            next_id: AtomicU32::new(1),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RadioTransport for ConsoleTransport {
    async fn send_text(&self, text: &str, channel: u32) -> Result<u32, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("[ch {}] {}", channel, text);
        debug!("console send id={} ch={} text='{}'", id, channel, escape_log(text));
        Ok(id)
    }

    fn local_node_id(&self) -> Option<u32> {
        self.local_node_id
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portnum_mapping() {
        assert_eq!(PayloadType::from_portnum(1), PayloadType::TextMessage);
        assert_eq!(PayloadType::from_portnum(67).name(), "TELEMETRY_APP");
        assert_eq!(PayloadType::from_portnum(999), PayloadType::Other(999));
    }

    #[test]
    fn node_id_forms() {
        assert_eq!(parse_node_id("!0000abcd"), Some(0xabcd));
        assert_eq!(parse_node_id("0x10"), Some(16));
        assert_eq!(parse_node_id("42"), Some(42));
        assert_eq!(parse_node_id("!test1234"), None);
        assert_eq!(format_node_id(0xabcd), "!0000abcd");
    }

    #[tokio::test]
    async fn console_transport_refuses_after_close() {
        let t = ConsoleTransport::new(None);
        assert!(t.send_text("hi", 0).await.is_ok());
        t.close().await;
        t.close().await;
        assert!(matches!(
            t.send_text("hi", 0).await,
            Err(TransportError::Closed)
        ));
    }
}
