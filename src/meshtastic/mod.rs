//! # Meshtastic Device Adapter
//!
//! Implements [`RadioTransport`] and [`Connector`] for a Meshtastic node reached
//! over USB serial or the firmware's TCP API (port 4403). Both links carry the
//! same length-prefixed protobuf stream (see [`framer`]).
//!
//! ## Connection sequence
//!
//! 1. Open the link (serial port or TCP socket).
//! 2. Start a reader that decodes `FromRadio` frames. `MyNodeInfo` records our
//!    node number; every `MeshPacket` is forwarded as an [`InboundPacket`].
//! 3. Send `ToRadio.want_config_id` with a random id so the node starts
//!    streaming, then wait (bounded) for our node number.
//!
//! Outbound text is a broadcast `MeshPacket` carrying `Data{TEXT_MESSAGE_APP}`.
//! Keepalives are `ToRadio.heartbeat`.
//!
//! ## Configuration
//!
//! ```toml
//! [meshtastic]
//! connection = "serial"      # or "tcp"
//! port = "/dev/ttyUSB0"      # empty: first USB serial port found
//! baud_rate = 115200
//! tcp_host = "192.168.1.40"
//! tcp_port = 4403
//! ```

pub mod framer;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use prost::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

#[cfg(feature = "serial")]
use serialport::SerialPort;
#[cfg(feature = "serial")]
use std::io::{Read, Write};

use crate::config::{ConnectionKind, MeshtasticConfig};
use crate::logutil::escape_log;
use crate::protobuf::meshtastic_generated as proto;
use crate::relay::transport::{
    format_node_id, Connection, Connector, DecodedPayload, InboundPacket, PayloadType,
    RadioTransport, TransportError, BROADCAST_ADDR,
};
use framer::{encode_frame, StreamFramer};

const INBOUND_QUEUE: usize = 64;
const DEFAULT_HOP_LIMIT: u32 = 3;

/// What one `FromRadio` frame meant to us.
#[derive(Debug, PartialEq)]
pub(crate) enum RadioEvent {
    MyNode(u32),
    Packet(InboundPacket),
    ConfigComplete(u32),
    Rebooted,
    Ignored,
}

fn to_inbound(pkt: proto::MeshPacket) -> InboundPacket {
    use proto::mesh_packet::PayloadVariant;
    let decoded = match pkt.payload_variant {
        Some(PayloadVariant::Decoded(data)) => {
            let payload_type = PayloadType::from_portnum(data.portnum);
            let text = match payload_type {
                PayloadType::TextMessage => String::from_utf8(data.payload.to_vec()).ok(),
                _ => None,
            };
            Some(DecodedPayload { payload_type, text })
        }
        // encrypted for a channel we hold no key for
        Some(PayloadVariant::Encrypted(_)) | None => None,
    };
    InboundPacket {
        from: pkt.from,
        to: pkt.to,
        channel: pkt.channel,
        decoded,
    }
}

pub(crate) fn decode_from_radio(frame: &[u8]) -> RadioEvent {
    use proto::from_radio::PayloadVariant;
    let msg = match proto::FromRadio::decode(frame) {
        Ok(msg) => msg,
        Err(e) => {
            trace!("Undecodable FromRadio frame ({} bytes): {}", frame.len(), e);
            return RadioEvent::Ignored;
        }
    };
    match msg.payload_variant {
        Some(PayloadVariant::MyInfo(info)) => RadioEvent::MyNode(info.my_node_num),
        Some(PayloadVariant::Packet(pkt)) => RadioEvent::Packet(to_inbound(pkt)),
        Some(PayloadVariant::ConfigCompleteId(id)) => RadioEvent::ConfigComplete(id),
        Some(PayloadVariant::Rebooted(_)) => RadioEvent::Rebooted,
        None => RadioEvent::Ignored,
    }
}

/// Reader-side state shared by the TCP and serial readers.
struct FrameSink {
    packets: mpsc::Sender<InboundPacket>,
    node_id: watch::Sender<Option<u32>>,
}

impl FrameSink {
    /// Apply a frame; returns a packet to forward, if any.
    fn handle(&self, frame: Bytes) -> Option<InboundPacket> {
        match decode_from_radio(&frame) {
            RadioEvent::MyNode(num) => {
                info!("Radio reports our node id {}", format_node_id(num));
                self.node_id.send_replace(Some(num));
                None
            }
            RadioEvent::Packet(pkt) => {
                trace!(
                    "Packet from {} ch={} type={:?}",
                    format_node_id(pkt.from),
                    pkt.channel,
                    pkt.payload_type()
                );
                Some(pkt)
            }
            RadioEvent::ConfigComplete(id) => {
                debug!("Radio config stream complete (id=0x{:08x})", id);
                None
            }
            RadioEvent::Rebooted => {
                warn!("Radio reported a reboot");
                None
            }
            RadioEvent::Ignored => None,
        }
    }
}

async fn tcp_reader(mut rd: OwnedReadHalf, sink: FrameSink, closed: Arc<AtomicBool>) {
    let mut framer = StreamFramer::new();
    let mut buf = [0u8; 1024];
    loop {
        match rd.read(&mut buf).await {
            Ok(0) => {
                info!("Radio closed the TCP connection");
                break;
            }
            Ok(n) => {
                framer.push(&buf[..n]);
                while let Some(frame) = framer.next_frame() {
                    if let Some(pkt) = sink.handle(frame) {
                        if sink.packets.send(pkt).await.is_err() {
                            debug!("Packet consumer gone; stopping TCP reader");
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    warn!("TCP read error: {}", e);
                }
                break;
            }
        }
    }
}

#[cfg(feature = "serial")]
fn serial_reader(mut port: Box<dyn SerialPort>, sink: FrameSink, closed: Arc<AtomicBool>) {
    let mut framer = StreamFramer::new();
    let mut buf = [0u8; 1024];
    while !closed.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                framer.push(&buf[..n]);
                while let Some(frame) = framer.next_frame() {
                    if let Some(pkt) = sink.handle(frame) {
                        if sink.packets.blocking_send(pkt).is_err() {
                            debug!("Packet consumer gone; stopping serial reader");
                            return;
                        }
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Serial read error: {}", e);
                break;
            }
        }
    }
    debug!(
        "Serial reader stopped ({} stray bytes skipped)",
        framer.discarded()
    );
}

#[cfg(feature = "serial")]
fn detect_serial_port() -> Result<String, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::Connect(format!("cannot enumerate serial ports: {}", e)))?;
    ports
        .iter()
        .find(|p| matches!(p.port_type, serialport::SerialPortType::UsbPort(_)))
        .or_else(|| ports.first())
        .map(|p| p.port_name.clone())
        .ok_or_else(|| TransportError::Connect("no serial ports found".to_string()))
}

#[cfg(feature = "serial")]
async fn open_serial(config: &MeshtasticConfig) -> Result<Box<dyn SerialPort>, TransportError> {
    let port_name = if config.port.trim().is_empty() {
        let found = detect_serial_port()?;
        info!("Auto-detected serial port {}", found);
        found
    } else {
        config.port.trim().to_string()
    };
    debug!("Opening serial port {} at {} baud", port_name, config.baud_rate);

    let mut builder =
        serialport::new(&port_name, config.baud_rate).timeout(std::time::Duration::from_millis(500));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder.open().map_err(|e| {
        TransportError::Connect(format!("failed to open serial port {}: {}", port_name, e))
    })?;

    // Toggle DTR/RTS so the device wakes
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Drop buffered boot text
    let _ = port.clear(serialport::ClearBuffer::Input);
    Ok(port)
}

enum Writer {
    Tcp(OwnedWriteHalf),
    #[cfg(feature = "serial")]
    Serial(Arc<std::sync::Mutex<Box<dyn SerialPort>>>),
}

pub struct MeshtasticTransport {
    writer: Mutex<Writer>,
    node_id: watch::Receiver<Option<u32>>,
    closed: Arc<AtomicBool>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MeshtasticTransport {
    /// Open the configured link and start the reader.
    pub async fn open(config: &MeshtasticConfig) -> Result<Connection, TransportError> {
        let (packets_tx, packets_rx) = mpsc::channel(INBOUND_QUEUE);
        let (node_tx, node_rx) = watch::channel(None);
        let closed = Arc::new(AtomicBool::new(false));
        let sink = FrameSink {
            packets: packets_tx,
            node_id: node_tx,
        };
        let connect_timeout = Duration::from_secs(config.connect_timeout_seconds.max(1));

        let (writer, reader) = match config.connection {
            ConnectionKind::Tcp => {
                let host = config
                    .tcp_host
                    .as_deref()
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| TransportError::Connect("no TCP host configured".into()))?;
                info!("Connecting to Meshtastic node at {}:{}", host, config.tcp_port);
                let stream = timeout(connect_timeout, TcpStream::connect((host, config.tcp_port)))
                    .await
                    .map_err(|_| {
                        TransportError::Connect(format!(
                            "timed out connecting to {}:{}",
                            host, config.tcp_port
                        ))
                    })?
                    .map_err(|e| {
                        TransportError::Connect(format!(
                            "{}:{}: {}",
                            host, config.tcp_port, e
                        ))
                    })?;
                let _ = stream.set_nodelay(true);
                let (rd, wr) = stream.into_split();
                let handle = tokio::spawn(tcp_reader(rd, sink, closed.clone()));
                (Writer::Tcp(wr), handle)
            }
            #[cfg(feature = "serial")]
            ConnectionKind::Serial => {
                let port = open_serial(config).await?;
                let reader_port = port.try_clone().map_err(|e| {
                    TransportError::Connect(format!("cannot clone serial handle: {}", e))
                })?;
                let reader_closed = closed.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    serial_reader(reader_port, sink, reader_closed)
                });
                (Writer::Serial(Arc::new(std::sync::Mutex::new(port))), handle)
            }
            #[cfg(not(feature = "serial"))]
            ConnectionKind::Serial => {
                return Err(TransportError::Connect(
                    "built without serial support; use connection = \"tcp\"".into(),
                ));
            }
        };

        let transport = Arc::new(MeshtasticTransport {
            writer: Mutex::new(writer),
            node_id: node_rx,
            closed,
            reader: std::sync::Mutex::new(Some(reader)),
        });

        let mut config_id: u32 = rand::random();
        if config_id == 0 {
            config_id = 1;
        }
        debug!("Requesting radio config (want_config_id=0x{:08x})", config_id);
        if let Err(e) = transport.send_want_config(config_id).await {
            transport.close().await;
            return Err(TransportError::Connect(format!("radio handshake failed: {}", e)));
        }

        let mut node_rx = transport.node_id.clone();
        let known = timeout(connect_timeout, node_rx.wait_for(|id| id.is_some()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        if !known {
            warn!("Radio has not reported its node id yet; self-echo detection is off until it does");
        }

        Ok(Connection {
            transport,
            packets: packets_rx,
        })
    }

    async fn write_toradio(&self, msg: proto::ToRadio) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.write_frame(msg).await
    }

    async fn write_frame(&self, msg: proto::ToRadio) -> Result<(), TransportError> {
        let payload = msg.encode_to_vec();
        let frame = encode_frame(&payload)?;
        let mut writer = self.writer.lock().await;
        match &mut *writer {
            Writer::Tcp(w) => {
                w.write_all(&frame).await?;
                w.flush().await?;
            }
            #[cfg(feature = "serial")]
            Writer::Serial(port) => {
                let port = port.clone();
                tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                    let mut port = port.lock().map_err(|_| {
                        std::io::Error::new(std::io::ErrorKind::Other, "serial port lock poisoned")
                    })?;
                    port.write_all(&frame)?;
                    port.flush()
                })
                .await
                .map_err(|e| TransportError::Send(format!("serial writer task failed: {}", e)))??;
            }
        }
        trace!("Sent ToRadio frame ({} bytes payload)", payload.len());
        Ok(())
    }

    async fn send_want_config(&self, request_id: u32) -> Result<(), TransportError> {
        use proto::to_radio::PayloadVariant;
        self.write_toradio(proto::ToRadio {
            payload_variant: Some(PayloadVariant::WantConfigId(request_id)),
        })
        .await
    }
}

#[async_trait]
impl RadioTransport for MeshtasticTransport {
    async fn send_text(&self, text: &str, channel: u32) -> Result<u32, TransportError> {
        use proto::mesh_packet::PayloadVariant as MPPayload;
        use proto::to_radio::PayloadVariant as TRPayload;

        let mut packet_id: u32 = rand::random();
        if packet_id == 0 {
            packet_id = 1;
        }
        let data = proto::Data {
            portnum: proto::PortNum::TextMessageApp as i32,
            payload: Bytes::copy_from_slice(text.as_bytes()),
            ..Default::default()
        };
        let pkt = proto::MeshPacket {
            // firmware fills in `from` for locally originated packets
            from: self.local_node_id().unwrap_or(0),
            to: BROADCAST_ADDR,
            channel,
            payload_variant: Some(MPPayload::Decoded(data)),
            id: packet_id,
            hop_limit: DEFAULT_HOP_LIMIT,
            ..Default::default()
        };
        self.write_toradio(proto::ToRadio {
            payload_variant: Some(TRPayload::Packet(pkt)),
        })
        .await?;
        debug!(
            "Sent text id=0x{:08x} ch={} ({} bytes): '{}'",
            packet_id,
            channel,
            text.len(),
            escape_log(text)
        );
        Ok(packet_id)
    }

    fn local_node_id(&self) -> Option<u32> {
        *self.node_id.borrow()
    }

    async fn keepalive(&self) -> Result<(), TransportError> {
        use proto::to_radio::PayloadVariant;
        let nonce: u32 = rand::random();
        self.write_toradio(proto::ToRadio {
            payload_variant: Some(PayloadVariant::Heartbeat(proto::Heartbeat { nonce })),
        })
        .await?;
        trace!("Heartbeat sent (nonce={})", nonce);
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        use proto::to_radio::PayloadVariant;
        let bye = proto::ToRadio {
            payload_variant: Some(PayloadVariant::Disconnect(true)),
        };
        if let Err(e) = self.write_frame(bye).await {
            debug!("Disconnect notice not delivered: {}", e);
        }
        {
            let mut writer = self.writer.lock().await;
            if let Writer::Tcp(w) = &mut *writer {
                let _ = w.shutdown().await;
            }
        }
        let reader = self.reader.lock().ok().and_then(|mut r| r.take());
        if let Some(handle) = reader {
            // serial reader exits on its own within one read timeout
            handle.abort();
        }
        info!("Meshtastic link closed");
    }
}

/// Opens a [`MeshtasticTransport`] from configuration.
pub struct MeshtasticConnector {
    config: MeshtasticConfig,
}

impl MeshtasticConnector {
    pub fn new(config: &MeshtasticConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl Connector for MeshtasticConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        MeshtasticTransport::open(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::from_radio::PayloadVariant as FR;
    use proto::mesh_packet::PayloadVariant as MP;

    fn from_radio(variant: FR) -> Vec<u8> {
        proto::FromRadio {
            id: 7,
            payload_variant: Some(variant),
        }
        .encode_to_vec()
    }

    fn mesh_packet(portnum: proto::PortNum, payload: &[u8], channel: u32) -> proto::MeshPacket {
        proto::MeshPacket {
            from: 0x1234,
            to: BROADCAST_ADDR,
            channel,
            payload_variant: Some(MP::Decoded(proto::Data {
                portnum: portnum as i32,
                payload: Bytes::copy_from_slice(payload),
                ..Default::default()
            })),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_text_packet() {
        let frame = from_radio(FR::Packet(mesh_packet(
            proto::PortNum::TextMessageApp,
            b"accidents I10",
            2,
        )));
        assert_eq!(
            decode_from_radio(&frame),
            RadioEvent::Packet(InboundPacket {
                from: 0x1234,
                to: BROADCAST_ADDR,
                channel: 2,
                decoded: Some(DecodedPayload {
                    payload_type: PayloadType::TextMessage,
                    text: Some("accidents I10".into()),
                }),
            })
        );
    }

    #[test]
    fn telemetry_has_no_text() {
        let frame = from_radio(FR::Packet(mesh_packet(
            proto::PortNum::TelemetryApp,
            &[0x0d, 0x01],
            0,
        )));
        match decode_from_radio(&frame) {
            RadioEvent::Packet(pkt) => {
                let decoded = pkt.decoded.unwrap();
                assert_eq!(decoded.payload_type, PayloadType::Telemetry);
                assert_eq!(decoded.text, None);
            }
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn encrypted_packet_has_no_decoded_payload() {
        let pkt = proto::MeshPacket {
            from: 9,
            payload_variant: Some(MP::Encrypted(Bytes::from_static(b"\x01\x02"))),
            ..Default::default()
        };
        match decode_from_radio(&from_radio(FR::Packet(pkt))) {
            RadioEvent::Packet(p) => assert!(p.decoded.is_none()),
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn my_info_and_garbage() {
        let frame = from_radio(FR::MyInfo(proto::MyNodeInfo {
            my_node_num: 0xdeadbeef,
        }));
        assert_eq!(decode_from_radio(&frame), RadioEvent::MyNode(0xdeadbeef));
        assert_eq!(decode_from_radio(&[0xff, 0xff, 0xff]), RadioEvent::Ignored);
    }

    #[tokio::test]
    async fn tcp_link_round_trip() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // fake node: read want_config, answer with MyInfo and one text packet,
        // then read the outbound text frame
        let node = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut framer = StreamFramer::new();
            let mut buf = [0u8; 512];
            let mut frames = Vec::new();
            while frames.is_empty() {
                let n = sock.read(&mut buf).await.unwrap();
                framer.push(&buf[..n]);
                while let Some(f) = framer.next_frame() {
                    frames.push(f);
                }
            }
            let want = proto::ToRadio::decode(frames.remove(0)).unwrap();
            assert!(matches!(
                want.payload_variant,
                Some(proto::to_radio::PayloadVariant::WantConfigId(_))
            ));
            let info = encode_frame(&from_radio(FR::MyInfo(proto::MyNodeInfo {
                my_node_num: 0xabc,
            })))
            .unwrap();
            let text = encode_frame(&from_radio(FR::Packet(mesh_packet(
                proto::PortNum::TextMessageApp,
                b"hello",
                0,
            ))))
            .unwrap();
            sock.write_all(&info).await.unwrap();
            sock.write_all(&text).await.unwrap();

            loop {
                while let Some(f) = framer.next_frame() {
                    let msg = proto::ToRadio::decode(f).unwrap();
                    if let Some(proto::to_radio::PayloadVariant::Packet(p)) = msg.payload_variant {
                        return p;
                    }
                }
                let n = sock.read(&mut buf).await.unwrap();
                assert!(n > 0, "link closed before text frame");
                framer.push(&buf[..n]);
            }
        });

        let config = MeshtasticConfig {
            connection: ConnectionKind::Tcp,
            tcp_host: Some("127.0.0.1".into()),
            tcp_port: port,
            connect_timeout_seconds: 5,
            ..Default::default()
        };
        let mut conn = MeshtasticTransport::open(&config).await.unwrap();
        assert_eq!(conn.transport.local_node_id(), Some(0xabc));
        let inbound = conn.packets.recv().await.unwrap();
        assert_eq!(inbound.from, 0x1234);

        conn.transport.send_text("reply", 0).await.unwrap();
        let sent = node.await.unwrap();
        assert_eq!(sent.to, BROADCAST_ADDR);
        match sent.payload_variant {
            Some(MP::Decoded(d)) => assert_eq!(&d.payload[..], b"reply"),
            other => panic!("unexpected payload {:?}", other),
        }

        conn.transport.close().await;
        conn.transport.close().await;
        assert!(matches!(
            conn.transport.send_text("late", 0).await,
            Err(TransportError::Closed)
        ));
    }
}
