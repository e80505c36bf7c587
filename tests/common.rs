//! Test doubles shared by the integration tests.
//!
//! Each test file pulls this in with `mod common;` and uses only what it needs.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use roadmesh::config::Config;
use roadmesh::geocode::ReverseGeocoder;
use roadmesh::relay::sender::OutboundSender;
use roadmesh::relay::transport::{
    Connection, Connector, InboundPacket, RadioTransport, TransportError,
};
use roadmesh::traffic::{AlertRecord, EventRecord, TrafficSource};

/// Records every transmitted fragment; can be told to fail the first N sends.
pub struct MockTransport {
    sent: Mutex<Vec<(String, u32)>>,
    fail_first: AtomicUsize,
    local_node_id: Option<u32>,
    closes: AtomicUsize,
}

impl MockTransport {
    pub fn new(local_node_id: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(0),
            local_node_id,
            closes: AtomicUsize::new(0),
        })
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        let t = Self::new(None);
        t.fail_first.store(n, Ordering::SeqCst);
        t
    }

    pub fn sent(&self) -> Vec<(String, u32)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(t, _)| t).collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RadioTransport for MockTransport {
    async fn send_text(&self, text: &str, channel: u32) -> Result<u32, TransportError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Send("simulated radio failure".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((text.to_string(), channel));
        Ok(sent.len() as u32)
    }

    fn local_node_id(&self) -> Option<u32> {
        self.local_node_id
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one prepared connection; the test keeps the packet sender.
pub struct MockConnector {
    transport: Arc<MockTransport>,
    packets: Mutex<Option<mpsc::Receiver<InboundPacket>>>,
    fail: bool,
    gate: Option<Arc<Notify>>,
}

impl MockConnector {
    pub fn new(transport: Arc<MockTransport>) -> (Self, mpsc::Sender<InboundPacket>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Self {
                transport,
                packets: Mutex::new(Some(rx)),
                fail: false,
                gate: None,
            },
            tx,
        )
    }

    /// Like `new`, but `connect` waits until the returned gate is notified.
    pub fn gated(
        transport: Arc<MockTransport>,
    ) -> (Self, mpsc::Sender<InboundPacket>, Arc<Notify>) {
        let (mut connector, tx) = Self::new(transport);
        let gate = Arc::new(Notify::new());
        connector.gate = Some(gate.clone());
        (connector, tx, gate)
    }

    pub fn failing() -> Self {
        Self {
            transport: MockTransport::new(None),
            packets: Mutex::new(None),
            fail: true,
            gate: None,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(TransportError::Connect("no radio at /dev/null".into()));
        }
        let packets = self
            .packets
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Connect("already connected".into()))?;
        Ok(Connection {
            transport: self.transport.clone(),
            packets,
        })
    }
}

/// Canned traffic data; counts calls per endpoint.
#[derive(Default)]
pub struct MockTraffic {
    pub accidents: Vec<EventRecord>,
    pub events: Vec<EventRecord>,
    pub alerts: Vec<AlertRecord>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl TrafficSource for MockTraffic {
    async fn fetch_accidents(&self, location: Option<&str>) -> Vec<EventRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        filter(&self.accidents, location)
    }

    async fn fetch_events(&self, location: Option<&str>) -> Vec<EventRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        filter(&self.events, location)
    }

    async fn fetch_alerts(&self) -> Vec<AlertRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.alerts.clone()
    }
}

fn filter(records: &[EventRecord], location: Option<&str>) -> Vec<EventRecord> {
    records
        .iter()
        .filter(|r| location.map(|l| r.matches_location(l)).unwrap_or(true))
        .cloned()
        .collect()
}

/// Always answers with the same place name; counts lookups.
pub struct FixedGeocoder {
    pub place: String,
    pub lookups: AtomicUsize,
}

impl FixedGeocoder {
    pub fn new(place: &str) -> Arc<Self> {
        Arc::new(Self {
            place: place.to_string(),
            lookups: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ReverseGeocoder for FixedGeocoder {
    async fn reverse(&self, _latitude: f64, _longitude: f64) -> String {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.place.clone()
    }
}

/// Valid config with pacing off and a key present.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.traffic.api_key = "test-key".into();
    config.meshtastic.min_send_gap_ms = 0;
    config.meshtastic.channel = 0;
    config.listener.max_results = 3;
    config.geocoding.enabled = false;
    config
}

pub fn sender_for(transport: Arc<MockTransport>, config: &Config) -> OutboundSender {
    OutboundSender::with_settings(
        transport,
        config.meshtastic.max_message_size,
        config.meshtastic.channel,
        Duration::ZERO,
    )
}

pub fn accident(id: &str, roadway: &str, direction: &str) -> EventRecord {
    EventRecord {
        id: id.to_string(),
        organization: Some("ADOT".into()),
        roadway_name: Some(roadway.to_string()),
        direction_of_travel: Some(direction.to_string()),
        description: Some(format!("Crash on {} near Phoenix", roadway)),
        lanes_affected: Some("Left lane".into()),
        event_type: Some("accidentsAndIncidents".into()),
        latitude: Some(33.45),
        longitude: Some(-112.07),
        reported: None,
        last_updated: Some("2025-12-11 14:30:00 MST".into()),
    }
}

pub fn roadwork(id: &str, roadway: &str) -> EventRecord {
    EventRecord {
        id: id.to_string(),
        organization: Some("ADOT".into()),
        roadway_name: Some(roadway.to_string()),
        direction_of_travel: Some("North".into()),
        description: Some(format!("Roadwork on {} in Phoenix", roadway)),
        event_type: Some("roadwork".into()),
        ..Default::default()
    }
}
