//! Command listener.
//!
//! ```text
//! Idle -> Connecting -> Ready -> Processing -> Ready -> ... -> Stopped
//! ```
//!
//! [`spawn`] opens the radio link and hands it to a task that waits on three
//! sources: inbound packets, the [`ControlMessage`] channel, and a coarse
//! housekeeping tick that also drives transport keepalives. Packets are
//! processed one at a time, inline; a stop request is honored once the packet
//! in hand has been answered. The transport is closed exactly once, when the
//! loop exits, and only then is `Stopped` published.
//!
//! The current phase is published on a `watch` channel; see
//! [`ListenerHandle::phase`] and [`ListenerHandle::subscribe`].

use anyhow::{anyhow, Result};
use chrono::Utc;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::config::{Config, ConfigError};
use crate::geocode::ReverseGeocoder;
use crate::logutil::{escape_log, truncate_for_log, truncate_utf8};
use crate::metrics;
use crate::relay::commands::{parse_command, Command, CommandKind, ParsedCommand};
use crate::relay::dedup::{DedupKey, Deduplicator};
use crate::relay::format::{alert_summary, EventFormatter};
use crate::relay::sender::OutboundSender;
use crate::relay::transport::{format_node_id, Connector, InboundPacket, PayloadType};
use crate::relay::LocatedEvent;
use crate::traffic::{EventRecord, TrafficSource};
#[cfg(feature = "weather")]
use crate::relay::weather::WeatherService;

/// Inbound text is cut to this many bytes in log lines.
const LOG_PREVIEW_BYTES: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    Idle,
    Connecting,
    Ready,
    Processing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoDecodedPayload,
    NotText(PayloadType),
    WrongChannel { got: u32, expected: u32 },
    NoText,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NoDecodedPayload => write!(f, "no decoded payload"),
            RejectReason::NotText(t) => write!(f, "payload type {}", t),
            RejectReason::WrongChannel { got, expected } => {
                write!(f, "channel {} (listening on {})", got, expected)
            }
            RejectReason::NoText => write!(f, "no text"),
        }
    }
}

/// What happened to one inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOutcome {
    Rejected(RejectReason),
    SelfEcho,
    NoCommand,
    /// Handler ran; `messages` replies were put on air.
    Dispatched { kind: CommandKind, messages: usize },
    /// Handler failed and an error reply was sent.
    Failed { kind: CommandKind, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
}

/// Why the loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    StreamEnded,
}

#[derive(Clone, Copy)]
enum Style {
    Accident,
    Event,
}

pub struct ListenerState {
    traffic: Arc<dyn TrafficSource>,
    geocoder: Arc<dyn ReverseGeocoder>,
    formatter: EventFormatter,
    sender: OutboundSender,
    channel: u32,
    max_results: usize,
    error_reply_max: usize,
    #[cfg(feature = "weather")]
    weather: WeatherService,
    phase: watch::Sender<ListenerPhase>,
}

impl ListenerState {
    pub fn new(
        config: &Config,
        traffic: Arc<dyn TrafficSource>,
        geocoder: Arc<dyn ReverseGeocoder>,
        sender: OutboundSender,
    ) -> std::result::Result<Self, ConfigError> {
        // built around a sender that is already usable, so there is no link to bring up
        let (phase, _) = watch::channel(ListenerPhase::Ready);
        Ok(Self {
            traffic,
            geocoder,
            formatter: EventFormatter::new(&config.region)?,
            channel: sender.default_channel(),
            sender,
            max_results: config.listener.max_results.max(1),
            error_reply_max: config.listener.error_reply_max,
            #[cfg(feature = "weather")]
            weather: WeatherService::new(config.weather.clone()),
            phase,
        })
    }

    pub fn phase(&self) -> ListenerPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, next: ListenerPhase) {
        publish_phase(&self.phase, next);
    }

    /// Admission filter, self-echo check, then command dispatch.
    pub async fn handle_packet(&mut self, packet: InboundPacket) -> PacketOutcome {
        metrics::inc_packets_received();
        if let Err(reason) = self.admit(&packet) {
            metrics::inc_packets_rejected();
            debug!(
                "Ignoring packet from {}: {}",
                format_node_id(packet.from),
                reason
            );
            return PacketOutcome::Rejected(reason);
        }
        let text = packet
            .decoded
            .as_ref()
            .and_then(|d| d.text.as_deref())
            .unwrap_or_default();

        if let Some(me) = self.sender.transport().local_node_id() {
            if packet.from == me {
                metrics::inc_self_echoes();
                debug!(
                    "Self-echo on ch {}: '{}'",
                    packet.channel,
                    truncate_for_log(text, LOG_PREVIEW_BYTES)
                );
                return PacketOutcome::SelfEcho;
            }
        }

        info!(
            "Message from {} on ch {}: '{}'",
            format_node_id(packet.from),
            packet.channel,
            truncate_for_log(text, LOG_PREVIEW_BYTES)
        );
        let text = text.to_string();
        self.process_text(&text).await
    }

    fn admit(&self, packet: &InboundPacket) -> std::result::Result<(), RejectReason> {
        let decoded = packet
            .decoded
            .as_ref()
            .ok_or(RejectReason::NoDecodedPayload)?;
        if decoded.payload_type != PayloadType::TextMessage {
            return Err(RejectReason::NotText(decoded.payload_type));
        }
        if packet.channel != self.channel {
            return Err(RejectReason::WrongChannel {
                got: packet.channel,
                expected: self.channel,
            });
        }
        match decoded.text.as_deref() {
            Some(t) if !t.is_empty() => Ok(()),
            _ => Err(RejectReason::NoText),
        }
    }

    /// Parse and dispatch text that already passed admission.
    pub async fn process_text(&mut self, text: &str) -> PacketOutcome {
        match parse_command(text) {
            ParsedCommand::NoCommand => {
                debug!("No command in '{}'", truncate_for_log(text, LOG_PREVIEW_BYTES));
                PacketOutcome::NoCommand
            }
            ParsedCommand::Command(cmd) => self.dispatch(cmd).await,
        }
    }

    async fn dispatch(&mut self, cmd: Command) -> PacketOutcome {
        self.set_phase(ListenerPhase::Processing);
        metrics::inc_commands_dispatched();
        info!("Command {} '{}'", cmd.kind, escape_log(&cmd.argument));

        let handler = async {
            match cmd.kind {
                CommandKind::Accidents => self.handle_accidents(&cmd).await,
                CommandKind::Events => self.handle_events(&cmd).await,
                CommandKind::Alerts => self.handle_alerts(&cmd).await,
                CommandKind::Weather => self.handle_weather(&cmd).await,
            }
        };
        let result = match AssertUnwindSafe(handler).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow!("internal error: {}", panic_message(&*panic))),
        };

        let outcome = match result {
            Ok(messages) => PacketOutcome::Dispatched {
                kind: cmd.kind,
                messages,
            },
            Err(e) => {
                metrics::inc_commands_failed();
                error!("Error processing {} request: {:#}", cmd.kind, e);
                let detail = e.to_string();
                let reply = format!(
                    "Error processing {} request: {}",
                    cmd.kind,
                    truncate_utf8(&detail, self.error_reply_max)
                );
                let report = self.sender.send(&reply).await;
                if report.delivered == 0 {
                    warn!("Error reply for {} could not be delivered", cmd.kind);
                }
                PacketOutcome::Failed {
                    kind: cmd.kind,
                    error: detail,
                }
            }
        };
        self.set_phase(ListenerPhase::Ready);
        outcome
    }

    async fn handle_accidents(&self, cmd: &Command) -> Result<usize> {
        let records = self.traffic.fetch_accidents(cmd.location_filter()).await;
        if records.is_empty() {
            return self
                .send_all(&[format!("No accidents found for '{}'", cmd.argument)])
                .await;
        }
        let messages = self.render(records, Style::Accident).await;
        self.send_all(&messages).await
    }

    async fn handle_events(&self, cmd: &Command) -> Result<usize> {
        let records: Vec<EventRecord> = self
            .traffic
            .fetch_events(cmd.location_filter())
            .await
            .into_iter()
            .filter(|r| !r.is_accident())
            .collect();
        if records.is_empty() {
            return self
                .send_all(&[format!("No events found for '{}'", cmd.argument)])
                .await;
        }
        let messages = self.render(records, Style::Event).await;
        self.send_all(&messages).await
    }

    async fn handle_alerts(&self, cmd: &Command) -> Result<usize> {
        let alerts: Vec<_> = match cmd.location_filter() {
            Some(filter) => self
                .traffic
                .fetch_alerts()
                .await
                .into_iter()
                .filter(|a| a.matches(filter))
                .collect(),
            None => self.traffic.fetch_alerts().await,
        };
        if alerts.is_empty() {
            return self
                .send_all(&[format!("No alerts found for '{}'", cmd.argument)])
                .await;
        }
        let shown = alerts.len().min(self.max_results);
        let mut messages = vec![alert_summary(alerts.len(), shown)];
        messages.extend(
            alerts
                .iter()
                .take(shown)
                .map(|a| self.formatter.format_alert(a)),
        );
        self.send_all(&messages).await
    }

    #[cfg(feature = "weather")]
    async fn handle_weather(&self, cmd: &Command) -> Result<usize> {
        let reply = self.weather.fetch_weather_for_location(&cmd.argument).await;
        self.send_all(&[reply]).await
    }

    #[cfg(not(feature = "weather"))]
    async fn handle_weather(&self, _cmd: &Command) -> Result<usize> {
        self.send_all(&["Weather service is disabled".to_string()])
            .await
    }

    /// Resolve, dedup and format in source order, stopping at `max_results`
    /// so geocoding is only paid for records that will be sent.
    async fn render(&self, records: Vec<EventRecord>, style: Style) -> Vec<String> {
        let total = records.len();
        let now = Utc::now();
        let mut dedup = Deduplicator::new();
        let mut messages = Vec::new();
        for record in records {
            if messages.len() >= self.max_results {
                break;
            }
            let location = match record.coordinates() {
                Some((lat, lon)) => Some(self.geocoder.reverse(lat, lon).await),
                None => None,
            };
            let event = LocatedEvent::new(record, location);
            let key = match style {
                Style::Accident => DedupKey::accident(&event),
                Style::Event => DedupKey::event(&event),
            };
            if !dedup.admit(key) {
                continue;
            }
            messages.push(match style {
                Style::Accident => self.formatter.format_accident(&event, now),
                Style::Event => self.formatter.format_event(&event),
            });
        }
        let stats = dedup.stats();
        metrics::add_duplicates_skipped(stats.skipped as u64);
        debug!(
            "Rendered {} of {} records ({} duplicates skipped)",
            messages.len(),
            total,
            stats.skipped
        );
        messages
    }

    /// Send each message separately. Fails only if some message got no
    /// fragment through at all; the rest are still attempted.
    async fn send_all(&self, messages: &[String]) -> Result<usize> {
        let mut lost = 0usize;
        for message in messages {
            info!("Sending: {}", escape_log(message));
            let report = self.sender.send(message).await;
            if report.fragments > 0 && report.delivered == 0 {
                lost += 1;
            }
        }
        if lost > 0 {
            return Err(anyhow!(
                "{} of {} replies could not be transmitted",
                lost,
                messages.len()
            ));
        }
        Ok(messages.len())
    }

    async fn run(
        mut self,
        mut packets: mpsc::Receiver<InboundPacket>,
        mut control: mpsc::UnboundedReceiver<ControlMessage>,
        poll_interval: Duration,
        keepalive_every: Option<Duration>,
    ) -> StopReason {
        let mut tick = interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_keepalive = Instant::now();
        self.set_phase(ListenerPhase::Ready);
        info!("Listening on channel {}", self.channel);

        let reason = loop {
            tokio::select! {
                biased;

                msg = control.recv() => {
                    match msg {
                        Some(ControlMessage::Shutdown) => {
                            info!("Listener received shutdown signal");
                        }
                        None => {
                            warn!("Control channel closed, shutting down listener");
                        }
                    }
                    break StopReason::Requested;
                }

                packet = packets.recv() => {
                    match packet {
                        Some(packet) => {
                            let outcome = self.handle_packet(packet).await;
                            debug!("Packet outcome: {:?}", outcome);
                        }
                        None => {
                            warn!("Radio packet stream ended");
                            break StopReason::StreamEnded;
                        }
                    }
                }

                _ = tick.tick() => {
                    if let Some(every) = keepalive_every {
                        if last_keepalive.elapsed() >= every {
                            if let Err(e) = self.sender.transport().keepalive().await {
                                warn!("Keepalive failed: {}", e);
                            }
                            last_keepalive = Instant::now();
                        }
                    }
                }
            }
        };

        self.sender.transport().close().await;
        self.set_phase(ListenerPhase::Stopped);
        info!("Listener stopped ({:?}); {}", reason, metrics::snapshot());
        reason
    }
}

/// Control side of a running listener.
pub struct ListenerHandle {
    control: mpsc::UnboundedSender<ControlMessage>,
    phase: watch::Receiver<ListenerPhase>,
    task: JoinHandle<StopReason>,
}

impl ListenerHandle {
    /// Ask the loop to stop after the packet in hand. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.control.send(ControlMessage::Shutdown).is_err() {
            debug!("Listener already stopped");
        }
    }

    /// Sender for wiring the stop request into other tasks (e.g. a Ctrl-C watcher).
    pub fn control(&self) -> mpsc::UnboundedSender<ControlMessage> {
        self.control.clone()
    }

    /// Phase most recently published by the loop.
    pub fn phase(&self) -> ListenerPhase {
        *self.phase.borrow()
    }

    /// Independent receiver for phase changes.
    pub fn subscribe(&self) -> watch::Receiver<ListenerPhase> {
        self.phase.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> Result<StopReason> {
        self.task
            .await
            .map_err(|e| anyhow!("Listener task failed: {}", e))
    }
}

/// Connect and start the listen loop on its own task.
///
/// Connection failures are returned here; nothing is spawned.
pub async fn spawn(
    config: &Config,
    connector: &dyn Connector,
    traffic: Arc<dyn TrafficSource>,
    geocoder: Arc<dyn ReverseGeocoder>,
) -> Result<ListenerHandle> {
    let (phase_tx, _) = watch::channel(ListenerPhase::Idle);
    spawn_observed(config, connector, traffic, geocoder, phase_tx).await
}

/// [`spawn`], publishing phases on a caller-owned channel so the
/// `Connecting` window and a failed connect are visible too.
pub async fn spawn_observed(
    config: &Config,
    connector: &dyn Connector,
    traffic: Arc<dyn TrafficSource>,
    geocoder: Arc<dyn ReverseGeocoder>,
    phase_tx: watch::Sender<ListenerPhase>,
) -> Result<ListenerHandle> {
    let phase_rx = phase_tx.subscribe();
    // covers link setup and local node discovery
    publish_phase(&phase_tx, ListenerPhase::Connecting);
    let connection = match connector.connect().await {
        Ok(connection) => connection,
        Err(e) => {
            error!("Radio connection failed: {}", e);
            publish_phase(&phase_tx, ListenerPhase::Stopped);
            return Err(anyhow!("Radio connection failed: {}", e));
        }
    };
    match connection.transport.local_node_id() {
        Some(id) => info!("Connected to radio {}", format_node_id(id)),
        None => warn!("Connected, but the radio did not report its node id; self-echo filtering is off"),
    }

    let sender = OutboundSender::new(connection.transport.clone(), &config.meshtastic);
    let mut state = match ListenerState::new(config, traffic, geocoder, sender) {
        Ok(state) => state,
        Err(e) => {
            connection.transport.close().await;
            publish_phase(&phase_tx, ListenerPhase::Stopped);
            return Err(e.into());
        }
    };
    state.phase = phase_tx;

    let poll = Duration::from_millis(config.listener.poll_interval_ms.max(1));
    let keepalive = match config.listener.keepalive_seconds {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(state.run(connection.packets, control_rx, poll, keepalive));
    Ok(ListenerHandle {
        control: control_tx,
        phase: phase_rx,
        task,
    })
}

fn publish_phase(phase: &watch::Sender<ListenerPhase>, next: ListenerPhase) {
    let prev = phase.send_replace(next);
    if prev != next {
        debug!("Listener {:?} -> {:?}", prev, next);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
