//! Process-wide relay counters.
//!
//! Plain atomics; the listener and sender bump them and a [`Snapshot`] is
//! logged when the listener stops.
use std::sync::atomic::{AtomicU64, Ordering};

static PACKETS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static PACKETS_REJECTED: AtomicU64 = AtomicU64::new(0);
static SELF_ECHOES: AtomicU64 = AtomicU64::new(0);
static COMMANDS_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_FAILED: AtomicU64 = AtomicU64::new(0);
static FRAGMENTS_SENT: AtomicU64 = AtomicU64::new(0);
static FRAGMENTS_FAILED: AtomicU64 = AtomicU64::new(0);
static DUPLICATES_SKIPPED: AtomicU64 = AtomicU64::new(0);

pub fn inc_packets_received() {
    PACKETS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_packets_rejected() {
    PACKETS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_self_echoes() {
    SELF_ECHOES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_dispatched() {
    COMMANDS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_failed() {
    COMMANDS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_fragments_sent() {
    FRAGMENTS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_fragments_failed() {
    FRAGMENTS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn add_duplicates_skipped(n: u64) {
    DUPLICATES_SKIPPED.fetch_add(n, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub packets_received: u64,
    pub packets_rejected: u64,
    pub self_echoes: u64,
    pub commands_dispatched: u64,
    pub commands_failed: u64,
    pub fragments_sent: u64,
    pub fragments_failed: u64,
    pub duplicates_skipped: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        packets_received: PACKETS_RECEIVED.load(Ordering::Relaxed),
        packets_rejected: PACKETS_REJECTED.load(Ordering::Relaxed),
        self_echoes: SELF_ECHOES.load(Ordering::Relaxed),
        commands_dispatched: COMMANDS_DISPATCHED.load(Ordering::Relaxed),
        commands_failed: COMMANDS_FAILED.load(Ordering::Relaxed),
        fragments_sent: FRAGMENTS_SENT.load(Ordering::Relaxed),
        fragments_failed: FRAGMENTS_FAILED.load(Ordering::Relaxed),
        duplicates_skipped: DUPLICATES_SKIPPED.load(Ordering::Relaxed),
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "packets rx={} rejected={} echo={} | commands ok={} failed={} | fragments sent={} failed={} | dupes skipped={}",
            self.packets_received,
            self.packets_rejected,
            self.self_echoes,
            self.commands_dispatched,
            self.commands_failed,
            self.fragments_sent,
            self.fragments_failed,
            self.duplicates_skipped
        )
    }
}
