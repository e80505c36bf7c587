//! Per-fetch duplicate suppression.
//!
//! AZ511 often lists the same incident more than once (one entry per agency
//! or per direction segment). Within one fetch cycle only the first record
//! for a given key is emitted; source order is preserved.

use std::collections::HashSet;

use crate::relay::LocatedEvent;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Accident {
        roadway: String,
        direction: String,
        location: String,
        last_updated: String,
    },
    Event {
        roadway: String,
        event_type: String,
        direction: String,
        location: String,
    },
}

fn field(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

impl DedupKey {
    pub fn accident(event: &LocatedEvent) -> Self {
        let r = &event.record;
        DedupKey::Accident {
            roadway: field(r.roadway_name.as_deref()),
            direction: field(r.direction_of_travel.as_deref()),
            location: field(event.location.as_deref()),
            last_updated: field(r.last_updated.as_deref()),
        }
    }

    pub fn event(event: &LocatedEvent) -> Self {
        let r = &event.record;
        DedupKey::Event {
            roadway: field(r.roadway_name.as_deref()),
            event_type: field(r.event_type.as_deref()),
            direction: field(r.direction_of_travel.as_deref()),
            location: field(event.location.as_deref()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    pub emitted: usize,
    pub skipped: usize,
}

/// Streaming form: feed keys one at a time as records are resolved.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<DedupKey>,
    stats: DedupStats,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `key` is seen.
    pub fn admit(&mut self, key: DedupKey) -> bool {
        if self.seen.insert(key) {
            self.stats.emitted += 1;
            true
        } else {
            self.stats.skipped += 1;
            false
        }
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }
}

/// Batch form: keep the first item per key, in order.
pub fn dedup_by_key<T, F>(items: Vec<T>, key_of: F) -> (Vec<T>, DedupStats)
where
    F: Fn(&T) -> DedupKey,
{
    let mut dedup = Deduplicator::new();
    let kept = items
        .into_iter()
        .filter(|item| dedup.admit(key_of(item)))
        .collect();
    (kept, dedup.stats())
}
