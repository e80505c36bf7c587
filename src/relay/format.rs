//! Compact text renderings of traffic records.
//!
//! Every segment after the headline is optional; a missing field drops its
//! segment instead of leaving a placeholder. Formatting never fails.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

use crate::config::{ConfigError, RegionConfig};
use crate::relay::LocatedEvent;
use crate::traffic::AlertRecord;

const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const UNKNOWN_ROAD: &str = "Unknown road";
const NO_DATA: &str = "No Data";

/// Renders records in the operating region's civil time.
#[derive(Debug, Clone)]
pub struct EventFormatter {
    offset: FixedOffset,
    label: String,
}

impl EventFormatter {
    pub fn new(region: &RegionConfig) -> Result<Self, ConfigError> {
        Ok(Self::from_offset(region.offset()?, &region.timezone_label))
    }

    pub fn from_offset(offset: FixedOffset, label: &str) -> Self {
        Self {
            offset,
            label: label.to_string(),
        }
    }

    /// `YYYY-MM-DD HH:MM:SS <label>` for a positive epoch, else `None`.
    pub fn epoch_to_local(&self, epoch_secs: i64) -> Option<String> {
        if epoch_secs <= 0 {
            return None;
        }
        let utc = DateTime::<Utc>::from_timestamp(epoch_secs, 0)?;
        let local = utc.with_timezone(&self.offset);
        Some(format!("{} {}", local.format(LOCAL_FORMAT), self.label))
    }

    /// Inverse of [`epoch_to_local`](Self::epoch_to_local). A trailing zone
    /// abbreviation is ignored; the configured offset is assumed.
    pub fn parse_local(&self, text: &str) -> Option<DateTime<FixedOffset>> {
        let text = text.trim();
        let body = match text.rsplit_once(' ') {
            Some((head, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_alphabetic()) => head,
            _ => text,
        };
        let naive = NaiveDateTime::parse_from_str(body.trim(), LOCAL_FORMAT).ok()?;
        self.offset.from_local_datetime(&naive).single()
    }

    /// Elapsed note (`2h5m`, `40m`) between a stored local timestamp and `now`.
    pub fn elapsed_since(&self, last_updated: &str, now: DateTime<Utc>) -> Option<String> {
        let then = self.parse_local(last_updated)?;
        let secs = now.signed_duration_since(then).num_seconds().max(0);
        Some(format_elapsed_secs(secs))
    }

    /// `ACCIDENT: <roadway> (<dir>) Lanes: <lanes> @ <location> [<elapsed> ago]`
    pub fn format_accident(&self, event: &LocatedEvent, now: DateTime<Utc>) -> String {
        let record = &event.record;
        let mut parts = vec![format!("ACCIDENT: {}", roadway(record.roadway_name.as_deref()))];
        push_direction(&mut parts, record.direction_of_travel.as_deref());
        if let Some(lanes) = non_empty(record.lanes_affected.as_deref()) {
            if lanes != NO_DATA {
                parts.push(format!("Lanes: {}", lanes));
            }
        }
        push_location(&mut parts, event.location.as_deref());
        if let Some(elapsed) = record
            .last_updated
            .as_deref()
            .and_then(|ts| self.elapsed_since(ts, now))
        {
            parts.push(format!("[{} ago]", elapsed));
        }
        parts.join(" ")
    }

    /// `<EVENT_TYPE>: <roadway> (<dir>) @ <location>`
    pub fn format_event(&self, event: &LocatedEvent) -> String {
        let record = &event.record;
        let kind = non_empty(record.event_type.as_deref()).unwrap_or("Event");
        let mut parts = vec![format!(
            "{}: {}",
            kind.to_uppercase(),
            roadway(record.roadway_name.as_deref())
        )];
        push_direction(&mut parts, record.direction_of_travel.as_deref());
        push_location(&mut parts, event.location.as_deref());
        parts.join(" ")
    }

    /// `ALERT: <message> (<region/region>) until <end>`; `ALERT!:` when flagged important.
    pub fn format_alert(&self, alert: &AlertRecord) -> String {
        let prefix = if alert.high_importance { "ALERT!:" } else { "ALERT:" };
        let message = alert.message.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut parts = vec![prefix.to_string()];
        if !message.is_empty() {
            parts.push(message);
        }
        let regions: Vec<&str> = alert
            .regions
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .collect();
        if !regions.is_empty() {
            parts.push(format!("({})", regions.join("/")));
        }
        if let Some(end) = non_empty(alert.end_time.as_deref()) {
            parts.push(format!("until {}", end));
        }
        parts.join(" ")
    }
}

/// Summary line sent ahead of alert details.
pub fn alert_summary(total: usize, shown: usize) -> String {
    if total > shown {
        format!("Found {} alerts (showing {})", total, shown)
    } else {
        format!("Found {} alert(s)", total)
    }
}

pub fn format_elapsed_secs(secs: i64) -> String {
    let secs = secs.max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{}h{}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn roadway(value: Option<&str>) -> &str {
    non_empty(value).unwrap_or(UNKNOWN_ROAD)
}

fn push_direction(parts: &mut Vec<String>, direction: Option<&str>) {
    if let Some(dir) = non_empty(direction) {
        parts.push(format!("({})", dir));
    }
}

fn push_location(parts: &mut Vec<String>, location: Option<&str>) {
    if let Some(loc) = non_empty(location) {
        parts.push(format!("@ {}", loc));
    }
}
