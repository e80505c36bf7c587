//! One-shot query mode: a single fetch cycle printed to stdout or put on air.
//!
//! Unlike the listener this has no result cap; every unique record is emitted.

use anyhow::Result;
use chrono::Utc;
use log::info;

use crate::config::Config;
use crate::geocode::ReverseGeocoder;
use crate::metrics;
use crate::relay::commands::{normalize_interstate, CommandKind};
use crate::relay::dedup::{dedup_by_key, DedupKey};
use crate::relay::format::EventFormatter;
use crate::relay::sender::OutboundSender;
use crate::relay::LocatedEvent;
use crate::traffic::{EventRecord, TrafficSource};

const RULE_WIDTH: usize = 60;

/// Where query output goes.
pub enum QueryOutput<'a> {
    Console,
    Radio(&'a OutboundSender),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueryReport {
    pub fetched: usize,
    pub emitted: usize,
    pub duplicates: usize,
}

/// `all` (any case) or an empty string means no filter.
pub fn location_filter(location: &str) -> Option<String> {
    let trimmed = location.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(normalize_interstate(trimmed))
    }
}

async fn locate(geocoder: &dyn ReverseGeocoder, records: Vec<EventRecord>) -> Vec<LocatedEvent> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let location = match record.coordinates() {
            Some((lat, lon)) => Some(geocoder.reverse(lat, lon).await),
            None => None,
        };
        out.push(LocatedEvent::new(record, location));
    }
    out
}

/// Fetch, filter, dedup and format one cycle's messages.
pub async fn collect_messages(
    config: &Config,
    traffic: &dyn TrafficSource,
    geocoder: &dyn ReverseGeocoder,
    kind: CommandKind,
    location: &str,
) -> Result<(Vec<String>, QueryReport)> {
    let formatter = EventFormatter::new(&config.region)?;
    let filter = location_filter(location);
    let mut report = QueryReport::default();

    let messages = match kind {
        CommandKind::Accidents => {
            let records = traffic.fetch_accidents(filter.as_deref()).await;
            report.fetched = records.len();
            if records.is_empty() {
                vec!["No accidents found".to_string()]
            } else {
                let located = locate(geocoder, records).await;
                let (unique, stats) = dedup_by_key(located, DedupKey::accident);
                report.duplicates = stats.skipped;
                let now = Utc::now();
                unique
                    .iter()
                    .map(|e| formatter.format_accident(e, now))
                    .collect()
            }
        }
        CommandKind::Events => {
            let all = traffic.fetch_events(filter.as_deref()).await;
            let total = all.len();
            let records: Vec<EventRecord> = all.into_iter().filter(|r| !r.is_accident()).collect();
            info!(
                "Retrieved {} events (filtered out {} accidents)",
                records.len(),
                total - records.len()
            );
            report.fetched = records.len();
            if records.is_empty() {
                vec!["No events found".to_string()]
            } else {
                let located = locate(geocoder, records).await;
                let (unique, stats) = dedup_by_key(located, DedupKey::event);
                report.duplicates = stats.skipped;
                unique.iter().map(|e| formatter.format_event(e)).collect()
            }
        }
        CommandKind::Alerts => {
            let alerts: Vec<_> = traffic
                .fetch_alerts()
                .await
                .into_iter()
                .filter(|a| filter.as_deref().map(|f| a.matches(f)).unwrap_or(true))
                .collect();
            report.fetched = alerts.len();
            if alerts.is_empty() {
                vec!["No alerts found".to_string()]
            } else {
                alerts.iter().map(|a| formatter.format_alert(a)).collect()
            }
        }
        CommandKind::Weather => {
            #[cfg(feature = "weather")]
            let reply = crate::relay::weather::WeatherService::new(config.weather.clone())
                .fetch_weather_for_location(location.trim())
                .await;
            #[cfg(not(feature = "weather"))]
            let reply = "Weather service is disabled".to_string();
            vec![reply]
        }
    };

    if report.duplicates > 0 {
        info!("Skipped {} duplicate {}", report.duplicates, kind);
        metrics::add_duplicates_skipped(report.duplicates as u64);
    }
    report.emitted = messages.len();
    Ok((messages, report))
}

/// Run one cycle and deliver it.
pub async fn run_query(
    config: &Config,
    traffic: &dyn TrafficSource,
    geocoder: &dyn ReverseGeocoder,
    kind: CommandKind,
    location: &str,
    output: QueryOutput<'_>,
) -> Result<QueryReport> {
    info!(
        "One-shot {} query for {}",
        kind,
        location_filter(location).as_deref().unwrap_or("all locations")
    );
    let (messages, report) = collect_messages(config, traffic, geocoder, kind, location).await?;

    match output {
        QueryOutput::Console => {
            let rule = "=".repeat(RULE_WIDTH);
            for message in &messages {
                println!("\n{}\n{}\n{}\n", rule, message, rule);
            }
        }
        QueryOutput::Radio(sender) => {
            for message in &messages {
                info!("Sending message: {}", message);
                sender.send(message).await;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_and_blank_mean_unfiltered() {
        assert_eq!(location_filter("ALL"), None);
        assert_eq!(location_filter("  "), None);
        assert_eq!(location_filter("i10").as_deref(), Some("I-10"));
    }
}
