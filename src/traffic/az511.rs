//! AZ511 v2 REST client.
//!
//! `GET {base}/get/event` and `GET {base}/get/alerts`, both keyed and JSON.
//! Upstream objects are PascalCase with loosely typed fields, so each element
//! is decoded on its own and bad elements are skipped instead of sinking the
//! whole response.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;

use super::{AlertRecord, EventRecord, TrafficSource};
use crate::config::TrafficConfig;
use crate::relay::format::EventFormatter;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct RawEvent {
    #[serde(rename = "ID")]
    id: Option<Value>,
    organization: Option<String>,
    roadway_name: Option<String>,
    direction_of_travel: Option<String>,
    description: Option<String>,
    lanes_affected: Option<String>,
    event_type: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    reported: Option<i64>,
    last_updated: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct RawAlert {
    message: Option<String>,
    notes: Option<String>,
    regions: Option<Vec<String>>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    high_importance: Option<bool>,
}

pub struct Az511Client {
    config: TrafficConfig,
    formatter: EventFormatter,
    client: reqwest::Client,
}

impl Az511Client {
    pub fn new(config: &TrafficConfig, formatter: EventFormatter) -> Self {
        Self {
            config: config.clone(),
            formatter,
            client: reqwest::Client::new(),
        }
    }

    pub fn build_url(&self, endpoint: &str) -> String {
        format!(
            "{}/get/{}?key={}&format=json",
            self.config.base_url.trim_end_matches('/'),
            endpoint,
            urlencoding::encode(&self.config.api_key)
        )
    }

    async fn fetch_array<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
        let url = self.build_url(endpoint);
        debug!("Fetching AZ511 {}", endpoint);

        let timeout_duration = Duration::from_secs(self.config.timeout_seconds);
        let response = timeout(timeout_duration, self.client.get(&url).send())
            .await
            .map_err(|_| anyhow!("Request timeout after {}s", self.config.timeout_seconds))?
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("API returned status: {}", response.status()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse JSON response: {}", e))?;
        Ok(decode_elements(endpoint, body))
    }

    fn map_event(&self, raw: RawEvent) -> EventRecord {
        EventRecord {
            id: match raw.id {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
            organization: raw.organization,
            roadway_name: raw.roadway_name,
            direction_of_travel: raw.direction_of_travel,
            description: raw.description,
            lanes_affected: raw.lanes_affected,
            event_type: raw.event_type,
            latitude: raw.latitude,
            longitude: raw.longitude,
            reported: raw.reported.and_then(|t| self.formatter.epoch_to_local(t)),
            last_updated: raw.last_updated.and_then(|t| self.formatter.epoch_to_local(t)),
        }
    }

    fn map_alert(&self, raw: RawAlert) -> AlertRecord {
        AlertRecord {
            message: raw.message.unwrap_or_default(),
            notes: raw.notes,
            regions: raw.regions.unwrap_or_default(),
            start_time: raw.start_time.and_then(|t| self.formatter.epoch_to_local(t)),
            end_time: raw.end_time.and_then(|t| self.formatter.epoch_to_local(t)),
            high_importance: raw.high_importance.unwrap_or(false),
        }
    }

    async fn events(&self) -> Vec<EventRecord> {
        match self.fetch_array::<RawEvent>("event").await {
            Ok(raw) => raw.into_iter().map(|r| self.map_event(r)).collect(),
            Err(e) => {
                warn!("AZ511 event fetch failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Decode each element of a JSON array independently.
fn decode_elements<T: DeserializeOwned>(endpoint: &str, body: Value) -> Vec<T> {
    let Value::Array(items) = body else {
        warn!("AZ511 {} response was not an array", endpoint);
        return Vec::new();
    };
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Skipping malformed AZ511 {} element: {}", endpoint, e);
                None
            }
        })
        .collect();
    if decoded.len() < total {
        warn!(
            "AZ511 {}: skipped {} of {} malformed elements",
            endpoint,
            total - decoded.len(),
            total
        );
    }
    decoded
}

fn filter_location(records: Vec<EventRecord>, location: Option<&str>) -> Vec<EventRecord> {
    match location {
        Some(loc) => records
            .into_iter()
            .filter(|r| r.matches_location(loc))
            .collect(),
        None => records,
    }
}

#[async_trait]
impl TrafficSource for Az511Client {
    async fn fetch_accidents(&self, location: Option<&str>) -> Vec<EventRecord> {
        let accidents: Vec<EventRecord> = self
            .events()
            .await
            .into_iter()
            .filter(EventRecord::is_accident)
            .collect();
        filter_location(accidents, location)
    }

    async fn fetch_events(&self, location: Option<&str>) -> Vec<EventRecord> {
        filter_location(self.events().await, location)
    }

    async fn fetch_alerts(&self) -> Vec<AlertRecord> {
        match self.fetch_array::<RawAlert>("alerts").await {
            Ok(raw) => raw.into_iter().map(|r| self.map_alert(r)).collect(),
            Err(e) => {
                warn!("AZ511 alert fetch failed: {}", e);
                Vec::new()
            }
        }
    }
}
