//! Roadway event data.
//!
//! [`TrafficSource`] is the collaborator the relay queries. Implementations
//! swallow their own failures: a broken upstream looks like "nothing found".

pub mod az511;

use async_trait::async_trait;

pub use az511::Az511Client;

/// One roadway event, already mapped out of the upstream JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    pub id: String,
    pub organization: Option<String>,
    pub roadway_name: Option<String>,
    pub direction_of_travel: Option<String>,
    pub description: Option<String>,
    pub lanes_affected: Option<String>,
    pub event_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Local display time (`YYYY-MM-DD HH:MM:SS MST`).
    pub reported: Option<String>,
    pub last_updated: Option<String>,
}

impl EventRecord {
    pub fn is_accident(&self) -> bool {
        self.event_type
            .as_deref()
            .map(|t| t.to_ascii_lowercase().contains("accident"))
            .unwrap_or(false)
    }

    /// Case-insensitive substring match on roadway, description and organization.
    pub fn matches_location(&self, location: &str) -> bool {
        let needle = location.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [&self.roadway_name, &self.description, &self.organization]
            .iter()
            .filter_map(|f| f.as_deref())
            .any(|hay| hay.to_lowercase().contains(&needle))
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertRecord {
    pub message: String,
    pub notes: Option<String>,
    pub regions: Vec<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub high_importance: bool,
}

impl AlertRecord {
    /// Case-insensitive substring match on message, notes and regions.
    pub fn matches(&self, filter: &str) -> bool {
        let needle = filter.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.message.to_lowercase().contains(&needle)
            || self
                .notes
                .as_deref()
                .map(|n| n.to_lowercase().contains(&needle))
                .unwrap_or(false)
            || self
                .regions
                .iter()
                .any(|r| r.to_lowercase().contains(&needle))
    }
}

/// Never fails: on any upstream error, log and return an empty list.
#[async_trait]
pub trait TrafficSource: Send + Sync {
    async fn fetch_accidents(&self, location: Option<&str>) -> Vec<EventRecord>;
    async fn fetch_events(&self, location: Option<&str>) -> Vec<EventRecord>;
    async fn fetch_alerts(&self) -> Vec<AlertRecord>;
}
