//! OpenStreetMap Nominatim reverse geocoder.
//!
//! Nominatim's usage policy allows one request per second with an
//! identifying User-Agent. Requests are serialized through `last_request`
//! and answers are cached per ~11 m cell, up to [`CELL_CACHE_MAX`] cells
//! with the earliest-cached cell evicted first.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{timeout, Instant};

use super::{coordinate_text, ReverseGeocoder};
use crate::config::GeocodingConfig;

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: Option<Address>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Address {
    road: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    suburb: Option<String>,
    county: Option<String>,
}

type CellKey = (i64, i64);

pub const CELL_CACHE_MAX: usize = 4096;

/// Insertion-ordered place cache.
struct CellCache {
    places: HashMap<CellKey, String>,
    order: VecDeque<CellKey>,
    capacity: usize,
}

impl CellCache {
    fn new(capacity: usize) -> Self {
        Self {
            places: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &CellKey) -> Option<String> {
        self.places.get(key).cloned()
    }

    fn insert(&mut self, key: CellKey, place: String) {
        if self.places.insert(key, place).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.places.len() > self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.places.remove(&old);
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.places.len()
    }
}

fn cell(latitude: f64, longitude: f64) -> CellKey {
    (
        (latitude * 10_000.0).round() as i64,
        (longitude * 10_000.0).round() as i64,
    )
}

pub struct NominatimGeocoder {
    client: reqwest::Client,
    config: GeocodingConfig,
    last_request: Arc<tokio::sync::Mutex<Option<Instant>>>,
    cache: Mutex<CellCache>,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
            last_request: Arc::new(tokio::sync::Mutex::new(None)),
            cache: Mutex::new(CellCache::new(CELL_CACHE_MAX)),
        }
    }

    /// Hold the request slot, sleeping out the remainder of the minimum interval.
    async fn enforce_rate_limit(&self) -> tokio::sync::MutexGuard<'_, Option<Instant>> {
        let mut last_request = self.last_request.lock().await;
        let min_interval = Duration::from_millis(self.config.min_interval_ms);
        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                let wait = min_interval - elapsed;
                debug!("Nominatim rate limit: sleeping {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
        }
        *last_request = Some(Instant::now());
        last_request
    }

    fn cached(&self, key: &CellKey) -> Option<String> {
        self.cache.lock().ok().and_then(|c| c.get(key))
    }

    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<String> {
        // Keep the slot held for the whole request so calls never overlap.
        let _slot = self.enforce_rate_limit().await;

        let url = format!("{}/reverse", self.config.base_url.trim_end_matches('/'));
        let params = [
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("format", "json".to_string()),
            ("addressdetails", "1".to_string()),
            ("zoom", "17".to_string()),
        ];
        let request = self
            .client
            .get(&url)
            .query(&params)
            .header("User-Agent", &self.config.user_agent)
            .send();

        let response = timeout(Duration::from_secs(self.config.timeout_seconds), request)
            .await
            .map_err(|_| anyhow!("Request timeout after {}s", self.config.timeout_seconds))?
            .map_err(|e| anyhow!("Failed to send reverse geocoding request: {}", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(anyhow!(
                "Nominatim request forbidden (403), possible rate limit violation"
            ));
        }
        if !status.is_success() {
            return Err(anyhow!("Nominatim request failed with status: {}", status));
        }

        let body: ReverseResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse reverse geocoding response: {}", e))?;
        short_place(&body).ok_or_else(|| anyhow!("No address in Nominatim response"))
    }
}

/// `road, city` from the address parts, else the first two parts of display_name.
fn short_place(body: &ReverseResponse) -> Option<String> {
    let address = body.address.as_ref();
    let road = address.and_then(|a| a.road.clone());
    let city = address.and_then(|a| {
        a.city
            .clone()
            .or_else(|| a.town.clone())
            .or_else(|| a.village.clone())
            .or_else(|| a.suburb.clone())
            .or_else(|| a.county.clone())
    });
    match (road, city) {
        (Some(r), Some(c)) => Some(format!("{}, {}", r, c)),
        (Some(r), None) => Some(r),
        (None, Some(c)) => Some(c),
        (None, None) => body.display_name.as_deref().and_then(|d| {
            let short = d
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .take(2)
                .collect::<Vec<_>>()
                .join(", ");
            (!short.is_empty()).then_some(short)
        }),
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> String {
        if !latitude.is_finite() || !longitude.is_finite() {
            return coordinate_text(latitude, longitude);
        }
        let key = cell(latitude, longitude);
        if let Some(hit) = self.cached(&key) {
            return hit;
        }
        match self.lookup(latitude, longitude).await {
            Ok(place) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(key, place.clone());
                }
                place
            }
            Err(e) => {
                warn!("Reverse geocoding ({:.4}, {:.4}) failed: {}", latitude, longitude, e);
                coordinate_text(latitude, longitude)
            }
        }
    }
}
