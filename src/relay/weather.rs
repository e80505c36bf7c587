//! Current conditions for the `weather <location>` command.
//!
//! Backed by the OpenWeatherMap current-weather endpoint. Answers are cached
//! per location for `cache_ttl_minutes`; when a refresh fails, a cached answer
//! up to two hours old is returned with a `(cached)` tag.

use anyhow::{anyhow, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::WeatherConfig;

const API_BASE: &str = "https://api.openweathermap.org/data/2.5/weather";
const STALE_LIMIT: Duration = Duration::from_secs(2 * 60 * 60);
/// Distinct locations kept; the oldest answer goes first.
const CACHE_MAX_ENTRIES: usize = 256;

/// OpenWeatherMap API response structures
#[derive(Debug, Deserialize)]
pub struct WeatherResponse {
    pub name: String,
    pub sys: WeatherSys,
    pub main: WeatherMain,
    pub weather: Vec<WeatherCondition>,
    pub wind: Option<WeatherWind>,
}

#[derive(Debug, Deserialize)]
pub struct WeatherSys {
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Deserialize)]
pub struct WeatherMain {
    pub temp: f64,
    pub humidity: i32,
}

#[derive(Debug, Deserialize)]
pub struct WeatherCondition {
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct WeatherWind {
    pub speed: f64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    data: String,
}

pub struct WeatherService {
    config: WeatherConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
    client: reqwest::Client,
}

impl WeatherService {
    pub fn new(config: WeatherConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
            client: reqwest::Client::new(),
        }
    }

    /// Check if the service is properly configured
    pub fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.api_key.is_empty()
    }

    /// One-line conditions for `location`. Always produces a reply.
    pub async fn fetch_weather_for_location(&self, location: &str) -> String {
        if !self.config.enabled {
            debug!("Weather service is disabled");
            return "Weather service is disabled".to_string();
        }
        if self.config.api_key.is_empty() {
            warn!("OpenWeatherMap API key not configured");
            return "Weather: API key not configured".to_string();
        }

        let key = location.trim().to_lowercase();
        let ttl = Duration::from_secs(self.config.cache_ttl_minutes as u64 * 60);
        if let Some(entry) = self.cache.lock().await.get(&key) {
            let age = entry.fetched_at.elapsed();
            if age < ttl {
                debug!(
                    "Returning cached weather for {} (age: {:.1}min)",
                    location,
                    age.as_secs_f64() / 60.0
                );
                return entry.data.clone();
            }
        }

        match self.fetch_from_api(location).await {
            Ok(response) => {
                let formatted = format_weather_response(&response);
                insert_bounded(
                    &mut *self.cache.lock().await,
                    key,
                    CacheEntry {
                        fetched_at: Instant::now(),
                        data: formatted.clone(),
                    },
                    CACHE_MAX_ENTRIES,
                );
                debug!("Weather fetched successfully for {}", location);
                formatted
            }
            Err(e) => {
                warn!("Failed to fetch weather for {}: {}", location, e);
                if let Some(entry) = self.cache.lock().await.get(&key) {
                    if entry.fetched_at.elapsed() < STALE_LIMIT {
                        return format!("{} (cached)", entry.data);
                    }
                }
                "Weather: Unable to fetch current conditions".to_string()
            }
        }
    }

    async fn fetch_from_api(&self, location: &str) -> Result<WeatherResponse> {
        let url = self.build_api_url(location)?;
        let timeout_duration = Duration::from_secs(self.config.timeout_seconds as u64);

        let response = timeout(timeout_duration, self.client.get(&url).send())
            .await
            .map_err(|_| anyhow!("Request timeout after {}s", self.config.timeout_seconds))?
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("API returned status: {}", response.status()));
        }

        response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse JSON response: {}", e))
    }

    /// Build the API URL based on location type
    pub fn build_api_url(&self, location: &str) -> Result<String> {
        let api_key = &self.config.api_key;
        let with_country = || match &self.config.country_code {
            Some(country) => format!("{},{}", location, country),
            None => location.to_string(),
        };

        match self.config.location_type.as_str() {
            "city" => Ok(format!(
                "{}?q={}&appid={}&units=imperial",
                API_BASE,
                urlencoding::encode(&with_country()),
                api_key
            )),
            "zipcode" => Ok(format!(
                "{}?zip={}&appid={}&units=imperial",
                API_BASE,
                urlencoding::encode(&with_country()),
                api_key
            )),
            "city_id" => Ok(format!(
                "{}?id={}&appid={}&units=imperial",
                API_BASE,
                urlencoding::encode(location),
                api_key
            )),
            _ => Err(anyhow!("Invalid location_type: {}", self.config.location_type)),
        }
    }
}

/// `Weather: Phoenix, US: Clear Sky 98°F 12% wind 7mph`
pub fn format_weather_response(response: &WeatherResponse) -> String {
    let location = if response.sys.country.is_empty() {
        response.name.clone()
    } else {
        format!("{}, {}", response.name, response.sys.country)
    };
    let condition = response
        .weather
        .first()
        .map(|w| title_case(&w.description))
        .unwrap_or_else(|| "Unknown".to_string());

    let mut out = format!(
        "Weather: {}: {} {:.0}°F {}%",
        location, condition, response.main.temp, response.main.humidity
    );
    if let Some(wind) = &response.wind {
        out.push_str(&format!(" wind {:.0}mph", wind.speed));
    }
    out
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Insert, dropping answers too old to serve even as `(cached)` and then
/// the oldest ones until the map fits in `max`.
fn insert_bounded(
    cache: &mut HashMap<String, CacheEntry>,
    key: String,
    entry: CacheEntry,
    max: usize,
) {
    cache.retain(|_, e| e.fetched_at.elapsed() < STALE_LIMIT);
    cache.insert(key, entry);
    while cache.len() > max.max(1) {
        let oldest = cache
            .iter()
            .min_by_key(|(_, e)| e.fetched_at)
            .map(|(k, _)| k.clone());
        match oldest {
            Some(k) => {
                cache.remove(&k);
            }
            None => break,
        }
    }
}
