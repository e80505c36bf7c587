//! Reverse geocoding for event coordinates.
//!
//! Best-effort only: every implementation returns *some* text, falling back to
//! the coordinates themselves.

pub mod nominatim;

use async_trait::async_trait;

pub use nominatim::NominatimGeocoder;

/// `"<lat>, <lon>"` with four decimal places (~11 m).
pub fn coordinate_text(latitude: f64, longitude: f64) -> String {
    format!("{:.4}, {:.4}", latitude, longitude)
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Human-readable place for a coordinate. Never fails.
    async fn reverse(&self, latitude: f64, longitude: f64) -> String;
}

/// Offline geocoder: always the coordinate text.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoordinateGeocoder;

#[async_trait]
impl ReverseGeocoder for CoordinateGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> String {
        coordinate_text(latitude, longitude)
    }
}
