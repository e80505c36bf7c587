//! # roadmesh
//!
//! Relays Arizona 511 roadway information onto a Meshtastic mesh. Mesh users
//! send short text commands on a channel and the relay answers with compact,
//! chunked summaries of accidents, events, alerts and current weather.
//!
//! ## Modules
//!
//! - [`config`] - TOML configuration, environment overrides, validation
//! - [`traffic`] - AZ511 client and the normalized event/alert records
//! - [`geocode`] - reverse geocoding (Nominatim with a coordinate fallback)
//! - [`relay`] - command grammar, formatting, dedup, chunking, the outbound
//!   sender and the listener loop
//! - [`meshtastic`] - serial/TCP radio link speaking the framed protobuf API
//! - [`metrics`] - process-wide counters reported at shutdown
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roadmesh::config::Config;
//! use roadmesh::geocode::CoordinateGeocoder;
//! use roadmesh::relay::format::EventFormatter;
//! use roadmesh::relay::listener;
//! use roadmesh::meshtastic::MeshtasticConnector;
//! use roadmesh::traffic::az511::Az511Client;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut config = Config::load_or_default("roadmesh.toml").await?;
//! config.apply_env()?;
//! config.validate()?;
//! let traffic = Arc::new(Az511Client::new(&config.traffic, EventFormatter::new(&config.region)?));
//! let connector = MeshtasticConnector::new(&config.meshtastic);
//! let handle = listener::spawn(&config, &connector, traffic, Arc::new(CoordinateGeocoder)).await?;
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod geocode;
pub mod logutil;
#[cfg(feature = "meshtastic-proto")]
pub mod meshtastic;
pub mod metrics;
pub mod protobuf;
pub mod relay;
pub mod traffic;
