//! Bridge from the GeoSphere Austria TAWES station feed to Home Assistant.
//!
//! Each run downloads the semicolon separated feed, picks one station's row,
//! maps the configured columns to sensor fields and publishes Home Assistant
//! MQTT discovery configs plus one aggregated state message.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod mapper;
pub mod models;
pub mod mqtt;
pub mod scheduler;
