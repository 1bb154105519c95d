//! Core library for the home weather station backend.
//!
//! This crate defines:
//! - Configuration handling
//! - SQLite storage of sensor readings, external weather and settings
//! - The external weather provider abstraction (wttr.in)
//! - Time-series aggregation and SVG charts
//! - Regression-based weather prediction
//! - Database backups
//!
//! It is used by `station-server`, which exposes it over REST and Telegram.

pub mod backup;
pub mod config;
pub mod error;
pub mod model;
pub mod plot;
pub mod predict;
pub mod provider;
pub mod series;
pub mod settings;
pub mod store;

pub use config::{Config, hostname_of};
pub use error::StationError;
pub use model::{WeatherCurrentResponse, WeatherPredictionResponse, WeatherUploadRequest};
pub use predict::RegressionModel;
pub use provider::{ExternalWeatherProvider, provider_from_config};
pub use series::{Metric, SensorInterval};
pub use store::Store;

/// Combine the newest rows of every table, or report which one is empty.
pub fn current_weather(store: &Store) -> error::Result<WeatherCurrentResponse> {
    let last = store.last_data_for_sensors()?;
    let missing = |table: &str| StationError::NotFound(format!("No data available in the {table} table"));

    Ok(WeatherCurrentResponse {
        central: last.central.ok_or_else(|| missing("central"))?,
        outdoor: last.outdoor.ok_or_else(|| missing("outdoor"))?,
        external_weather: last
            .external_weather
            .ok_or_else(|| missing("external_weather"))?,
    })
}
