use crate::{
    Config, StationError, Store,
    error::Result,
    model::{NewExternalWeather, WeatherUploadRequest},
    provider::wttr::WttrProvider,
    settings::{LATITUDE, LONGITUDE},
};
use async_trait::async_trait;
use std::{fmt::Debug, time::Duration};
use tracing::{info, warn};

pub mod wttr;

/// Source of current conditions at the station coordinates.
#[async_trait]
pub trait ExternalWeatherProvider: Send + Sync + Debug {
    async fn fetch_current(&self, lat: f64, lon: f64) -> anyhow::Result<NewExternalWeather>;
}

/// Construct the configured provider.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Box<dyn ExternalWeatherProvider>> {
    let provider = WttrProvider::new(
        config.weather_base_url.clone(),
        Duration::from_secs(config.weather_timeout_secs),
    )?;
    Ok(Box::new(provider))
}

/// Read the station coordinates from the settings table.
pub fn station_coordinates(store: &Store) -> Result<(f64, f64)> {
    let coordinate = |key: &str| -> Result<f64> {
        store.require_setting(key)?.as_f64().ok_or_else(|| {
            StationError::InvalidInput(format!("setting '{key}' must be a number"))
        })
    };
    Ok((coordinate(LATITUDE)?, coordinate(LONGITUDE)?))
}

/// Fetch current conditions for the station coordinates.
pub async fn fetch_external_weather(
    store: &Store,
    provider: &dyn ExternalWeatherProvider,
) -> Result<NewExternalWeather> {
    let (lat, lon) = station_coordinates(store)?;
    provider
        .fetch_current(lat, lon)
        .await
        .map_err(|e| StationError::Upstream(format!("{e:#}")))
}

/// Handle one upload from the station: store the sensor readings, then fetch
/// and store the external weather. The readings stay stored when the external
/// fetch fails; the failure is still returned to the caller.
pub async fn new_data_logic(
    store: &Store,
    provider: &dyn ExternalWeatherProvider,
    payload: &WeatherUploadRequest,
) -> Result<()> {
    payload.validate()?;
    let (central_id, outdoor_id) = store.insert_sensor_data(payload)?;

    let external = match fetch_external_weather(store, provider).await {
        Ok(external) => external,
        Err(e) => {
            warn!(central_id, outdoor_id, error = %e, "external weather not stored");
            return Err(e);
        }
    };

    let external_id = store.save_external_weather(&external)?;
    info!(central_id, outdoor_id, external_id, "upload processed");
    Ok(())
}
