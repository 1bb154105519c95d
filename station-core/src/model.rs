use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{StationError, error::Result, settings::SettingType};

/// Row of the `central` table: the indoor unit with air-quality sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentralReading {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// Celsius
    pub temperature: f64,
    /// Percent
    pub humidity: f64,
    /// mmHg
    pub pressure: f64,
    /// ppm
    pub co2: i64,
    /// ppb
    pub tvoc: i64,
}

/// Row of the `outdoor` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutdoorReading {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

/// Row of the `external_weather` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalWeather {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub weather_description: String,
    pub temperature_feels_like: f64,
    /// mm
    pub precipitation: f64,
    pub uv_index: f64,
    /// m/s
    pub wind_speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCentral {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub co2: i64,
    pub tvoc: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutdoor {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExternalWeather {
    pub weather_description: String,
    pub temperature_feels_like: f64,
    pub precipitation: f64,
    pub uv_index: f64,
    pub wind_speed: f64,
}

/// Body of `POST /weather/upload`, sent by the station firmware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherUploadRequest {
    pub central: NewCentral,
    pub outdoor: NewOutdoor,
}

impl WeatherUploadRequest {
    pub fn validate(&self) -> Result<()> {
        check_climate("central", self.central.temperature, self.central.humidity, self.central.pressure)?;
        check_climate("outdoor", self.outdoor.temperature, self.outdoor.humidity, self.outdoor.pressure)?;

        if self.central.co2 < 0 || self.central.tvoc < 0 {
            return Err(StationError::InvalidInput(
                "central.co2 and central.tvoc must not be negative".into(),
            ));
        }
        Ok(())
    }
}

fn check_climate(sensor: &str, temperature: f64, humidity: f64, pressure: f64) -> Result<()> {
    if !(temperature.is_finite() && humidity.is_finite() && pressure.is_finite()) {
        return Err(StationError::InvalidInput(format!(
            "{sensor}: readings must be finite numbers"
        )));
    }
    if !(0.0..=100.0).contains(&humidity) {
        return Err(StationError::InvalidInput(format!(
            "{sensor}.humidity must be within 0..=100, got {humidity}"
        )));
    }
    if pressure <= 0.0 {
        return Err(StationError::InvalidInput(format!(
            "{sensor}.pressure must be positive, got {pressure}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherCurrentResponse {
    pub central: CentralReading,
    pub outdoor: OutdoorReading,
    pub external_weather: ExternalWeather,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherPredictionResponse {
    pub predicted_temp: f64,
    pub predicted_rain: bool,
}

/// One element of the `PATCH /settings` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingPatch {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<SettingType>,
}

/// Stored setting as listed by `GET /settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: SettingType,
}

/// Round to one decimal, the precision the station tables keep.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> WeatherUploadRequest {
        WeatherUploadRequest {
            central: NewCentral {
                temperature: 22.4,
                humidity: 41.0,
                pressure: 748.2,
                co2: 612,
                tvoc: 35,
            },
            outdoor: NewOutdoor {
                temperature: -3.5,
                humidity: 87.0,
                pressure: 747.9,
            },
        }
    }

    #[test]
    fn valid_upload_passes() {
        assert!(upload().validate().is_ok());
    }

    #[test]
    fn humidity_out_of_range_is_rejected() {
        let mut req = upload();
        req.outdoor.humidity = 120.0;
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("outdoor.humidity"));
    }

    #[test]
    fn negative_co2_is_rejected() {
        let mut req = upload();
        req.central.co2 = -1;
        assert!(matches!(req.validate(), Err(StationError::InvalidInput(_))));
    }

    #[test]
    fn nan_reading_is_rejected() {
        let mut req = upload();
        req.central.temperature = f64::NAN;
        assert!(req.validate().is_err());
    }

    #[test]
    fn setting_patch_reads_type_field() {
        let patch: SettingPatch =
            serde_json::from_str(r#"{"key":"latitude","value":"55.75","type":"float"}"#).unwrap();
        assert_eq!(patch.kind, Some(SettingType::Float));

        let patch: SettingPatch = serde_json::from_str(r#"{"key":"latitude","value":null}"#).unwrap();
        assert_eq!(patch.value, None);
        assert_eq!(patch.kind, None);
    }

    #[test]
    fn round1_keeps_one_decimal() {
        assert_eq!(round1(4.25), 4.3);
        assert_eq!(round1(-3.14), -3.1);
    }
}
