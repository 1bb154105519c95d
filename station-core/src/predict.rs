//! One-shot weather prediction from the latest central reading.
//!
//! The model is a standard scaler followed by a two-output linear regression:
//! output 0 is the temperature expected a few hours ahead, output 1 a rain
//! score thresholded at 0.5.

use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::debug;

use crate::{
    StationError, Store,
    error::Result,
    model::{WeatherPredictionResponse, round1},
};

/// Feature order the model was fitted with.
pub const FEATURES: [&str; 6] = [
    "temperature",
    "humidity",
    "pressure_mmhg",
    "month",
    "hour",
    "day_of_month",
];

const BUILTIN_MODEL: &str = include_str!("../assets/weather_model.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionModel {
    #[serde(default)]
    pub features: Vec<String>,
    pub mean: [f64; 6],
    pub scale: [f64; 6],
    pub coef: [[f64; 6]; 2],
    pub intercept: [f64; 2],
}

impl RegressionModel {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let model: RegressionModel =
            serde_json::from_str(json).context("Failed to parse regression model JSON")?;
        model.check()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model file: {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid model file: {}", path.display()))
    }

    /// The model shipped with the crate.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_json(BUILTIN_MODEL)
    }

    fn check(&self) -> anyhow::Result<()> {
        if !self.features.is_empty() && self.features != FEATURES {
            return Err(anyhow!(
                "model features {:?} do not match expected {:?}",
                self.features,
                FEATURES
            ));
        }

        let mut all = self
            .mean
            .iter()
            .chain(&self.scale)
            .chain(self.coef.iter().flatten())
            .chain(&self.intercept);
        if all.any(|v| !v.is_finite()) {
            return Err(anyhow!("model contains non-finite parameters"));
        }
        Ok(())
    }

    /// Raw model outputs for one feature vector.
    pub fn infer(&self, features: [f64; 6]) -> [f64; 2] {
        let scaled: Vec<f64> = features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                // a constant feature was fitted with zero variance
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                (x - mean) / scale
            })
            .collect();

        let mut out = self.intercept;
        for (y, row) in out.iter_mut().zip(&self.coef) {
            *y += row.iter().zip(&scaled).map(|(w, x)| w * x).sum::<f64>();
        }
        out
    }

    pub fn predict(
        &self,
        temperature: f64,
        humidity: f64,
        pressure_mmhg: f64,
        timestamp: DateTime<Utc>,
    ) -> WeatherPredictionResponse {
        let features = [
            temperature,
            humidity,
            pressure_mmhg,
            f64::from(timestamp.month()),
            f64::from(timestamp.hour()),
            f64::from(timestamp.day()),
        ];
        let [temp, rain] = self.infer(features);
        debug!(?features, temp, rain, "model inference");

        WeatherPredictionResponse {
            predicted_temp: round1(temp),
            predicted_rain: rain >= 0.5,
        }
    }
}

/// Predict from the newest central reading.
pub fn weather_prediction(store: &Store, model: &RegressionModel) -> Result<WeatherPredictionResponse> {
    let last = store
        .last_central()?
        .ok_or_else(|| StationError::NotFound("No data available in the central table".into()))?;

    Ok(model.predict(last.temperature, last.humidity, last.pressure, last.created_at))
}
