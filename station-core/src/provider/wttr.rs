use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::model::{NewExternalWeather, round1};

use super::ExternalWeatherProvider;

const NO_DATA: &str = "Нет данных";

/// Current conditions from wttr.in (`?format=j1`).
#[derive(Debug, Clone)]
pub struct WttrProvider {
    base_url: String,
    http: Client,
}

impl WttrProvider {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for wttr.in")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WttrValue {
    value: String,
}

#[derive(Debug, Deserialize)]
struct WttrCondition {
    #[serde(rename = "FeelsLikeC")]
    feels_like_c: String,
    #[serde(rename = "precipMM")]
    precip_mm: String,
    #[serde(rename = "uvIndex")]
    uv_index: String,
    #[serde(rename = "windspeedKmph")]
    windspeed_kmph: String,
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<WttrValue>,
    #[serde(default)]
    lang_ru: Vec<WttrValue>,
}

#[derive(Debug, Deserialize)]
struct WttrResponse {
    current_condition: Vec<WttrCondition>,
}

#[async_trait]
impl ExternalWeatherProvider for WttrProvider {
    async fn fetch_current(&self, lat: f64, lon: f64) -> Result<NewExternalWeather> {
        let url = format!("{}/{lat},{lon}", self.base_url);
        debug!(%url, "requesting wttr.in");

        let res = self
            .http
            .get(&url)
            .query(&[("format", "j1"), ("lang", "ru")])
            .send()
            .await
            .context("Failed to send request to wttr.in")?;

        let status = res.status();
        let body = res
            .text()
            .await
            .context("Failed to read wttr.in response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "wttr.in request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        parse_current(&body)
    }
}

/// Map a `j1` document to the external weather row.
pub(crate) fn parse_current(body: &str) -> Result<NewExternalWeather> {
    let parsed: WttrResponse =
        serde_json::from_str(body).context("Failed to parse wttr.in JSON")?;

    let current = parsed
        .current_condition
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("wttr.in response contained no current condition"))?;

    let non_blank = |values: &[WttrValue]| {
        values
            .first()
            .map(|v| v.value.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let description = non_blank(&current.lang_ru)
        .or_else(|| non_blank(&current.weather_desc))
        .unwrap_or_else(|| NO_DATA.to_string());

    let wind_kmph = number("windspeedKmph", &current.windspeed_kmph)?;

    Ok(NewExternalWeather {
        weather_description: description,
        temperature_feels_like: number("FeelsLikeC", &current.feels_like_c)?,
        precipitation: number("precipMM", &current.precip_mm)?,
        uv_index: number("uvIndex", &current.uv_index)?,
        wind_speed: round1(wind_kmph / 3.6),
    })
}

fn number(field: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse()
        .with_context(|| format!("wttr.in field {field} is not a number: '{raw}'"))
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
