use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};

use crate::StationError;

pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const TELEGRAM_BOT_TOKEN: &str = "telegram_bot_token";
pub const TELEGRAM_WEBHOOK_URL: &str = "telegram_webhook_url";

/// Settings created on first start with an empty value, so they can be
/// patched through the API.
pub const DEFAULTS: &[(&str, SettingType)] = &[
    (LATITUDE, SettingType::Float),
    (LONGITUDE, SettingType::Float),
    (TELEGRAM_BOT_TOKEN, SettingType::Str),
    (TELEGRAM_WEBHOOK_URL, SettingType::Str),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Int,
    Float,
    Str,
    Bool,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::Int => "int",
            SettingType::Float => "float",
            SettingType::Str => "str",
            SettingType::Bool => "bool",
        }
    }

    /// Stored type names that are not recognised fall back to a string.
    pub fn from_stored(value: &str) -> Self {
        SettingType::try_from(value).unwrap_or(SettingType::Str)
    }
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for SettingType {
    type Error = StationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "int" => Ok(SettingType::Int),
            "float" => Ok(SettingType::Float),
            "str" => Ok(SettingType::Str),
            "bool" => Ok(SettingType::Bool),
            _ => Err(StationError::InvalidInput(format!(
                "Unknown setting type '{value}'. Supported types: int, float, str, bool."
            ))),
        }
    }
}

/// A setting value converted to its declared type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl SettingValue {
    pub fn parse(raw: &str, kind: SettingType) -> Result<Self, StationError> {
        let raw = raw.trim();
        match kind {
            SettingType::Int => raw.parse().map(SettingValue::Int).map_err(|_| {
                StationError::InvalidInput(format!("'{raw}' is not a valid int"))
            }),
            SettingType::Float => raw.parse().map(SettingValue::Float).map_err(|_| {
                StationError::InvalidInput(format!("'{raw}' is not a valid float"))
            }),
            SettingType::Bool => Ok(SettingValue::Bool(matches!(
                raw.to_lowercase().as_str(),
                "true" | "1" | "yes"
            ))),
            SettingType::Str => Ok(SettingValue::Str(raw.to_string())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Int(v) => Some(*v as f64),
            SettingValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Float(v) => write!(f, "{v}"),
            SettingValue::Str(v) => f.write_str(v),
            SettingValue::Bool(v) => write!(f, "{v}"),
        }
    }
}
