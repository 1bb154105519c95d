use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

/// Process configuration stored on disk as TOML.
///
/// Runtime settings that the station owner edits through the API (coordinates,
/// bot token, ...) live in the database instead, see [`crate::settings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host the server binds to, given as a URL, e.g. "http://0.0.0.0".
    pub app_host: String,
    pub app_port: u16,

    /// Prefix mounted in front of every REST route.
    pub path_prefix: String,

    /// SQLite database file, or ":memory:".
    pub database_path: String,

    /// JSON regression model. The built-in model is used when unset.
    pub model_path: Option<String>,

    /// Example TOML:
    /// weather_base_url = "http://wttr.in"
    pub weather_base_url: String,
    pub weather_timeout_secs: u64,

    /// Tracing filter used when RUST_LOG is not set.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_host: "http://0.0.0.0".to_string(),
            app_port: 8080,
            path_prefix: "/api/v1".to_string(),
            database_path: "station.db".to_string(),
            model_path: None,
            weather_base_url: "http://wttr.in".to_string(),
            weather_timeout_secs: 10,
            log_filter: None,
        }
    }
}

impl Config {
    /// Load config from disk (or defaults if the file doesn't exist yet), then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;

        let mut cfg = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        cfg.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    /// Deployment environment name from `ENV`, `local` when unset or blank.
    pub fn environment() -> String {
        environment_from(|key| env::var(key).ok())
    }

    /// Override fields from environment-style variables. `lookup` is injected
    /// so the override logic can be exercised without touching the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("APP_HOST") {
            self.app_host = host;
        }
        if let Some(port) = lookup("APP_PORT") {
            self.app_port = port
                .parse()
                .with_context(|| format!("APP_PORT is not a valid port: {port}"))?;
        }
        if let Some(prefix) = lookup("PATH_PREFIX") {
            self.path_prefix = prefix;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database_path = path;
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.model_path = Some(path);
        }
        Ok(())
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file. `STATION_CONFIG` wins over the platform directory.
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = env::var("STATION_CONFIG") {
            return Ok(PathBuf::from(path));
        }

        let dirs = ProjectDirs::from("dev", "weather-station", "station")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Socket address string the HTTP server binds to.
    pub fn bind_addr(&self) -> Result<String> {
        let authority = hostname_of(&self.app_host)?;
        // drop any port carried by app_host; app_port is authoritative
        let host = Url::parse(&format!("http://{authority}"))
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or(authority);
        Ok(format!("{host}:{}", self.app_port))
    }

    /// Prefix normalised to start with a slash and carry no trailing slash.
    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.path_prefix.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}

/// Extract the authority (`host[:port]`) from a URL.
///
/// Input without a scheme is taken to already be a host and is returned as-is.
pub fn hostname_of(url: &str) -> Result<String> {
    if !url.contains("://") {
        return Ok(url.to_string());
    }

    let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("URL has no host: {url}"))?;

    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn environment_from<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("ENV")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "local".to_string())
}
