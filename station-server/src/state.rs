use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use station_core::{
    Config, ExternalWeatherProvider, RegressionModel, Store, provider_from_config,
};
use tokio::sync::OnceCell;
use tracing::info;

use crate::telegram::{TELEGRAM_API, TelegramClient};

/// Everything a request handler (REST or bot) needs.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub provider: Arc<dyn ExternalWeatherProvider>,
    pub model: Arc<RegressionModel>,
    /// Created on first use from the `telegram_bot_token` setting.
    pub bot: Arc<OnceCell<TelegramClient>>,
    pub telegram_api: String,
    pub backup_dir: PathBuf,
}

impl AppState {
    pub fn new(
        store: Store,
        provider: Arc<dyn ExternalWeatherProvider>,
        model: RegressionModel,
    ) -> Self {
        Self {
            store: Arc::new(store),
            provider,
            model: Arc::new(model),
            bot: Arc::new(OnceCell::new()),
            telegram_api: TELEGRAM_API.to_string(),
            backup_dir: std::env::temp_dir(),
        }
    }

    /// Open the store, provider and model described by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = Store::open(&config.database_path)
            .with_context(|| format!("failed to open database at {}", config.database_path))?;

        let provider: Arc<dyn ExternalWeatherProvider> = Arc::from(provider_from_config(config)?);

        let model = match &config.model_path {
            Some(path) => RegressionModel::load(Path::new(path))?,
            None => RegressionModel::builtin()?,
        };
        info!(
            model = config.model_path.as_deref().unwrap_or("builtin"),
            "regression model loaded"
        );

        Ok(Self::new(store, provider, model))
    }
}
