//! REST endpoints of the station.

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use std::sync::Arc;
use serde::Deserialize;
use serde_json::json;
use station_core::{
    Metric, SensorInterval, StationError, WeatherCurrentResponse, WeatherPredictionResponse,
    WeatherUploadRequest,
    backup::create_backup,
    current_weather,
    model::{Setting, SettingPatch},
    plot::{generate_weather_plot, load_chart},
    predict::weather_prediction,
    provider::new_data_logic,
    series::Chart,
    settings::TELEGRAM_WEBHOOK_URL,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    state::AppState,
    telegram::{Update, handle_update, init_bot},
};

/// Error body `{ "detail": ... }` with a status derived from the failure kind.
#[derive(Debug)]
pub enum ApiError {
    Station(StationError),
    BadRequest(String),
    /// Request body or query string that could not be deserialized.
    Unprocessable(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Unprocessable(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Unprocessable(rejection.body_text())
    }
}

impl From<StationError> for ApiError {
    fn from(e: StationError) -> Self {
        ApiError::Station(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Unprocessable(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::Station(e) => {
                let status = match &e {
                    StationError::NotFound(_) => StatusCode::NOT_FOUND,
                    StationError::MissingSetting(_) => StatusCode::CONFLICT,
                    StationError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    StationError::Upstream(_) => StatusCode::BAD_GATEWAY,
                    StationError::Storage(_) | StationError::Other(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, format!("{e:#}"))
            }
        };

        if status.is_server_error() {
            error!(%status, %detail, "request failed");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    #[serde(default)]
    pub interval: SensorInterval,
    #[serde(default)]
    pub metric: Metric,
}

/// Build the application router. Every route except `/health` lives under `prefix`.
pub fn router(state: AppState, prefix: &str) -> Router {
    let api = Router::new()
        .route("/weather/current", get(get_current_weather))
        .route("/weather/predict", get(get_weather_prediction))
        .route("/weather/upload", post(upload_weather_data))
        .route("/weather/plot", get(get_weather_plot))
        .route("/weather/history", get(get_weather_history))
        .route("/settings", get(list_settings).patch(patch_multiple_settings))
        .route("/settings/backup", get(get_backup))
        .route("/webhook", post(webhook_handler))
        .route("/webhook/set", get(set_webhook));

    let app = if prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(prefix, api)
    };

    app.route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_current_weather(
    State(state): State<AppState>,
) -> ApiResult<Json<WeatherCurrentResponse>> {
    Ok(Json(current_weather(&state.store)?))
}

async fn get_weather_prediction(
    State(state): State<AppState>,
) -> ApiResult<Json<WeatherPredictionResponse>> {
    Ok(Json(weather_prediction(&state.store, &state.model)?))
}

async fn upload_weather_data(
    State(state): State<AppState>,
    payload: Result<Json<WeatherUploadRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(payload) = payload?;
    new_data_logic(&state.store, state.provider.as_ref(), &payload).await?;
    Ok(StatusCode::OK)
}

async fn get_weather_plot(
    State(state): State<AppState>,
    query: Result<Query<ChartQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let svg = generate_weather_plot(&state.store, query.interval, query.metric, Utc::now())?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

async fn get_weather_history(
    State(state): State<AppState>,
    query: Result<Query<ChartQuery>, QueryRejection>,
) -> ApiResult<Json<Chart>> {
    let Query(query) = query?;
    Ok(Json(load_chart(&state.store, query.interval, query.metric, Utc::now())?))
}

async fn list_settings(State(state): State<AppState>) -> ApiResult<Json<Vec<Setting>>> {
    Ok(Json(state.store.list_settings()?))
}

async fn patch_multiple_settings(
    State(state): State<AppState>,
    payload: Result<Json<Vec<SettingPatch>>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(payload) = payload?;
    let updated = state.store.save_multiple_settings(&payload)?;
    Ok(Json(json!({ "updated": updated })))
}

async fn get_backup(State(state): State<AppState>) -> ApiResult<Response> {
    // The online backup holds the store lock until the copy is done.
    let store = Arc::clone(&state.store);
    let dir = state.backup_dir.clone();
    let backup = tokio::task::spawn_blocking(move || create_backup(&store, &dir))
        .await
        .context("backup task panicked")
        .map_err(StationError::from)??;
    let bytes = tokio::fs::read(backup.path())
        .await
        .context("Failed to read backup file")
        .map_err(StationError::from)?;

    info!(size = bytes.len(), "serving database backup");
    Ok((
        [
            (header::CONTENT_TYPE, backup.media_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", backup.file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn webhook_handler(
    State(state): State<AppState>,
    Json(update): Json<Update>,
) -> Json<serde_json::Value> {
    // Telegram retries non-2xx answers, so failures are only logged.
    match init_bot(&state).await {
        Ok(bot) => {
            if let Err(e) = handle_update(&state, bot, update).await {
                warn!(error = %format!("{e:#}"), "failed to answer telegram update");
            }
        }
        Err(e) => warn!(error = %e, "telegram update received but bot is not configured"),
    }
    Json(json!({ "ok": true }))
}

async fn set_webhook(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let bot = init_bot(&state)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let url = state
        .store
        .require_setting(TELEGRAM_WEBHOOK_URL)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .to_string();

    match bot.set_webhook(&url).await {
        Ok(true) => {
            info!(%url, "telegram webhook registered");
            Ok(Json(json!({ "ok": true })))
        }
        Ok(false) => Err(ApiError::BadRequest("Webhook setting failed".into())),
        Err(e) => Err(ApiError::BadRequest(format!("Webhook setting failed: {e:#}"))),
    }
}
