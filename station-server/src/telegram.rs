//! Telegram bot in webhook mode.
//!
//! Telegram posts updates to `/webhook`; every command is answered with the
//! same data the REST endpoints serve.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use station_core::{
    Metric, SensorInterval, StationError, WeatherCurrentResponse, current_weather,
    plot::generate_weather_plot, predict::weather_prediction, settings::TELEGRAM_BOT_TOKEN,
};
use std::convert::TryFrom;
use tracing::{debug, info, warn};

use crate::state::AppState;

pub const TELEGRAM_API: &str = "https://api.telegram.org";

const GREETING: &str = "Привет! Я бот метеостанции.";

fn help_text() -> String {
    let choices = |names: Vec<&str>| names.join("|");
    format!(
        "Команды:\n/current - текущая погода\n/predict - прогноз\n/plot [{}] [{}] - график",
        choices(SensorInterval::all().iter().map(SensorInterval::as_str).collect()),
        choices(Metric::all().iter().map(Metric::as_str).collect()),
    )
}

/// Thin client for the Bot API methods the station uses.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    base: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    description: Option<String>,
}

impl TelegramClient {
    pub fn new(token: &str, api_base: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(anyhow!("Telegram bot token is empty"));
        }
        Ok(Self {
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token.trim()),
            http: Client::new(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base)
    }

    async fn read(method: &str, res: reqwest::Response) -> Result<Value> {
        let status = res.status();
        let parsed: ApiResponse = res
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {method} response ({status})"))?;

        if !parsed.ok {
            return Err(anyhow!(
                "Telegram {method} failed: {}",
                parsed.description.unwrap_or_else(|| status.to_string())
            ));
        }
        Ok(parsed.result)
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> Result<Value> {
        let res = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send Telegram {method} request"))?;
        Self::read(method, res).await
    }

    /// Register `url` as the webhook. Returns Telegram's verdict.
    pub async fn set_webhook(&self, url: &str) -> Result<bool> {
        let result = self
            .call("setWebhook", &serde_json::json!({ "url": url }))
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.call(
            "sendMessage",
            &serde_json::json!({ "chat_id": chat_id, "text": text }),
        )
        .await?;
        Ok(())
    }

    pub async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<()> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .context("Invalid document MIME type")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        let res = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .context("Failed to send Telegram sendDocument request")?;
        Self::read("sendDocument", res).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    Current,
    Predict,
    Plot {
        interval: SensorInterval,
        metric: Metric,
    },
    /// A command with arguments that did not parse.
    Invalid(String),
    Text(String),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let Some(rest) = text.strip_prefix('/') else {
            return Command::Text(text.to_string());
        };

        let mut words = rest.split_whitespace();
        let name = words
            .next()
            .and_then(|w| w.split('@').next())
            .unwrap_or_default()
            .to_lowercase();

        match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "current" => Command::Current,
            "predict" => Command::Predict,
            "plot" => {
                let interval = words.next().map(SensorInterval::try_from).transpose();
                let metric = words.next().map(Metric::try_from).transpose();
                match (interval, metric) {
                    (Ok(interval), Ok(metric)) => Command::Plot {
                        interval: interval.unwrap_or_default(),
                        metric: metric.unwrap_or_default(),
                    },
                    (Err(e), _) | (_, Err(e)) => Command::Invalid(e.to_string()),
                }
            }
            _ => Command::Text(text.to_string()),
        }
    }
}

/// What the bot sends back for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Document {
        file_name: String,
        mime: &'static str,
        bytes: Vec<u8>,
        caption: String,
    },
}

/// Get the bot client, creating it from the stored token on first use.
pub async fn init_bot(state: &AppState) -> Result<&TelegramClient, StationError> {
    state
        .bot
        .get_or_try_init(|| async {
            let token = state.store.require_setting(TELEGRAM_BOT_TOKEN)?;
            let client = TelegramClient::new(&token.to_string(), &state.telegram_api)?;
            info!("telegram bot initialised");
            Ok::<_, StationError>(client)
        })
        .await
}

pub fn format_current(current: &WeatherCurrentResponse) -> String {
    let c = &current.central;
    let o = &current.outdoor;
    let e = &current.external_weather;
    format!(
        "🏠 Дома: {:.1} °C, влажность {:.1} %, давление {:.1} мм рт. ст., CO2 {} ppm, TVOC {} ppb\n\
         🌳 На улице: {:.1} °C, влажность {:.1} %, давление {:.1} мм рт. ст.\n\
         🌍 {}: ощущается как {:.1} °C, осадки {:.1} мм, УФ-индекс {:.1}, ветер {:.1} м/с\n\
         Обновлено: {}",
        c.temperature,
        c.humidity,
        c.pressure,
        c.co2,
        c.tvoc,
        o.temperature,
        o.humidity,
        o.pressure,
        e.weather_description,
        e.temperature_feels_like,
        e.precipitation,
        e.uv_index,
        e.wind_speed,
        c.created_at.format("%d.%m.%Y %H:%M UTC"),
    )
}

/// Build the reply for a command. Failures become a text reply.
pub fn respond(state: &AppState, command: Command) -> Reply {
    let result = match command {
        Command::Start => Ok(Reply::Text(GREETING.to_string())),
        Command::Help => Ok(Reply::Text(help_text())),
        Command::Text(text) => Ok(Reply::Text(format!("Ты написал: {text}"))),
        Command::Invalid(reason) => Ok(Reply::Text(format!("{reason}\n\n{}", help_text()))),
        Command::Current => current_weather(&state.store).map(|c| Reply::Text(format_current(&c))),
        Command::Predict => weather_prediction(&state.store, &state.model).map(|p| {
            let rain = if p.predicted_rain { "ожидается дождь" } else { "без осадков" };
            Reply::Text(format!("Прогноз: {:.1} °C, {rain}", p.predicted_temp))
        }),
        Command::Plot { interval, metric } => {
            generate_weather_plot(&state.store, interval, metric, Utc::now()).map(|svg| {
                Reply::Document {
                    file_name: format!("{metric}-{interval}.svg"),
                    mime: "image/svg+xml",
                    bytes: svg.into_bytes(),
                    caption: format!("{metric}, {interval}"),
                }
            })
        }
    };

    result.unwrap_or_else(|e| {
        warn!(error = %e, "bot command failed");
        Reply::Text(format!("Не удалось получить данные: {e}"))
    })
}

/// Route one update through the handlers and send the reply.
pub async fn handle_update(state: &AppState, bot: &TelegramClient, update: Update) -> Result<()> {
    let Some(message) = update.message else {
        debug!(update_id = update.update_id, "ignoring update without message");
        return Ok(());
    };
    let Some(text) = message.text else {
        debug!(message_id = message.message_id, "ignoring non-text message");
        return Ok(());
    };

    let chat_id = message.chat.id;
    let command = Command::parse(&text);
    debug!(chat_id, ?command, "bot command");

    match respond(state, command) {
        Reply::Text(text) => bot.send_message(chat_id, &text).await,
        Reply::Document {
            file_name,
            mime,
            bytes,
            caption,
        } => {
            bot.send_document(chat_id, &file_name, mime, bytes, &caption)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{seeded_state, test_state};

    #[test]
    fn commands_are_recognised() {
        assert_eq!(Command::parse("/start"), Command::Start);
        assert_eq!(Command::parse("/HELP"), Command::Help);
        assert_eq!(Command::parse("/current@station_bot"), Command::Current);
        assert_eq!(Command::parse("  /predict  "), Command::Predict);
    }

    #[test]
    fn help_lists_every_interval_and_metric() {
        let help = help_text();
        assert!(help.contains("/plot [day|week|month] [temperature|humidity|pressure|co2|tvoc]"));
    }

    #[test]
    fn plot_arguments_have_defaults() {
        assert_eq!(
            Command::parse("/plot"),
            Command::Plot { interval: SensorInterval::Day, metric: Metric::Temperature }
        );
        assert_eq!(
            Command::parse("/plot week co2"),
            Command::Plot { interval: SensorInterval::Week, metric: Metric::Co2 }
        );
        assert!(matches!(Command::parse("/plot year"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/plot day wind"), Command::Invalid(_)));
    }

    #[test]
    fn unknown_commands_and_text_are_echoed() {
        assert_eq!(Command::parse("привет"), Command::Text("привет".into()));
        assert_eq!(Command::parse("/weather"), Command::Text("/weather".into()));

        let state = test_state();
        assert_eq!(
            respond(&state, Command::parse("привет")),
            Reply::Text("Ты написал: привет".into())
        );
    }

    #[test]
    fn start_greets() {
        let state = test_state();
        assert_eq!(respond(&state, Command::Start), Reply::Text(GREETING.into()));
    }

    #[test]
    fn current_without_data_explains_failure() {
        let state = test_state();
        let Reply::Text(text) = respond(&state, Command::Current) else {
            panic!("expected text reply");
        };
        assert!(text.starts_with("Не удалось получить данные"));
    }

    #[test]
    fn current_and_plot_use_stored_data() {
        let state = seeded_state();

        let Reply::Text(text) = respond(&state, Command::Current) else {
            panic!("expected text reply");
        };
        assert!(text.contains("Дома: 21.5 °C"));
        assert!(text.contains("Ясно"));

        let Reply::Document { file_name, mime, bytes, .. } =
            respond(&state, Command::parse("/plot day humidity"))
        else {
            panic!("expected document reply");
        };
        assert_eq!(file_name, "humidity-day.svg");
        assert_eq!(mime, "image/svg+xml");
        let svg = String::from_utf8(bytes).unwrap();
        assert!(svg.contains("central"));
        assert!(svg.contains("outdoor"));
    }

    #[test]
    fn update_json_is_parsed() {
        let update: Update = serde_json::from_str(
            r#"{"update_id":1,"message":{"message_id":7,"date":0,"chat":{"id":42,"type":"private"},"text":"/start"}}"#,
        )
        .unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.chat.id, 42);
        assert_eq!(message.text.as_deref(), Some("/start"));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(TelegramClient::new("  ", TELEGRAM_API).is_err());
        let client = TelegramClient::new("123:abc", "https://api.telegram.org/").unwrap();
        assert_eq!(client.method_url("getMe"), "https://api.telegram.org/bot123:abc/getMe");
    }

    #[tokio::test]
    async fn bot_needs_token_setting() {
        let state = test_state();
        let err = init_bot(&state).await.unwrap_err();
        assert!(matches!(err, StationError::MissingSetting(_)));
    }
}
