//! SQLite persistence for sensor readings, external weather and settings.

use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, backup::Progress, params};
use tracing::{debug, info};

use crate::{
    StationError,
    error::Result,
    model::{
        CentralReading, ExternalWeather, NewCentral, NewExternalWeather, NewOutdoor,
        OutdoorReading, Setting, SettingPatch, WeatherUploadRequest, round1,
    },
    series::Sample,
    settings::{self, SettingType, SettingValue},
};

/// Sensor tables that can be charted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorTable {
    Central,
    Outdoor,
}

impl SensorTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorTable::Central => "central",
            SensorTable::Outdoor => "outdoor",
        }
    }
}

/// The newest row of every table, as served by `/weather/current`.
#[derive(Debug, Clone, Default)]
pub struct LastData {
    pub central: Option<CentralReading>,
    pub outdoor: Option<OutdoorReading>,
    pub external_weather: Option<ExternalWeather>,
}

/// SQLite-backed store shared by the REST handlers and the bot.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`, create the schema and seed the
    /// default settings. `":memory:"` gives an ephemeral database for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS central (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                temperature REAL NOT NULL,
                humidity    REAL NOT NULL,
                pressure    REAL NOT NULL,
                co2         INTEGER NOT NULL,
                tvoc        INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outdoor (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                temperature REAL NOT NULL,
                humidity    REAL NOT NULL,
                pressure    REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS external_weather (
                id                     INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at             TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                weather_description    TEXT NOT NULL,
                temperature_feels_like REAL NOT NULL,
                precipitation          REAL NOT NULL,
                uv_index               REAL NOT NULL,
                wind_speed             REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                type  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_central_created_at ON central(created_at);
            CREATE INDEX IF NOT EXISTS idx_outdoor_created_at ON outdoor(created_at);
            ",
        )?;

        for (key, kind) in settings::DEFAULTS {
            conn.execute(
                "INSERT OR IGNORE INTO settings (key, value, type) VALUES (?1, '', ?2)",
                params![key, kind.as_str()],
            )?;
        }

        info!(path, "database ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Panics if the mutex is poisoned, which only happens after another
    /// thread panicked mid-query.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Store one upload (central + outdoor) atomically, stamped with now.
    pub fn insert_sensor_data(&self, payload: &WeatherUploadRequest) -> Result<(i64, i64)> {
        self.insert_sensor_data_at(payload, Utc::now())
    }

    pub fn insert_sensor_data_at(
        &self,
        payload: &WeatherUploadRequest,
        at: DateTime<Utc>,
    ) -> Result<(i64, i64)> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let central_id = insert_central(&tx, &payload.central, at)?;
        let outdoor_id = insert_outdoor(&tx, &payload.outdoor, at)?;
        tx.commit()?;

        debug!(central_id, outdoor_id, "sensor data stored");
        Ok((central_id, outdoor_id))
    }

    pub fn save_external_weather(&self, weather: &NewExternalWeather) -> Result<i64> {
        self.save_external_weather_at(weather, Utc::now())
    }

    pub fn save_external_weather_at(
        &self,
        weather: &NewExternalWeather,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO external_weather
                (created_at, weather_description, temperature_feels_like, precipitation, uv_index, wind_speed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                format_ts(at),
                weather.weather_description,
                round1(weather.temperature_feels_like),
                round1(weather.precipitation),
                round1(weather.uv_index),
                round1(weather.wind_speed),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn last_central(&self) -> Result<Option<CentralReading>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, created_at, temperature, humidity, pressure, co2, tvoc
                 FROM central ORDER BY id DESC LIMIT 1",
                [],
                central_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn last_outdoor(&self) -> Result<Option<OutdoorReading>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, created_at, temperature, humidity, pressure
                 FROM outdoor ORDER BY id DESC LIMIT 1",
                [],
                outdoor_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn last_external(&self) -> Result<Option<ExternalWeather>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, created_at, weather_description, temperature_feels_like,
                        precipitation, uv_index, wind_speed
                 FROM external_weather ORDER BY id DESC LIMIT 1",
                [],
                external_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn last_data_for_sensors(&self) -> Result<LastData> {
        Ok(LastData {
            central: self.last_central()?,
            outdoor: self.last_outdoor()?,
            external_weather: self.last_external()?,
        })
    }

    /// All readings of `table` taken at or after `since`, oldest first.
    pub fn fetch_part_data(&self, table: SensorTable, since: DateTime<Utc>) -> Result<Vec<Sample>> {
        let conn = self.conn();
        let sql = match table {
            SensorTable::Central => {
                "SELECT created_at, temperature, humidity, pressure, co2, tvoc
                 FROM central WHERE created_at >= ?1 ORDER BY created_at"
            }
            SensorTable::Outdoor => {
                "SELECT created_at, temperature, humidity, pressure, NULL, NULL
                 FROM outdoor WHERE created_at >= ?1 ORDER BY created_at"
            }
        };

        let mut stmt = conn.prepare(sql)?;
        let samples = stmt
            .query_map(params![format_ts(since)], |row| {
                Ok(Sample {
                    at: parse_ts(row, 0)?,
                    temperature: Some(row.get(1)?),
                    humidity: Some(row.get(2)?),
                    pressure: Some(row.get(3)?),
                    co2: row.get::<_, Option<i64>>(4)?.map(|v| v as f64),
                    tvoc: row.get::<_, Option<i64>>(5)?.map(|v| v as f64),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!(table = table.as_str(), count = samples.len(), "fetched part data");
        Ok(samples)
    }

    /// Typed value of a setting. Missing keys and empty values are `None`.
    pub fn get_setting(&self, key: &str) -> Result<Option<SettingValue>> {
        let conn = self.conn();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT value, type FROM settings WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((value, _)) if value.trim().is_empty() => Ok(None),
            Some((value, kind)) => {
                SettingValue::parse(&value, SettingType::from_stored(&kind)).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Like [`Store::get_setting`], but a missing value is an error.
    pub fn require_setting(&self, key: &str) -> Result<SettingValue> {
        self.get_setting(key)?
            .ok_or_else(|| StationError::MissingSetting(key.to_string()))
    }

    pub fn list_settings(&self) -> Result<Vec<Setting>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value, type FROM settings ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    kind: SettingType::from_stored(&row.get::<_, String>(2)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Apply a batch of patches in one transaction and return how many
    /// settings changed. Unknown keys are skipped; a value that does not parse
    /// under its type rejects the whole batch.
    pub fn save_multiple_settings(&self, patches: &[SettingPatch]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut updated = 0;

        for patch in patches {
            let existing: Option<(String, String)> = tx
                .query_row(
                    "SELECT value, type FROM settings WHERE key = ?1",
                    params![patch.key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((old_value, old_kind)) = existing else {
                debug!(key = %patch.key, "skipping unknown setting");
                continue;
            };

            let kind = patch.kind.unwrap_or_else(|| SettingType::from_stored(&old_kind));
            let value = patch.value.clone().unwrap_or(old_value);
            if !value.trim().is_empty() {
                SettingValue::parse(&value, kind).map_err(|e| {
                    StationError::InvalidInput(format!("setting '{}': {e}", patch.key))
                })?;
            }

            tx.execute(
                "UPDATE settings SET value = ?1, type = ?2 WHERE key = ?3",
                params![value, kind.as_str(), patch.key],
            )?;
            updated += 1;
        }

        tx.commit()?;
        info!(updated, requested = patches.len(), "settings saved");
        Ok(updated)
    }

    /// Copy the live database into `dst` using SQLite's online backup.
    pub fn backup_to(&self, dst: &Path) -> Result<()> {
        let conn = self.conn();
        conn.backup(rusqlite::DatabaseName::Main, dst, None::<fn(Progress)>)?;
        info!(path = %dst.display(), "database backup written");
        Ok(())
    }
}

fn insert_central(tx: &Transaction<'_>, c: &NewCentral, at: DateTime<Utc>) -> Result<i64> {
    tx.execute(
        "INSERT INTO central (created_at, temperature, humidity, pressure, co2, tvoc)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            format_ts(at),
            round1(c.temperature),
            round1(c.humidity),
            round1(c.pressure),
            c.co2,
            c.tvoc,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn insert_outdoor(tx: &Transaction<'_>, o: &NewOutdoor, at: DateTime<Utc>) -> Result<i64> {
    tx.execute(
        "INSERT INTO outdoor (created_at, temperature, humidity, pressure)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            format_ts(at),
            round1(o.temperature),
            round1(o.humidity),
            round1(o.pressure),
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Same shape as the schema default, so text comparison orders correctly.
fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn central_from_row(row: &Row<'_>) -> rusqlite::Result<CentralReading> {
    Ok(CentralReading {
        id: row.get(0)?,
        created_at: parse_ts(row, 1)?,
        temperature: row.get(2)?,
        humidity: row.get(3)?,
        pressure: row.get(4)?,
        co2: row.get(5)?,
        tvoc: row.get(6)?,
    })
}

fn outdoor_from_row(row: &Row<'_>) -> rusqlite::Result<OutdoorReading> {
    Ok(OutdoorReading {
        id: row.get(0)?,
        created_at: parse_ts(row, 1)?,
        temperature: row.get(2)?,
        humidity: row.get(3)?,
        pressure: row.get(4)?,
    })
}

fn external_from_row(row: &Row<'_>) -> rusqlite::Result<ExternalWeather> {
    Ok(ExternalWeather {
        id: row.get(0)?,
        created_at: parse_ts(row, 1)?,
        weather_description: row.get(2)?,
        temperature_feels_like: row.get(3)?,
        precipitation: row.get(4)?,
        uv_index: row.get(5)?,
        wind_speed: row.get(6)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    pub(crate) fn upload(temp: f64) -> WeatherUploadRequest {
        WeatherUploadRequest {
            central: NewCentral {
                temperature: temp,
                humidity: 40.0,
                pressure: 750.0,
                co2: 600,
                tvoc: 30,
            },
            outdoor: NewOutdoor {
                temperature: temp - 10.0,
                humidity: 80.0,
                pressure: 749.5,
            },
        }
    }

    fn memory_store() -> Store {
        Store::open(":memory:").expect("in-memory store")
    }

    #[test]
    fn empty_store_has_no_last_rows() {
        let store = memory_store();
        let last = store.last_data_for_sensors().unwrap();
        assert!(last.central.is_none());
        assert!(last.outdoor.is_none());
        assert!(last.external_weather.is_none());
    }

    #[test]
    fn last_row_is_the_highest_id() {
        let store = memory_store();
        store.insert_sensor_data(&upload(20.0)).unwrap();
        let (central_id, _) = store.insert_sensor_data(&upload(21.04)).unwrap();

        let last = store.last_central().unwrap().expect("row");
        assert_eq!(last.id, central_id);
        assert_eq!(last.temperature, 21.0);
        assert_eq!(last.co2, 600);

        let outdoor = store.last_outdoor().unwrap().expect("row");
        assert_eq!(outdoor.temperature, 11.0);
    }

    #[test]
    fn external_weather_roundtrips_through_table() {
        let store = memory_store();
        store
            .save_external_weather(&NewExternalWeather {
                weather_description: "Облачно".into(),
                temperature_feels_like: -4.0,
                precipitation: 0.2,
                uv_index: 1.0,
                wind_speed: 3.33,
            })
            .unwrap();

        let ext = store.last_external().unwrap().expect("row");
        assert_eq!(ext.weather_description, "Облачно");
        assert_eq!(ext.wind_speed, 3.3);
    }

    #[test]
    fn part_data_respects_since_and_order() {
        let store = memory_store();
        let base = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        store.insert_sensor_data_at(&upload(10.0), base - Duration::hours(30)).unwrap();
        store.insert_sensor_data_at(&upload(12.0), base - Duration::hours(2)).unwrap();
        store.insert_sensor_data_at(&upload(11.0), base - Duration::hours(5)).unwrap();

        let samples = store
            .fetch_part_data(SensorTable::Central, base - Duration::hours(24))
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].at < samples[1].at);
        assert_eq!(samples[0].temperature, Some(11.0));
        assert_eq!(samples[0].co2, Some(600.0));

        let outdoor = store
            .fetch_part_data(SensorTable::Outdoor, base - Duration::hours(24))
            .unwrap();
        assert_eq!(outdoor.len(), 2);
        assert_eq!(outdoor[0].co2, None);
    }

    #[test]
    fn default_settings_are_seeded_empty() {
        let store = memory_store();
        let keys: Vec<String> = store.list_settings().unwrap().into_iter().map(|s| s.key).collect();
        assert!(keys.contains(&"latitude".to_string()));
        assert!(keys.contains(&"telegram_bot_token".to_string()));
        assert_eq!(store.get_setting("latitude").unwrap(), None);

        let err = store.require_setting("latitude").unwrap_err();
        assert!(matches!(err, StationError::MissingSetting(k) if k == "latitude"));
    }

    #[test]
    fn patches_update_known_keys_and_skip_unknown() {
        let store = memory_store();
        let updated = store
            .save_multiple_settings(&[
                SettingPatch { key: "latitude".into(), value: Some("55.75".into()), kind: None },
                SettingPatch { key: "nope".into(), value: Some("1".into()), kind: None },
            ])
            .unwrap();

        assert_eq!(updated, 1);
        assert_eq!(store.get_setting("latitude").unwrap(), Some(SettingValue::Float(55.75)));
        assert_eq!(store.get_setting("nope").unwrap(), None);
    }

    #[test]
    fn patch_can_change_type_without_value() {
        let store = memory_store();
        store
            .save_multiple_settings(&[SettingPatch {
                key: "longitude".into(),
                value: Some("37".into()),
                kind: Some(SettingType::Int),
            }])
            .unwrap();
        assert_eq!(store.get_setting("longitude").unwrap(), Some(SettingValue::Int(37)));

        store
            .save_multiple_settings(&[SettingPatch {
                key: "longitude".into(),
                value: None,
                kind: Some(SettingType::Float),
            }])
            .unwrap();
        assert_eq!(store.get_setting("longitude").unwrap(), Some(SettingValue::Float(37.0)));
    }

    #[test]
    fn invalid_value_rolls_back_whole_batch() {
        let store = memory_store();
        let err = store
            .save_multiple_settings(&[
                SettingPatch { key: "latitude".into(), value: Some("10".into()), kind: None },
                SettingPatch { key: "longitude".into(), value: Some("east".into()), kind: None },
            ])
            .unwrap_err();

        assert!(matches!(err, StationError::InvalidInput(_)));
        assert_eq!(store.get_setting("latitude").unwrap(), None);
    }

    #[test]
    fn backup_produces_readable_copy() {
        let store = memory_store();
        store.insert_sensor_data(&upload(19.0)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.db");
        store.backup_to(&path).unwrap();

        let copy = Store::open(path.to_str().unwrap()).unwrap();
        assert_eq!(copy.last_central().unwrap().map(|c| c.temperature), Some(19.0));
    }
}
