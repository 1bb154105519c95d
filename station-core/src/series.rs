//! Time-series aggregation for charts.
//!
//! Sensor streams arrive at irregular moments (the station uploads whenever it
//! wakes up), so before plotting every stream is folded into the same grid of
//! fixed-width windows. Each window keeps the mean of the readings that fell
//! into it; a window without readings stays empty and is drawn as a gap.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};

use crate::StationError;

/// One stored reading, with every metric the source table carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub co2: Option<f64>,
    pub tvoc: Option<f64>,
}

impl Sample {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
            Metric::Pressure => self.pressure,
            Metric::Co2 => self.co2,
            Metric::Tvoc => self.tvoc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorInterval {
    #[default]
    Day,
    Week,
    Month,
}

impl SensorInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorInterval::Day => "day",
            SensorInterval::Week => "week",
            SensorInterval::Month => "month",
        }
    }

    /// How far back the chart reaches.
    pub fn span(&self) -> Duration {
        match self {
            SensorInterval::Day => Duration::hours(24),
            SensorInterval::Week => Duration::days(7),
            SensorInterval::Month => Duration::days(30),
        }
    }

    /// Width of one aggregation window. Always divides a day evenly.
    pub fn bucket_width(&self) -> Duration {
        match self {
            SensorInterval::Day => Duration::hours(1),
            SensorInterval::Week => Duration::hours(6),
            SensorInterval::Month => Duration::days(1),
        }
    }

    pub const fn all() -> &'static [SensorInterval] {
        &[SensorInterval::Day, SensorInterval::Week, SensorInterval::Month]
    }
}

impl fmt::Display for SensorInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for SensorInterval {
    type Error = StationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let name = value.to_lowercase();
        SensorInterval::all()
            .iter()
            .copied()
            .find(|interval| interval.as_str() == name)
            .ok_or_else(|| {
                StationError::InvalidInput(format!(
                    "Unknown interval '{value}'. Supported intervals: {}.",
                    joined(SensorInterval::all())
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Temperature,
    Humidity,
    Pressure,
    Co2,
    Tvoc,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Pressure => "pressure",
            Metric::Co2 => "co2",
            Metric::Tvoc => "tvoc",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Humidity => "%",
            Metric::Pressure => "mmHg",
            Metric::Co2 => "ppm",
            Metric::Tvoc => "ppb",
        }
    }

    /// Air-quality metrics only exist on the central unit.
    pub fn measured_outdoors(&self) -> bool {
        !matches!(self, Metric::Co2 | Metric::Tvoc)
    }

    pub const fn all() -> &'static [Metric] {
        &[
            Metric::Temperature,
            Metric::Humidity,
            Metric::Pressure,
            Metric::Co2,
            Metric::Tvoc,
        ]
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Metric {
    type Error = StationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "temperature" | "temp" => Ok(Metric::Temperature),
            "humidity" => Ok(Metric::Humidity),
            "pressure" => Ok(Metric::Pressure),
            "co2" => Ok(Metric::Co2),
            "tvoc" => Ok(Metric::Tvoc),
            _ => Err(StationError::InvalidInput(format!(
                "Unknown metric '{value}'. Supported metrics: {}.",
                joined(Metric::all())
            ))),
        }
    }
}

/// Comma-separated names, e.g. `day, week, month`.
pub fn joined<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    /// `None` when no reading fell into the window.
    pub mean: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub source: String,
    pub buckets: Vec<Bucket>,
}

impl Series {
    pub fn has_data(&self) -> bool {
        self.buckets.iter().any(|b| b.mean.is_some())
    }
}

/// Several series over the same bucket grid, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub interval: SensorInterval,
    pub metric: Metric,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub series: Vec<Series>,
}

impl Chart {
    pub fn is_empty(&self) -> bool {
        !self.series.iter().any(Series::has_data)
    }

    /// Smallest and largest bucket mean across every series.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.series
            .iter()
            .flat_map(|s| s.buckets.iter().filter_map(|b| b.mean))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Fold `samples` into windows `[start + k*width, start + (k+1)*width)`
/// covering `[start, end)`. Samples outside the range or lacking `metric` are
/// ignored.
pub fn bucketize(
    samples: &[Sample],
    metric: Metric,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    width: Duration,
) -> Vec<Bucket> {
    let width_ms = width.num_milliseconds();
    let total_ms = (end - start).num_milliseconds();
    if width_ms <= 0 || total_ms <= 0 {
        return Vec::new();
    }

    let n = ((total_ms + width_ms - 1) / width_ms) as usize;
    let mut sums = vec![(0.0_f64, 0_usize); n];

    for sample in samples {
        if sample.at < start || sample.at >= end {
            continue;
        }
        let Some(value) = sample.value(metric) else {
            continue;
        };
        let idx = ((sample.at - start).num_milliseconds() / width_ms) as usize;
        // idx < n holds because sample.at < end
        let slot = &mut sums[idx];
        slot.0 += value;
        slot.1 += 1;
    }

    sums.into_iter()
        .enumerate()
        .map(|(k, (sum, count))| Bucket {
            start: start + width * k as i32,
            mean: (count > 0).then(|| sum / count as f64),
            count,
        })
        .collect()
}

/// Chart window for `now`: it ends on the first bucket boundary after `now`
/// (UTC), so the current partial window is included and edges stay stable
/// between requests.
pub fn align_window(now: DateTime<Utc>, interval: SensorInterval) -> (DateTime<Utc>, DateTime<Utc>) {
    let width = interval.bucket_width().num_seconds();
    let end_secs = (now.timestamp().div_euclid(width) + 1) * width;
    let end = Utc
        .timestamp_opt(end_secs, 0)
        .single()
        .unwrap_or(now);
    (end - interval.span(), end)
}

/// Build the chart of `metric` for both station sensors.
pub fn build_chart(
    interval: SensorInterval,
    metric: Metric,
    now: DateTime<Utc>,
    central: &[Sample],
    outdoor: &[Sample],
) -> Chart {
    let (start, end) = align_window(now, interval);
    let width = interval.bucket_width();

    let mut series = vec![Series {
        source: "central".to_string(),
        buckets: bucketize(central, metric, start, end, width),
    }];

    if metric.measured_outdoors() {
        series.push(Series {
            source: "outdoor".to_string(),
            buckets: bucketize(outdoor, metric, start, end, width),
        });
    }

    Chart {
        interval,
        metric,
        start,
        end,
        series,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn temp(at: DateTime<Utc>, value: f64) -> Sample {
        Sample {
            at,
            temperature: Some(value),
            humidity: Some(50.0),
            pressure: Some(750.0),
            co2: None,
            tvoc: None,
        }
    }

    #[test]
    fn samples_are_averaged_per_window() {
        let samples = vec![temp(at(0, 10), 10.0), temp(at(0, 50), 12.0), temp(at(2, 0), 7.0)];
        let buckets = bucketize(&samples, Metric::Temperature, at(0, 0), at(3, 0), Duration::hours(1));

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].mean, Some(11.0));
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[1].mean, None);
        assert_eq!(buckets[1].start, at(1, 0));
        assert_eq!(buckets[2].mean, Some(7.0));
    }

    #[test]
    fn end_is_exclusive_and_start_inclusive() {
        let samples = vec![temp(at(0, 0), 1.0), temp(at(2, 0), 99.0)];
        let buckets = bucketize(&samples, Metric::Temperature, at(0, 0), at(2, 0), Duration::hours(1));

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].mean, Some(1.0));
        assert!(buckets.iter().all(|b| b.mean != Some(99.0)));
    }

    #[test]
    fn partial_last_window_is_kept() {
        let buckets = bucketize(&[], Metric::Humidity, at(0, 0), at(2, 30), Duration::hours(1));
        assert_eq!(buckets.len(), 3);
    }

    #[test]
    fn missing_metric_is_skipped_not_zeroed() {
        let samples = vec![temp(at(0, 5), 20.0)];
        let buckets = bucketize(&samples, Metric::Co2, at(0, 0), at(1, 0), Duration::hours(1));
        assert_eq!(buckets[0].mean, None);
        assert_eq!(buckets[0].count, 0);
    }

    #[test]
    fn empty_range_gives_no_buckets() {
        assert!(bucketize(&[], Metric::Temperature, at(1, 0), at(1, 0), Duration::hours(1)).is_empty());
        assert!(bucketize(&[], Metric::Temperature, at(1, 0), at(0, 0), Duration::hours(1)).is_empty());
    }

    #[test]
    fn window_ends_on_next_boundary() {
        let (start, end) = align_window(at(13, 20), SensorInterval::Day);
        assert_eq!(end, at(14, 0));
        assert_eq!(start, end - Duration::hours(24));

        let (_, end) = align_window(at(13, 0), SensorInterval::Day);
        assert_eq!(end, at(14, 0));

        let (start, end) = align_window(at(13, 20), SensorInterval::Week);
        assert_eq!(end, at(18, 0));
        assert_eq!(end - start, Duration::days(7));
    }

    #[test]
    fn intervals_give_expected_bucket_counts() {
        for (interval, expected) in [
            (SensorInterval::Day, 24),
            (SensorInterval::Week, 28),
            (SensorInterval::Month, 30),
        ] {
            let chart = build_chart(interval, Metric::Temperature, at(9, 45), &[], &[]);
            assert_eq!(chart.series[0].buckets.len(), expected, "{interval}");
            assert!(chart.is_empty());
        }
    }

    #[test]
    fn both_streams_share_the_grid() {
        let central = vec![temp(at(9, 0), 22.0)];
        let outdoor = vec![temp(at(8, 30), -1.0), temp(at(9, 10), -2.0)];
        let chart = build_chart(SensorInterval::Day, Metric::Temperature, at(9, 45), &central, &outdoor);

        assert_eq!(chart.series.len(), 2);
        let grid: Vec<_> = chart.series[0].buckets.iter().map(|b| b.start).collect();
        let other: Vec<_> = chart.series[1].buckets.iter().map(|b| b.start).collect();
        assert_eq!(grid, other);

        let last = chart.series[1].buckets.last().unwrap();
        assert_eq!(last.start, at(9, 0));
        assert_eq!(last.mean, Some(-2.0));
        assert_eq!(chart.value_range(), Some((-2.0, 22.0)));
    }

    #[test]
    fn air_quality_chart_has_only_central_series() {
        let chart = build_chart(SensorInterval::Day, Metric::Co2, at(9, 45), &[], &[]);
        assert_eq!(chart.series.len(), 1);
        assert_eq!(chart.series[0].source, "central");
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!(SensorInterval::try_from("WEEK").unwrap(), SensorInterval::Week);
        assert_eq!(Metric::try_from("Temp").unwrap(), Metric::Temperature);
        assert!(Metric::try_from("wind").is_err());
        assert!(SensorInterval::try_from("year").is_err());

        for interval in SensorInterval::all() {
            assert_eq!(SensorInterval::try_from(interval.as_str()).unwrap(), *interval);
        }
        for metric in Metric::all() {
            assert_eq!(Metric::try_from(metric.to_string().as_str()).unwrap(), *metric);
        }
    }

    #[test]
    fn unknown_names_list_supported_values() {
        let err = Metric::try_from("wind").unwrap_err().to_string();
        assert!(err.contains("temperature, humidity, pressure, co2, tvoc"));
        let err = SensorInterval::try_from("year").unwrap_err().to_string();
        assert!(err.contains("day, week, month"));
    }
}
