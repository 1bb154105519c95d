//! SVG line charts of aggregated sensor data.

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    series::{Chart, Metric, SensorInterval, build_chart, align_window},
    store::{SensorTable, Store},
};

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 400.0;
const LEFT: f64 = 64.0;
const RIGHT: f64 = 24.0;
const TOP: f64 = 48.0;
const BOTTOM: f64 = 56.0;
const MAX_X_LABELS: usize = 8;
const Y_TICKS: usize = 5;

/// Aggregate the stored readings of the last `interval` and render them.
pub fn generate_weather_plot(
    store: &Store,
    interval: SensorInterval,
    metric: Metric,
    now: DateTime<Utc>,
) -> Result<String> {
    let chart = load_chart(store, interval, metric, now)?;
    Ok(render_svg(&chart))
}

/// Aggregated chart data without rendering, as served by `/weather/history`.
pub fn load_chart(
    store: &Store,
    interval: SensorInterval,
    metric: Metric,
    now: DateTime<Utc>,
) -> Result<Chart> {
    let (since, _) = align_window(now, interval);
    let central = store.fetch_part_data(SensorTable::Central, since)?;
    let outdoor = if metric.measured_outdoors() {
        store.fetch_part_data(SensorTable::Outdoor, since)?
    } else {
        Vec::new()
    };
    Ok(build_chart(interval, metric, now, &central, &outdoor))
}

fn series_color(source: &str) -> &'static str {
    match source {
        "central" => "#d62728",
        "outdoor" => "#1f77b4",
        _ => "#2ca02c",
    }
}

fn time_label(at: DateTime<Utc>, interval: SensorInterval) -> String {
    let fmt = match interval {
        SensorInterval::Day => "%H:%M",
        SensorInterval::Week => "%d.%m %Hh",
        SensorInterval::Month => "%d.%m",
    };
    at.format(fmt).to_string()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render a standalone SVG document. Gaps in a series break its line.
pub fn render_svg(chart: &Chart) -> String {
    let plot_w = WIDTH - LEFT - RIGHT;
    let plot_h = HEIGHT - TOP - BOTTOM;

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="12">"#
    );
    svg.push_str(r#"<rect width="100%" height="100%" fill="white"/>"#);
    svg.push_str(&format!(
        r#"<text x="{}" y="24" text-anchor="middle" font-size="16">{}</text>"#,
        WIDTH / 2.0,
        escape(&format!(
            "{} ({}), last {}",
            chart.metric,
            chart.metric.unit(),
            chart.interval
        ))
    ));

    let Some((lo, hi)) = chart.value_range() else {
        svg.push_str(&format!(
            r##"<text x="{}" y="{}" text-anchor="middle" fill="#888">no data</text></svg>"##,
            WIDTH / 2.0,
            HEIGHT / 2.0
        ));
        return svg;
    };

    let (lo, hi) = if (hi - lo).abs() < f64::EPSILON {
        (lo - 1.0, hi + 1.0)
    } else {
        let pad = (hi - lo) * 0.1;
        (lo - pad, hi + pad)
    };
    let y_of = |v: f64| TOP + (hi - v) / (hi - lo) * plot_h;

    // axes
    svg.push_str(&format!(
        r##"<path d="M{LEFT} {TOP} V{} H{}" stroke="#333" fill="none"/>"##,
        TOP + plot_h,
        LEFT + plot_w
    ));

    for i in 0..=Y_TICKS {
        let v = lo + (hi - lo) * i as f64 / Y_TICKS as f64;
        let y = y_of(v);
        svg.push_str(&format!(
            r##"<line x1="{LEFT}" y1="{y:.1}" x2="{}" y2="{y:.1}" stroke="#eee"/><text x="{}" y="{:.1}" text-anchor="end">{v:.1}</text>"##,
            LEFT + plot_w,
            LEFT - 6.0,
            y + 4.0
        ));
    }

    let n = chart.series.first().map_or(0, |s| s.buckets.len()).max(1);
    let step_x = plot_w / n as f64;
    let x_of = |k: usize| LEFT + (k as f64 + 0.5) * step_x;

    let label_every = n.div_ceil(MAX_X_LABELS).max(1);
    if let Some(first) = chart.series.first() {
        for (k, bucket) in first.buckets.iter().enumerate().step_by(label_every) {
            svg.push_str(&format!(
                r#"<text x="{:.1}" y="{}" text-anchor="middle">{}</text>"#,
                x_of(k),
                TOP + plot_h + 18.0,
                escape(&time_label(bucket.start, chart.interval))
            ));
        }
    }

    for (i, series) in chart.series.iter().enumerate() {
        let color = series_color(&series.source);

        // split into runs of consecutive non-empty buckets
        let mut runs: Vec<Vec<(f64, f64)>> = Vec::new();
        let mut current = Vec::new();
        for (k, bucket) in series.buckets.iter().enumerate() {
            match bucket.mean {
                Some(v) => current.push((x_of(k), y_of(v))),
                None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
                None => {}
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }

        for run in runs {
            if let [(x, y)] = run.as_slice() {
                svg.push_str(&format!(
                    r#"<circle cx="{x:.1}" cy="{y:.1}" r="3" fill="{color}"/>"#
                ));
                continue;
            }
            let points: Vec<String> = run.iter().map(|(x, y)| format!("{x:.1},{y:.1}")).collect();
            svg.push_str(&format!(
                r#"<polyline points="{}" stroke="{color}" stroke-width="2" fill="none"/>"#,
                points.join(" ")
            ));
        }

        let legend_y = TOP + 14.0 * i as f64;
        svg.push_str(&format!(
            r#"<rect x="{}" y="{:.1}" width="10" height="10" fill="{color}"/><text x="{}" y="{:.1}">{}</text>"#,
            WIDTH - RIGHT - 90.0,
            legend_y - 9.0,
            WIDTH - RIGHT - 76.0,
            legend_y,
            escape(&series.source)
        ));
    }

    svg.push_str("</svg>");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Bucket, Series};
    use crate::store::tests::upload;
    use chrono::{Duration, TimeZone};

    fn chart(values: &[Option<f64>]) -> Chart {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        Chart {
            interval: SensorInterval::Day,
            metric: Metric::Temperature,
            start,
            end: start + Duration::hours(values.len() as i64),
            series: vec![Series {
                source: "outdoor".into(),
                buckets: values
                    .iter()
                    .enumerate()
                    .map(|(k, v)| Bucket {
                        start: start + Duration::hours(k as i64),
                        mean: *v,
                        count: usize::from(v.is_some()),
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn empty_chart_renders_placeholder() {
        let svg = render_svg(&chart(&[None, None]));
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("no data"));
    }

    #[test]
    fn gaps_split_the_line() {
        let svg = render_svg(&chart(&[Some(1.0), Some(2.0), None, Some(3.0), Some(2.5)]));
        assert_eq!(svg.matches("<polyline").count(), 2);
        assert!(!svg.contains("no data"));
    }

    #[test]
    fn isolated_point_is_drawn_as_dot() {
        let svg = render_svg(&chart(&[None, Some(5.0), None]));
        assert_eq!(svg.matches("<circle").count(), 1);
        assert_eq!(svg.matches("<polyline").count(), 0);
    }

    #[test]
    fn x_labels_are_thinned() {
        let svg = render_svg(&chart(&[Some(1.0); 24]));
        assert_eq!(svg.matches(r#"text-anchor="middle">"#).count(), 8);
    }

    #[test]
    fn plot_from_store_contains_both_sensors() {
        let store = Store::open(":memory:").unwrap();
        let now = Utc::now();
        store
            .insert_sensor_data_at(&upload(21.0), now - Duration::hours(2))
            .unwrap();
        store.insert_sensor_data_at(&upload(22.0), now).unwrap();

        let chart = load_chart(&store, SensorInterval::Day, Metric::Temperature, now).unwrap();
        assert!(chart.series.iter().all(|s| s.has_data()));

        let svg = generate_weather_plot(&store, SensorInterval::Day, Metric::Temperature, now).unwrap();
        assert!(svg.contains("central"));
        assert!(svg.contains("outdoor"));
    }
}
