use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{
    db::models::Reading,
    error::{Error, Result},
    store::ReadingStore,
};

/// Chart payloads are downsampled to roughly this many points.
pub const TARGET_POINTS: usize = 60;
/// Hard cap on aggregated output; chunk-size flooring can add a bucket.
pub const MAX_AGGREGATED_POINTS: usize = TARGET_POINTS + 5;
pub const DEFAULT_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Timescale
// ---------------------------------------------------------------------------

/// History window, parsed from the `1h|1d|1m|1y|all` query token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timescale {
    #[default]
    Hour,
    Day,
    /// 30 days
    Month,
    /// 365 days
    Year,
    All,
}

impl Timescale {
    /// Inclusive lower bound for the window ending at `now`; `None` for
    /// all-time.
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let span = match self {
            Timescale::Hour => Duration::hours(1),
            Timescale::Day => Duration::days(1),
            Timescale::Month => Duration::days(30),
            Timescale::Year => Duration::days(365),
            Timescale::All => return None,
        };
        Some(now - span)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timescale::Hour => "1h",
            Timescale::Day => "1d",
            Timescale::Month => "1m",
            Timescale::Year => "1y",
            Timescale::All => "all",
        }
    }
}

impl fmt::Display for Timescale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timescale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1h" => Ok(Self::Hour),
            "1d" => Ok(Self::Day),
            "1m" => Ok(Self::Month),
            "1y" => Ok(Self::Year),
            "all" => Ok(Self::All),
            other => Err(Error::validation(format!(
                "unknown timescale {other:?}, expected one of 1h, 1d, 1m, 1y, all"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Mean of one bucket of consecutive readings. A field with no sampled values
/// in the bucket stays `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPoint {
    /// Timestamp of the bucket's last reading.
    pub recorded_at: DateTime<Utc>,
    /// Key of the bucket's first reading.
    pub device_key: String,
    pub moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub ph: Option<f64>,
    pub light: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryPoint {
    Raw(Reading),
    Aggregated(AggregatedPoint),
}

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub timescale: Timescale,
    pub points: Vec<HistoryPoint>,
}

impl History {
    pub fn count(&self) -> usize {
        self.points.len()
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Produces chart-ready series with a bounded number of points.
///
/// Downsampling is fixed-fanout and lossy: same raw input, same output.
#[derive(Clone)]
pub struct HistoryAggregator {
    readings: Arc<dyn ReadingStore>,
}

impl HistoryAggregator {
    pub fn new(readings: Arc<dyn ReadingStore>) -> Self {
        Self { readings }
    }

    /// `limit` only trims all-time raw results (keeping the newest); it must
    /// be positive.
    pub async fn history(
        &self,
        device_key: Option<&str>,
        timescale: Timescale,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<History> {
        if limit == 0 {
            return Err(Error::validation("limit must be a positive integer"));
        }

        let mut raw = self.readings.query(device_key, timescale.since(now)).await?;
        raw.sort_by_key(Reading::ordering_key);
        debug!(device_key = ?device_key, %timescale, rows = raw.len(), "history query");

        Ok(History {
            timescale,
            points: downsample(raw, timescale, limit),
        })
    }
}

/// `raw` must already be in chronological order.
pub fn downsample(raw: Vec<Reading>, timescale: Timescale, limit: usize) -> Vec<HistoryPoint> {
    if timescale == Timescale::Hour || raw.len() <= TARGET_POINTS {
        let skip = match timescale {
            Timescale::All => raw.len().saturating_sub(limit),
            _ => 0,
        };
        return raw.into_iter().skip(skip).map(HistoryPoint::Raw).collect();
    }

    let chunk_size = raw.len() / TARGET_POINTS;
    raw.chunks(chunk_size)
        .map(|chunk| HistoryPoint::Aggregated(aggregate(chunk)))
        .take(MAX_AGGREGATED_POINTS)
        .collect()
}

/// Reduce a non-empty chunk to its per-field means.
fn aggregate(chunk: &[Reading]) -> AggregatedPoint {
    let first = &chunk[0];
    let last = &chunk[chunk.len() - 1];
    AggregatedPoint {
        recorded_at: last.recorded_at,
        device_key: first.device_key.clone(),
        moisture: mean(chunk.iter().filter_map(|r| r.moisture)),
        temperature: mean(chunk.iter().filter_map(|r| r.temperature)),
        humidity: mean(chunk.iter().filter_map(|r| r.humidity)),
        ph: mean(chunk.iter().filter_map(|r| r.ph)),
        light: mean(chunk.iter().filter_map(|r| r.light.map(|v| v as f64))),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{db::models::NewReading, store::MemoryReadingStore};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn reading(seq: i64, at: DateTime<Utc>, moisture: Option<f64>) -> Reading {
        Reading::from_new(
            seq,
            NewReading {
                device_key: "dev1".into(),
                recorded_at: at,
                moisture,
                ..NewReading::default()
            },
        )
    }

    /// `n` readings spread evenly over the `span` ending just before `now`.
    fn spread(n: usize, span: Duration) -> Vec<Reading> {
        let step = span / n as i32;
        (0..n)
            .map(|i| reading(i as i64, now() - span + step * i as i32, Some(i as f64)))
            .collect()
    }

    fn aggregated(points: &[HistoryPoint]) -> Vec<&AggregatedPoint> {
        points
            .iter()
            .map(|p| match p {
                HistoryPoint::Aggregated(a) => a,
                HistoryPoint::Raw(_) => panic!("expected aggregated point"),
            })
            .collect()
    }

    #[test]
    fn timescale_tokens_parse() {
        assert_eq!("1h".parse::<Timescale>().unwrap(), Timescale::Hour);
        assert_eq!("1d".parse::<Timescale>().unwrap(), Timescale::Day);
        assert_eq!("1m".parse::<Timescale>().unwrap(), Timescale::Month);
        assert_eq!("1y".parse::<Timescale>().unwrap(), Timescale::Year);
        assert_eq!("all".parse::<Timescale>().unwrap(), Timescale::All);
        assert!(matches!("2w".parse::<Timescale>(), Err(Error::Validation(_))));
        assert_eq!(Timescale::Month.to_string(), "1m");
    }

    #[test]
    fn windows_have_expected_lower_bounds() {
        assert_eq!(Timescale::Hour.since(now()), Some(now() - Duration::hours(1)));
        assert_eq!(Timescale::Month.since(now()), Some(now() - Duration::days(30)));
        assert_eq!(Timescale::Year.since(now()), Some(now() - Duration::days(365)));
        assert_eq!(Timescale::All.since(now()), None);
    }

    #[test]
    fn small_series_returned_unmodified() {
        let raw = spread(60, Duration::days(1));
        let out = downsample(raw.clone(), Timescale::Day, DEFAULT_LIMIT);
        assert_eq!(out, raw.into_iter().map(HistoryPoint::Raw).collect::<Vec<_>>());
    }

    #[test]
    fn last_hour_is_never_aggregated() {
        let raw = spread(500, Duration::hours(1));
        let out = downsample(raw, Timescale::Hour, 10);
        assert_eq!(out.len(), 500);
        assert!(out.iter().all(|p| matches!(p, HistoryPoint::Raw(_))));
    }

    #[test]
    fn all_time_raw_keeps_newest_up_to_limit() {
        let raw = spread(40, Duration::days(3));
        let out = downsample(raw.clone(), Timescale::All, 10);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], HistoryPoint::Raw(raw[30].clone()));
        assert_eq!(out[9], HistoryPoint::Raw(raw[39].clone()));
    }

    #[test]
    fn limit_is_ignored_for_bounded_windows() {
        let raw = spread(50, Duration::days(1));
        assert_eq!(downsample(raw, Timescale::Day, 5).len(), 50);
    }

    #[test]
    fn six_hundred_over_a_day_downsamples() {
        let raw = spread(600, Duration::days(1));
        let out = downsample(raw.clone(), Timescale::Day, DEFAULT_LIMIT);
        assert!(out.len() <= MAX_AGGREGATED_POINTS);
        assert_eq!(out.len(), 60);

        let points = aggregated(&out);
        // Chunk size 10: first bucket averages moisture 0..=9.
        assert_eq!(points[0].moisture, Some(4.5));
        assert_eq!(points[0].recorded_at, raw[9].recorded_at);
        assert_eq!(points[0].device_key, "dev1");
        assert_eq!(points[59].recorded_at, raw[599].recorded_at);
        assert!(points.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));
    }

    #[test]
    fn flooring_extra_bucket_is_capped() {
        // 119 / 60 floors to 1, so every reading is its own bucket.
        let raw = spread(119, Duration::days(1));
        let out = downsample(raw, Timescale::Day, DEFAULT_LIMIT);
        assert_eq!(out.len(), MAX_AGGREGATED_POINTS);
    }

    #[test]
    fn trailing_partial_chunk_is_its_own_bucket() {
        // 125 / 60 floors to 2: 62 full buckets plus a single-reading tail.
        let raw = spread(125, Duration::days(1));
        let out = downsample(raw.clone(), Timescale::Day, DEFAULT_LIMIT);
        assert_eq!(out.len(), 63);
        let last = aggregated(&out)[62];
        assert_eq!(last.moisture, Some(124.0));
        assert_eq!(last.recorded_at, raw[124].recorded_at);
    }

    #[test]
    fn mean_skips_absent_values() {
        let t = now();
        let chunk = vec![
            reading(1, t, Some(10.0)),
            reading(2, t, Some(20.0)),
            reading(3, t, None),
        ];
        let p = aggregate(&chunk);
        assert_eq!(p.moisture, Some(15.0));
        assert_eq!(p.temperature, None);
        assert_eq!(p.light, None);
    }

    #[test]
    fn light_mean_is_fractional() {
        let t = now();
        let mut a = reading(1, t, None);
        a.light = Some(300);
        let mut b = reading(2, t, None);
        b.light = Some(301);
        assert_eq!(aggregate(&[a, b]).light, Some(300.5));
    }

    #[tokio::test]
    async fn history_sorts_and_filters_through_the_store() {
        let store = MemoryReadingStore::new();
        for mins in [30, 10, 50, 90] {
            store
                .append(NewReading {
                    device_key: "dev1".into(),
                    recorded_at: now() - Duration::minutes(mins),
                    moisture: Some(mins as f64),
                    ..NewReading::default()
                })
                .await
                .unwrap();
        }
        let agg = HistoryAggregator::new(Arc::new(store));
        let h = agg.history(Some("dev1"), Timescale::Hour, DEFAULT_LIMIT, now()).await.unwrap();

        assert_eq!(h.count(), 3);
        let moistures: Vec<_> = h
            .points
            .iter()
            .map(|p| match p {
                HistoryPoint::Raw(r) => r.moisture.unwrap(),
                HistoryPoint::Aggregated(_) => panic!("unexpected aggregate"),
            })
            .collect();
        assert_eq!(moistures, vec![50.0, 30.0, 10.0]);
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let agg = HistoryAggregator::new(Arc::new(MemoryReadingStore::new()));
        let err = agg.history(None, Timescale::All, 0, now()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
