//! Price history store and derived statistics.
//!
//! Append-only, per-fingerprint series of observed prices. Appends are
//! serialized by the write lock; readers always see a monotonically
//! growing, time-ordered series. History outlives individual offers; a
//! maintenance job prunes points past the archival horizon, and a
//! fingerprint's stats survive as long as any history remains.

use crate::catalog::{SaleEvent, SALE_EVENTS};
use crate::models::{PricePoint, PricePrediction, PriceStats, TrendDirection};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Minimum samples before the trend classifier has anything to say.
const MIN_TREND_SAMPLES: usize = 7;

fn confidence_for(samples: usize) -> u8 {
    (20 + 5 * samples).min(100) as u8
}

pub struct PriceHistoryStore {
    series: RwLock<FxHashMap<String, Vec<PricePoint>>>,
    all_time_low_tolerance: f64,
}

impl PriceHistoryStore {
    pub fn new(all_time_low_tolerance: f64) -> Self {
        Self {
            series: RwLock::new(FxHashMap::default()),
            all_time_low_tolerance,
        }
    }

    /// Record an observed price. Points are kept in chronological order
    /// even when sources deliver them late.
    pub fn append(&self, point: PricePoint) {
        let mut series = self.series.write();
        let points = series.entry(point.fingerprint.clone()).or_default();
        let at = points.partition_point(|p| p.observed_at <= point.observed_at);
        points.insert(at, point);
    }

    /// Chronological series for a fingerprint, optionally bounded below.
    pub fn series_for(&self, fingerprint: &str, since: Option<DateTime<Utc>>) -> Vec<PricePoint> {
        let series = self.series.read();
        let Some(points) = series.get(fingerprint) else {
            return Vec::new();
        };
        match since {
            Some(cutoff) => points
                .iter()
                .filter(|p| p.observed_at >= cutoff)
                .cloned()
                .collect(),
            None => points.clone(),
        }
    }

    pub fn fingerprint_count(&self) -> usize {
        self.series.read().len()
    }

    /// Derive statistics for a fingerprint against a current price.
    pub fn stats_for(&self, fingerprint: &str, current: f64) -> PriceStats {
        self.stats_at(fingerprint, current, Utc::now())
    }

    /// As `stats_for`, with an explicit clock for deterministic windows.
    pub fn stats_at(&self, fingerprint: &str, current: f64, now: DateTime<Utc>) -> PriceStats {
        let series = self.series.read();
        let points = series.get(fingerprint).map(Vec::as_slice).unwrap_or(&[]);

        if points.is_empty() {
            return PriceStats {
                current,
                average_7d: current,
                average_30d: current,
                average_90d: current,
                lowest: current,
                lowest_at: now,
                highest: current,
                highest_at: now,
                change_7d_percent: 0.0,
                change_30d_percent: 0.0,
                is_at_all_time_low: true,
                confidence: confidence_for(0),
                sample_count: 0,
            };
        }

        let average = |days: i64| -> f64 {
            let cutoff = now - Duration::days(days);
            let window: Vec<f64> = points
                .iter()
                .filter(|p| p.observed_at >= cutoff)
                .map(|p| p.price)
                .collect();
            if window.is_empty() {
                current
            } else {
                window.iter().sum::<f64>() / window.len() as f64
            }
        };

        // Percent change measured from the oldest point inside the window.
        let change = |days: i64| -> f64 {
            let cutoff = now - Duration::days(days);
            points
                .iter()
                .find(|p| p.observed_at >= cutoff)
                .map(|oldest| (current - oldest.price) / oldest.price * 100.0)
                .unwrap_or(0.0)
        };

        let mut lowest = &points[0];
        let mut highest = &points[0];
        for point in points {
            if point.price < lowest.price {
                lowest = point;
            }
            if point.price > highest.price {
                highest = point;
            }
        }

        PriceStats {
            current,
            average_7d: average(7),
            average_30d: average(30),
            average_90d: average(90),
            lowest: lowest.price,
            lowest_at: lowest.observed_at,
            highest: highest.price,
            highest_at: highest.observed_at,
            change_7d_percent: change(7),
            change_30d_percent: change(30),
            is_at_all_time_low: current <= lowest.price * self.all_time_low_tolerance,
            confidence: confidence_for(points.len()),
            sample_count: points.len(),
        }
    }

    /// Classify the short-term direction of a series.
    pub fn predict(&self, fingerprint: &str) -> PricePrediction {
        self.predict_at(fingerprint, Utc::now(), SALE_EVENTS)
    }

    /// As `predict`, with an explicit clock and sale-event calendar.
    pub fn predict_at(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        calendar: &[SaleEvent],
    ) -> PricePrediction {
        let series = self.series.read();
        let points = series.get(fingerprint).map(Vec::as_slice).unwrap_or(&[]);
        let samples = points.len();

        if samples < MIN_TREND_SAMPLES {
            return PricePrediction::stable(10, samples);
        }

        // A recognized sale event inside its lead window forces a drop.
        if let Some((event, days_until)) = next_event_in_window(now, calendar) {
            return PricePrediction {
                direction: TrendDirection::Down,
                predicted_change_percent: event.expected_discount_percent,
                confidence: 70,
                suggested_wait_days: Some(days_until),
                sample_count: samples,
            };
        }

        let current = points[samples - 1].price;
        let slope = |days: i64| -> f64 {
            let cutoff = now - Duration::days(days);
            points
                .iter()
                .find(|p| p.observed_at >= cutoff)
                .map(|oldest| (current - oldest.price) / oldest.price * 100.0 / days as f64)
                .unwrap_or(0.0)
        };
        let slope_7d = slope(7);
        let slope_30d = slope(30);

        let direction = if slope_7d < -2.0 && slope_30d < -1.0 {
            TrendDirection::Down
        } else if slope_7d > 2.0 && slope_30d > 1.0 {
            TrendDirection::Up
        } else {
            TrendDirection::Stable
        };

        let predicted_change_percent = match direction {
            TrendDirection::Stable => 0.0,
            // One-week projection of the 30-day slope.
            _ => (slope_30d * 7.0 * 10.0).round().abs() / 10.0,
        };

        PricePrediction {
            direction,
            predicted_change_percent,
            confidence: confidence_for(samples),
            suggested_wait_days: None,
            sample_count: samples,
        }
    }

    /// Drop points observed before the cutoff. Returns how many points
    /// were removed; fingerprints left with no history are forgotten.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut series = self.series.write();
        let mut removed = 0;
        series.retain(|_, points| {
            let before = points.len();
            points.retain(|p| p.observed_at >= cutoff);
            removed += before - points.len();
            !points.is_empty()
        });
        removed
    }
}

fn next_event_in_window(now: DateTime<Utc>, calendar: &[SaleEvent]) -> Option<(SaleEvent, i64)> {
    let today = now.date_naive();
    calendar
        .iter()
        .filter_map(|event| {
            // Calendar months are 0-indexed; chrono's are 1-indexed.
            let mut date = NaiveDate::from_ymd_opt(today.year(), event.month + 1, event.day)?;
            if date < today {
                date = NaiveDate::from_ymd_opt(today.year() + 1, event.month + 1, event.day)?;
            }
            let days = (date - today).num_days();
            (days <= event.window_days).then_some((*event, days))
        })
        .min_by_key(|(_, days)| *days)
}
