//! Core battery trend analysis library: segmentation, gradient statistics,
//! event alignment and linear drain prediction over battery readings.

use std::path::PathBuf;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod events;
pub mod loader;
pub mod parse;
pub mod predict;
pub mod segment;
pub mod usage;

pub use events::{calculate_event_gradients, nearest_reading_index};
pub use loader::{load_events_csv, load_readings_csv, read_events, read_readings};
pub use parse::{parse_readings, parse_readings_detailed, LineError, SkippedLine};
pub use predict::{format_time_left, predict_drain, DrainPrediction, PredictionBasis};
pub use segment::{calculate_segment_metrics, calculate_segments, Segment, SegmentMetrics};
pub use usage::recent_usage_gradient;

#[derive(Error, Debug)]
pub enum BtError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} row {row}: {reason}")]
    InvalidRow {
        path: String,
        row: usize,
        reason: String,
    },
    #[error("event duration must be non-negative (got {0} min)")]
    NegativeDuration(f64),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// One battery observation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reading {
    pub time: NaiveDateTime,
    pub value: i64,
}

impl Reading {
    pub fn new(time: NaiveDateTime, value: i64) -> Self {
        Self { time, value }
    }
}

/// A labeled real-world occurrence correlated against the readings.
///
/// Events are immutable once built; the end time is computed from the start
/// and the (non-negative) duration up front, so it is always representable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    label: String,
    color: String,
    start: NaiveDateTime,
    duration: TimeDelta,
    end: NaiveDateTime,
}

impl Event {
    pub fn new(
        label: impl Into<String>,
        color: impl Into<String>,
        start: NaiveDateTime,
        duration_minutes: i64,
    ) -> Result<Self, BtError> {
        if duration_minutes < 0 {
            return Err(BtError::NegativeDuration(duration_minutes as f64));
        }
        let duration = TimeDelta::try_minutes(duration_minutes).ok_or_else(|| {
            BtError::InvalidParameter(format!("event duration {duration_minutes} min out of range"))
        })?;
        Self::with_duration(label.into(), color.into(), start, duration)
    }

    /// Like [`Event::new`], for fractional minutes (rounded to the second).
    pub fn from_minutes_f64(
        label: impl Into<String>,
        color: impl Into<String>,
        start: NaiveDateTime,
        duration_minutes: f64,
    ) -> Result<Self, BtError> {
        if duration_minutes < 0.0 {
            return Err(BtError::NegativeDuration(duration_minutes));
        }
        let duration = Some(duration_minutes)
            .filter(|m| m.is_finite())
            .and_then(|m| TimeDelta::try_seconds((m * 60.0).round() as i64))
            .ok_or_else(|| {
                BtError::InvalidParameter(format!(
                    "event duration {duration_minutes} min out of range"
                ))
            })?;
        Self::with_duration(label.into(), color.into(), start, duration)
    }

    fn with_duration(
        label: String,
        color: String,
        start: NaiveDateTime,
        duration: TimeDelta,
    ) -> Result<Self, BtError> {
        let end = start.checked_add_signed(duration).ok_or_else(|| {
            BtError::InvalidParameter(format!(
                "event '{label}' ends outside the representable date range"
            ))
        })?;
        Ok(Self {
            label,
            color,
            start,
            duration,
            end,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Display color; opaque to the analysis.
    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn duration(&self) -> TimeDelta {
        self.duration
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }
}

/// Gradient observed across an event window, taken between the readings
/// nearest to the event's start and end.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventGradient {
    pub label: String,
    pub color: String,
    pub start: Reading,
    pub end: Reading,
    pub gradient: f64,
}

/// Strategy for the nearest-timestamp search used by the event aligner.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Lookup {
    Auto,
    Linear,
    Binary,
}

impl Default for Lookup {
    fn default() -> Self {
        Lookup::Auto
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    pub usage_window_hours: f64,
    pub lookup: Lookup,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            usage_window_hours: 48.0,
            lookup: Lookup::Auto,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), BtError> {
        if !self.usage_window_hours.is_finite() || self.usage_window_hours <= 0.0 {
            return Err(BtError::InvalidParameter(format!(
                "usage window must be a positive number of hours (got {})",
                self.usage_window_hours
            )));
        }
        Ok(())
    }
}

/// Everything the renderer needs, produced by [`analyze`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub readings: Vec<Reading>,
    pub segments: Vec<Segment>,
    pub segment_metrics: Vec<SegmentMetrics>,
    pub event_gradients: Vec<EventGradient>,
    pub trend_gradient: f64,
    pub usage_gradient: f64,
    pub predictions: Vec<DrainPrediction>,
}

/// Run the full pipeline over one immutable input.
pub fn analyze(
    readings: Vec<Reading>,
    events: &[Event],
    params: &Params,
) -> Result<Report, BtError> {
    params.validate()?;

    let segments = calculate_segments(&readings);
    let segment_metrics = calculate_segment_metrics(&segments);
    let event_gradients = calculate_event_gradients(&readings, events, params.lookup);

    let trend_gradient = segment_metrics
        .last()
        .map(|m| m.avg_gradient)
        .unwrap_or(0.0);
    let usage_gradient = recent_usage_gradient(&readings, params.usage_window_hours);

    let mut predictions = Vec::new();
    if let Some(last) = readings.last() {
        for (basis, gradient) in [
            (PredictionBasis::CurrentTrend, trend_gradient),
            (PredictionBasis::RecentUsage, usage_gradient),
        ] {
            if let Some(prediction) = predict_drain(last, gradient, basis) {
                predictions.push(prediction);
            }
        }
    }

    debug!(
        readings = readings.len(),
        segments = segments.len(),
        events = event_gradients.len(),
        predictions = predictions.len(),
        "analysis complete: trend {:.2}%/h, usage {:.2}%/h",
        trend_gradient,
        usage_gradient
    );

    Ok(Report {
        readings,
        segments,
        segment_metrics,
        event_gradients,
        trend_gradient,
        usage_gradient,
        predictions,
    })
}

/// Signed span between two timestamps in fractional hours.
pub fn hours_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

    use super::Reading;

    pub fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 24)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    pub fn at_minutes(minutes: i64) -> NaiveDateTime {
        base_time() + TimeDelta::minutes(minutes)
    }

    /// Readings spaced `step_min` minutes apart starting at the base time.
    pub fn readings_every(step_min: i64, values: &[i64]) -> Vec<Reading> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Reading::new(at_minutes(i as i64 * step_min), v))
            .collect()
    }
}
