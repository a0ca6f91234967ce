use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Reading;

/// Which gradient a drain prediction was extrapolated from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PredictionBasis {
    /// Average gradient of the most recent segment.
    CurrentTrend,
    /// Discharge-only mean over the trailing usage window.
    RecentUsage,
}

impl PredictionBasis {
    pub fn label(&self) -> &'static str {
        match self {
            PredictionBasis::CurrentTrend => "Current trend",
            PredictionBasis::RecentUsage => "Recent usage",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DrainPrediction {
    pub basis: PredictionBasis,
    pub gradient: f64,
    pub from: Reading,
    pub hours_to_drain: f64,
    pub drain_time: NaiveDateTime,
}

/// Extrapolate linearly from `last` to zero charge.
///
/// Only a strictly negative gradient drains the battery; anything else
/// yields `None`.
pub fn predict_drain(
    last: &Reading,
    gradient: f64,
    basis: PredictionBasis,
) -> Option<DrainPrediction> {
    if gradient.is_nan() || gradient >= 0.0 {
        return None;
    }
    let hours_to_drain = -(last.value as f64) / gradient;
    let drain_time = TimeDelta::try_milliseconds((hours_to_drain * 3_600_000.0).round() as i64)
        .and_then(|offset| last.time.checked_add_signed(offset));
    let Some(drain_time) = drain_time else {
        debug!(
            "{} prediction out of range ({:.3e} h at {:.4}%/h)",
            basis.label(),
            hours_to_drain,
            gradient
        );
        return None;
    };
    Some(DrainPrediction {
        basis,
        gradient,
        from: *last,
        hours_to_drain,
        drain_time,
    })
}

/// Render a drain horizon as `"{h}h {m}m"`, counting whole days as hours.
pub fn format_time_left(hours: f64) -> String {
    let total_minutes = (hours.max(0.0) * 60.0).round() as u64;
    format!("{}h {}m", total_minutes / 60, total_minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::at_minutes;

    #[test]
    fn test_drain_from_ten_percent() {
        let last = Reading::new(at_minutes(0), 10);
        let p = predict_drain(&last, -5.0, PredictionBasis::CurrentTrend).unwrap();
        assert_eq!(p.hours_to_drain, 2.0);
        assert_eq!(p.drain_time, at_minutes(120));
        assert_eq!(p.from, last);
    }

    #[test]
    fn test_non_negative_gradients_never_predict() {
        let last = Reading::new(at_minutes(0), 10);
        assert!(predict_drain(&last, 0.0, PredictionBasis::CurrentTrend).is_none());
        assert!(predict_drain(&last, 3.0, PredictionBasis::RecentUsage).is_none());
        assert!(predict_drain(&last, f64::NAN, PredictionBasis::RecentUsage).is_none());
    }

    #[test]
    fn test_unrepresentable_drain_time_is_dropped() {
        let last = Reading::new(at_minutes(0), 50);
        assert!(predict_drain(&last, -1e-300, PredictionBasis::RecentUsage).is_none());
    }

    #[test]
    fn test_format_time_left_keeps_days() {
        assert_eq!(format_time_left(2.0), "2h 0m");
        assert_eq!(format_time_left(26.5), "26h 30m");
        assert_eq!(format_time_left(0.0), "0h 0m");
    }
}
