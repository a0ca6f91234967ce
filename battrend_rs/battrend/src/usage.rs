use chrono::TimeDelta;
use ndarray::Array1;

use super::{hours_between, Reading};

/// Mean discharge gradient over the trailing `window_hours` before the last
/// reading.
///
/// Only pairs with a positive time step and a gradient `<= 0` count, so
/// charging intervals never pull the estimate towards zero. Returns 0 when
/// nothing qualifies.
pub fn recent_usage_gradient(readings: &[Reading], window_hours: f64) -> f64 {
    if readings.len() < 2 {
        return 0.0;
    }
    let end = readings[readings.len() - 1].time;
    let window_ms = (window_hours * 3_600_000.0).round() as i64;
    let window_start = TimeDelta::try_milliseconds(window_ms)
        .and_then(|w| end.checked_sub_signed(w));

    let recent: Vec<&Reading> = readings
        .iter()
        .filter(|r| window_start.map_or(true, |start| r.time >= start))
        .collect();

    let usage: Vec<f64> = recent
        .windows(2)
        .filter_map(|w| {
            let dt = hours_between(w[0].time, w[1].time);
            if dt <= 0.0 {
                return None;
            }
            let gradient = (w[1].value as f64 - w[0].value as f64) / dt;
            (gradient <= 0.0).then_some(gradient)
        })
        .collect();

    Array1::from_vec(usage).mean().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at_minutes, readings_every};

    #[test]
    fn test_charging_pairs_are_excluded() {
        let readings = readings_every(60, &[50, 40, 45, 35]);
        assert!((recent_usage_gradient(&readings, 48.0) + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_input_is_zero() {
        assert_eq!(recent_usage_gradient(&[], 48.0), 0.0);
        assert_eq!(recent_usage_gradient(&readings_every(60, &[50]), 48.0), 0.0);
    }

    #[test]
    fn test_only_charging_is_zero() {
        let readings = readings_every(30, &[10, 20, 35]);
        assert_eq!(recent_usage_gradient(&readings, 48.0), 0.0);
    }

    #[test]
    fn test_flat_pairs_count_as_usage() {
        // -20/h then 0/h
        let readings = readings_every(30, &[50, 40, 40]);
        assert!((recent_usage_gradient(&readings, 48.0) + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_drops_old_readings() {
        let readings = vec![
            Reading::new(at_minutes(0), 100),
            Reading::new(at_minutes(60), 10),
            Reading::new(at_minutes(49 * 60), 90),
            Reading::new(at_minutes(50 * 60), 80),
            Reading::new(at_minutes(51 * 60), 76),
        ];
        // Readings from 3h onwards are in the 48h window: -10 and -4.
        assert!((recent_usage_gradient(&readings, 48.0) + 7.0).abs() < 1e-9);
        // A wider window reaches back to the -90/h drop.
        let wide = recent_usage_gradient(&readings, 51.0);
        assert!((wide - (-90.0 - 10.0 - 4.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_start_is_inclusive() {
        // The reading exactly 48h before the last one is kept.
        let readings = vec![
            Reading::new(at_minutes(0), 60),
            Reading::new(at_minutes(48 * 60), 12),
        ];
        assert!((recent_usage_gradient(&readings, 48.0) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_timestamps_are_skipped() {
        let readings = vec![
            Reading::new(at_minutes(0), 60),
            Reading::new(at_minutes(0), 58),
            Reading::new(at_minutes(30), 53),
        ];
        assert!((recent_usage_gradient(&readings, 48.0) + 10.0).abs() < 1e-9);
    }
}
