use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::{hours_between, Reading};

/// Contiguous run of readings between two consecutive trend reversals.
///
/// Boundary readings are shared: the last reading of one segment is the
/// first reading of the next.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    readings: Vec<Reading>,
}

impl Segment {
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn start(&self) -> &Reading {
        &self.readings[0]
    }

    pub fn end(&self) -> &Reading {
        &self.readings[self.readings.len() - 1]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentMetrics {
    pub start: Reading,
    pub end: Reading,
    pub reading_count: usize,
    /// Percent per hour between the segment endpoints.
    pub avg_gradient: f64,
    /// Population standard deviation of the consecutive sub-gradients.
    pub variability: f64,
}

/// Split readings at every strict slope-sign reversal.
///
/// A zero delta on either side of a reading never splits, so plateaus stay
/// attached to the trend they interrupt. Fewer than two readings produce no
/// segments.
pub fn calculate_segments(readings: &[Reading]) -> Vec<Segment> {
    let mut segments = Vec::new();
    if readings.len() < 2 {
        return segments;
    }

    let mut current = vec![readings[0]];
    for w in readings.windows(3) {
        let (prev, here, next) = (w[0], w[1], w[2]);
        let trend_prev = here.value.cmp(&prev.value) as i8;
        let trend_next = next.value.cmp(&here.value) as i8;
        current.push(here);
        if trend_prev * trend_next < 0 {
            segments.push(Segment {
                readings: std::mem::replace(&mut current, vec![here]),
            });
        }
    }
    current.push(readings[readings.len() - 1]);
    segments.push(Segment { readings: current });
    segments
}

pub fn calculate_segment_metrics(segments: &[Segment]) -> Vec<SegmentMetrics> {
    segments.iter().map(segment_metrics).collect()
}

fn segment_metrics(segment: &Segment) -> SegmentMetrics {
    let start = *segment.start();
    let end = *segment.end();

    let span_h = hours_between(start.time, end.time);
    let avg_gradient = if span_h != 0.0 {
        (end.value as f64 - start.value as f64) / span_h
    } else {
        0.0
    };

    let sub_gradients: Vec<f64> = segment
        .readings
        .windows(2)
        .filter_map(|w| {
            let dt = hours_between(w[0].time, w[1].time);
            (dt > 0.0).then(|| (w[1].value as f64 - w[0].value as f64) / dt)
        })
        .collect();
    let variability = if sub_gradients.is_empty() {
        0.0
    } else {
        Array1::from_vec(sub_gradients).std(0.0)
    };

    SegmentMetrics {
        start,
        end,
        reading_count: segment.readings.len(),
        avg_gradient,
        variability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at_minutes, readings_every};

    fn values(segment: &Segment) -> Vec<i64> {
        segment.readings().iter().map(|r| r.value).collect()
    }

    #[test]
    fn test_short_input_has_no_segments() {
        assert!(calculate_segments(&[]).is_empty());
        assert!(calculate_segments(&readings_every(10, &[40])).is_empty());
    }

    #[test]
    fn test_two_readings_form_one_segment() {
        let segments = calculate_segments(&readings_every(10, &[40, 38]));
        assert_eq!(segments.len(), 1);
        assert_eq!(values(&segments[0]), vec![40, 38]);
    }

    #[test]
    fn test_monotonic_run_is_one_segment() {
        let input = readings_every(10, &[90, 80, 75, 60, 41, 12]);
        let segments = calculate_segments(&input);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].readings(), input.as_slice());
    }

    #[test]
    fn test_single_extremum_splits_into_two_sharing_it() {
        let input = readings_every(10, &[30, 20, 10, 50, 80]);
        let segments = calculate_segments(&input);
        assert_eq!(segments.len(), 2);
        assert_eq!(values(&segments[0]), vec![30, 20, 10]);
        assert_eq!(values(&segments[1]), vec![10, 50, 80]);
        assert_eq!(segments[0].end(), segments[1].start());
    }

    #[test]
    fn test_plateaus_never_split() {
        let segments = calculate_segments(&readings_every(10, &[40, 37, 37, 45, 45, 30]));
        // 37->37->45 and 45->45->30 have a zero delta, so nothing reverses strictly.
        assert_eq!(segments.len(), 1);

        let segments = calculate_segments(&readings_every(10, &[40, 37, 37, 36, 50]));
        assert_eq!(segments.len(), 2);
        assert_eq!(values(&segments[0]), vec![40, 37, 37, 36]);
        assert_eq!(values(&segments[1]), vec![36, 50]);
    }

    #[test]
    fn test_union_reconstructs_input_with_shared_boundaries() {
        let input = readings_every(15, &[50, 45, 60, 58, 58, 70, 20, 25, 10]);
        let segments = calculate_segments(&input);
        assert!(segments.len() > 2);

        let mut rebuilt: Vec<Reading> = segments[0].readings().to_vec();
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
            rebuilt.extend_from_slice(&pair[1].readings()[1..]);
        }
        assert_eq!(rebuilt, input);
        for segment in &segments {
            assert!(segment.readings().len() >= 2);
        }
    }

    #[test]
    fn test_metrics_gradient_and_variability() {
        // 0 -> 60 min: -10, 60 -> 90 min: -10 over 0.5 h = -20/h
        let input = vec![
            Reading::new(at_minutes(0), 50),
            Reading::new(at_minutes(60), 40),
            Reading::new(at_minutes(90), 30),
        ];
        let metrics = calculate_segment_metrics(&calculate_segments(&input));
        assert_eq!(metrics.len(), 1);
        let m = &metrics[0];
        assert_eq!(m.reading_count, 3);
        assert!((m.avg_gradient - (-20.0 / 1.5)).abs() < 1e-9);
        // sub-gradients -10 and -20: population std is 5
        assert!((m.variability - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_gradient_sign_follows_endpoints() {
        let input = readings_every(20, &[10, 30, 40, 35, 5, 6, 90]);
        for m in calculate_segment_metrics(&calculate_segments(&input)) {
            let delta = m.end.value - m.start.value;
            assert_eq!(m.avg_gradient.signum(), (delta as f64).signum());
            assert!(m.variability >= 0.0);
        }
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        let input = readings_every(60, &[i64::MAX, -2, 5]);
        let segments = calculate_segments(&input);
        assert_eq!(segments.len(), 2);
        assert_eq!(values(&segments[0]), vec![i64::MAX, -2]);
        let metrics = calculate_segment_metrics(&segments);
        assert!(metrics[0].avg_gradient < 0.0);
        assert!(metrics[0].avg_gradient.is_finite());
        assert!((metrics[1].avg_gradient - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_two_reading_segment_has_zero_variability() {
        let metrics = calculate_segment_metrics(&calculate_segments(&readings_every(10, &[10, 30])));
        assert_eq!(metrics[0].variability, 0.0);
        assert!((metrics[0].avg_gradient - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_span_segment_is_flat() {
        let input = vec![
            Reading::new(at_minutes(5), 40),
            Reading::new(at_minutes(5), 35),
        ];
        let metrics = calculate_segment_metrics(&calculate_segments(&input));
        assert_eq!(metrics[0].avg_gradient, 0.0);
        assert_eq!(metrics[0].variability, 0.0);
    }

    #[test]
    fn test_negative_span_still_yields_gradient() {
        // Segment metrics only guard against an exactly zero span; event
        // gradients additionally zero out negative spans.
        let input = vec![
            Reading::new(at_minutes(60), 40),
            Reading::new(at_minutes(0), 30),
        ];
        let metrics = calculate_segment_metrics(&calculate_segments(&input));
        assert!((metrics[0].avg_gradient - 10.0).abs() < 1e-9);
        assert_eq!(metrics[0].variability, 0.0);
    }
}
