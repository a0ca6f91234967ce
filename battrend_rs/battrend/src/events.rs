//! Align labeled events with the readings nearest to their start and end.

use chrono::NaiveDateTime;
use tracing::trace;

use super::{hours_between, Event, EventGradient, Lookup, Reading};

/// Below this many readings a scan is as fast as a search.
const BINARY_LOOKUP_MIN_LEN: usize = 64;

pub fn calculate_event_gradients(
    readings: &[Reading],
    events: &[Event],
    lookup: Lookup,
) -> Vec<EventGradient> {
    if readings.is_empty() {
        return Vec::new();
    }
    let lookup = resolve_lookup(readings, lookup);

    events
        .iter()
        .filter_map(|event| {
            let start_idx = nearest_resolved(readings, event.start(), lookup)?;
            let end_idx = nearest_resolved(readings, event.end(), lookup)?;
            let start = readings[start_idx];
            let end = readings[end_idx];
            let gradient = window_gradient(&start, &end);
            trace!(
                "event '{}' matched readings {}..{}: {:.2}%/h",
                event.label(),
                start_idx,
                end_idx,
                gradient
            );

            Some(EventGradient {
                label: event.label().to_string(),
                color: event.color().to_string(),
                start,
                end,
                gradient,
            })
        })
        .collect()
}

/// Unlike segment metrics, any non-positive span counts as flat here.
fn window_gradient(start: &Reading, end: &Reading) -> f64 {
    let span_h = hours_between(start.time, end.time);
    if span_h > 0.0 {
        (end.value as f64 - start.value as f64) / span_h
    } else {
        0.0
    }
}

fn resolve_lookup(readings: &[Reading], lookup: Lookup) -> Lookup {
    match lookup {
        Lookup::Auto => {
            if readings.len() >= BINARY_LOOKUP_MIN_LEN && is_sorted(readings) {
                Lookup::Binary
            } else {
                Lookup::Linear
            }
        }
        Lookup::Binary if !is_sorted(readings) => Lookup::Linear,
        other => other,
    }
}

fn is_sorted(readings: &[Reading]) -> bool {
    readings.windows(2).all(|w| w[0].time <= w[1].time)
}

/// Index of the reading closest in time to `target`; the earliest index wins ties.
///
/// `Lookup::Binary` is only honoured for time-sorted readings and otherwise
/// falls back to a scan, so every strategy returns the same index.
pub fn nearest_reading_index(
    readings: &[Reading],
    target: NaiveDateTime,
    lookup: Lookup,
) -> Option<usize> {
    nearest_resolved(readings, target, resolve_lookup(readings, lookup))
}

fn nearest_resolved(readings: &[Reading], target: NaiveDateTime, lookup: Lookup) -> Option<usize> {
    match lookup {
        Lookup::Binary => nearest_sorted(readings, target),
        _ => nearest_scan(readings, target),
    }
}

fn nearest_scan(readings: &[Reading], target: NaiveDateTime) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (idx, reading) in readings.iter().enumerate() {
        let distance = (reading.time - target).num_milliseconds().abs();
        match best {
            Some((_, d)) if d <= distance => {}
            _ => best = Some((idx, distance)),
        }
    }
    best.map(|(idx, _)| idx)
}

fn nearest_sorted(readings: &[Reading], target: NaiveDateTime) -> Option<usize> {
    if readings.is_empty() {
        return None;
    }
    let after = readings.partition_point(|r| r.time < target);
    if after == 0 {
        return Some(0);
    }
    // First of any duplicates of the preceding timestamp.
    let before_time = readings[after - 1].time;
    let before = readings.partition_point(|r| r.time < before_time);
    if after == readings.len() {
        return Some(before);
    }
    let d_before = (target - before_time).num_milliseconds();
    let d_after = (readings[after].time - target).num_milliseconds();
    if d_before <= d_after {
        Some(before)
    } else {
        Some(after)
    }
}
