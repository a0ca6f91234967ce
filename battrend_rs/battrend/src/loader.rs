//! Tabular loader for readings and events exported from a spreadsheet.
//!
//! Loading is all-or-nothing: any unreadable file or bad row fails the whole
//! table, so callers never see a partial dataset.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::debug;

use super::parse::{parse_clock, parse_dotted_date};
use super::{BtError, Event, Reading};

#[derive(Debug, Deserialize)]
struct ReadingRow {
    #[serde(rename = "Date")]
    date: Option<String>,
    #[serde(rename = "Time")]
    time: String,
    #[serde(rename = "Battery")]
    battery: String,
}

#[derive(Debug, Deserialize)]
struct EventRow {
    #[serde(rename = "Label")]
    label: String,
    #[serde(rename = "Color")]
    color: String,
    #[serde(rename = "Start Date")]
    start_date: String,
    #[serde(rename = "Start Time")]
    start_time: String,
    #[serde(rename = "Duration [min]")]
    duration_min: String,
}

pub fn load_readings_csv(path: &Path) -> Result<Vec<Reading>, BtError> {
    let file = open(path)?;
    read_readings(file, &path.display().to_string())
}

pub fn load_events_csv(path: &Path) -> Result<Vec<Event>, BtError> {
    let file = open(path)?;
    read_events(file, &path.display().to_string())
}

fn open(path: &Path) -> Result<File, BtError> {
    File::open(path).map_err(|source| BtError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a `Date,Time,Battery` table. Empty date cells repeat the date above.
pub fn read_readings<R: Read>(reader: R, source: &str) -> Result<Vec<Reading>, BtError> {
    let mut rdr = csv_reader(reader);
    let mut out = Vec::new();
    let mut current_date: Option<NaiveDate> = None;

    for (idx, row) in rdr.deserialize::<ReadingRow>().enumerate() {
        let row_no = idx + 2;
        let invalid = |reason: String| BtError::InvalidRow {
            path: source.to_string(),
            row: row_no,
            reason,
        };
        let row = row.map_err(|e| invalid(e.to_string()))?;

        if let Some(date) = row.date.as_deref() {
            current_date = Some(parse_table_date(date).map_err(invalid)?);
        }
        let date = current_date
            .ok_or_else(|| invalid("missing date with nothing to carry forward".into()))?;
        let time = parse_clock(&row.time).map_err(|e| invalid(e.to_string()))?;
        let value = parse_whole_number(&row.battery).map_err(invalid)?;
        out.push(Reading::new(date.and_time(time), value));
    }

    debug!("Loaded {} readings from {}", out.len(), source);
    Ok(out)
}

/// Read a `Label,Color,Start Date,Start Time,Duration [min]` table.
pub fn read_events<R: Read>(reader: R, source: &str) -> Result<Vec<Event>, BtError> {
    let mut rdr = csv_reader(reader);
    let mut out = Vec::new();

    for (idx, row) in rdr.deserialize::<EventRow>().enumerate() {
        let row_no = idx + 2;
        let invalid = |reason: String| BtError::InvalidRow {
            path: source.to_string(),
            row: row_no,
            reason,
        };
        let row = row.map_err(|e| invalid(e.to_string()))?;

        let date = parse_table_date(&row.start_date).map_err(invalid)?;
        let time = parse_clock(&row.start_time).map_err(|e| invalid(e.to_string()))?;
        let minutes = parse_minutes(&row.duration_min).map_err(invalid)?;
        let event = Event::from_minutes_f64(row.label, row.color, date.and_time(time), minutes)
            .map_err(|e| invalid(e.to_string()))?;
        out.push(event);
    }

    debug!("Loaded {} events from {}", out.len(), source);
    Ok(out)
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(reader)
}

/// Spreadsheet exports write `YYYY-MM-DD` (sometimes with a midnight time);
/// hand-written tables use `D.M.YYYY`.
fn parse_table_date(token: &str) -> Result<NaiveDate, String> {
    let token = token.trim();
    NaiveDate::parse_from_str(token, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(token, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| parse_dotted_date(token))
        .map_err(|_| format!("invalid date '{}'", token))
}

/// Integers, or floats with no fractional part (`47.0`).
fn parse_whole_number(token: &str) -> Result<i64, String> {
    let token = token.trim();
    if let Ok(v) = token.parse::<i64>() {
        return Ok(v);
    }
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(v as i64),
        _ => Err(format!("invalid number '{}'", token)),
    }
}

fn parse_minutes(token: &str) -> Result<f64, String> {
    let token = token.trim();
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("invalid duration '{}'", token)),
    }
}
