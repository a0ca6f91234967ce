//! Line parser for `<D.M.YYYY> <HHMM> <value>` battery logs.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use tracing::warn;

use super::Reading;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("expected 3 fields (date, time, value), found {0}")]
    FieldCount(usize),
    #[error("invalid date '{0}'")]
    Date(String),
    #[error("invalid time '{0}'")]
    Time(String),
    #[error("invalid value '{0}'")]
    Value(String),
}

/// A line dropped by the parser, with its 1-based position in the trimmed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line_no: usize,
    pub line: String,
    pub error: LineError,
}

/// Parse battery readings, skipping malformed lines.
pub fn parse_readings(raw: &str) -> Vec<Reading> {
    parse_readings_detailed(raw).0
}

/// Parse battery readings and also return every skipped line.
///
/// Readings keep input order. Each skipped line is logged as a warning and
/// parsing carries on with the next one.
pub fn parse_readings_detailed(raw: &str) -> (Vec<Reading>, Vec<SkippedLine>) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let mut readings = Vec::new();
    let mut skipped = Vec::new();
    for (idx, line) in trimmed.lines().enumerate() {
        match parse_line(line) {
            Ok(reading) => readings.push(reading),
            Err(error) => {
                warn!("Skipping malformed line {}: '{}' ({})", idx + 1, line.trim(), error);
                skipped.push(SkippedLine {
                    line_no: idx + 1,
                    line: line.to_string(),
                    error,
                });
            }
        }
    }
    (readings, skipped)
}

fn parse_line(line: &str) -> Result<Reading, LineError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [date, time, value] = fields.as_slice() else {
        return Err(LineError::FieldCount(fields.len()));
    };
    let time = parse_timestamp(date, time)?;
    let value: i64 = value
        .parse()
        .map_err(|_| LineError::Value(value.to_string()))?;
    Ok(Reading::new(time, value))
}

/// Combine a `D.M.YYYY` date token and an `HHMM` time token.
pub fn parse_timestamp(date: &str, time: &str) -> Result<NaiveDateTime, LineError> {
    let date = parse_dotted_date(date)?;
    let time = parse_compact_clock(time)?;
    Ok(date.and_time(time))
}

pub(crate) fn parse_dotted_date(token: &str) -> Result<NaiveDate, LineError> {
    NaiveDate::parse_from_str(token.trim(), "%d.%m.%Y")
        .map_err(|_| LineError::Date(token.to_string()))
}

/// Digits-only `HHMM` with one- or two-digit fields.
///
/// The hour takes two digits when they form a valid hour (`00`..`23`), else
/// one; the minute must then consume the rest. So `109` is 10:09, `95` is
/// 09:05, and `946` is 09:46.
pub(crate) fn parse_compact_clock(token: &str) -> Result<NaiveTime, LineError> {
    let token = token.trim();
    let err = || LineError::Time(token.to_string());
    let digits: Vec<u32> = token
        .chars()
        .map(|c| if c.is_ascii_digit() { c.to_digit(10) } else { None })
        .collect::<Option<_>>()
        .ok_or_else(err)?;

    let two_digit_hour = match digits.as_slice() {
        [h1, h2, ..] if *h1 < 2 || (*h1 == 2 && *h2 <= 3) => Some((h1 * 10 + h2, 2)),
        _ => None,
    };
    let one_digit_hour = digits.first().map(|&h| (h, 1));

    two_digit_hour
        .into_iter()
        .chain(one_digit_hour)
        .find_map(|(hour, used)| {
            let minute = match &digits[used..] {
                [m] => *m,
                [m1, m2] if *m1 <= 5 => m1 * 10 + m2,
                _ => return None,
            };
            NaiveTime::from_hms_opt(hour, minute, 0)
        })
        .ok_or_else(err)
}

/// Table cells: `HH:MM:SS`, `HH:MM`, or the compact `HHMM` form.
pub(crate) fn parse_clock(token: &str) -> Result<NaiveTime, LineError> {
    let token = token.trim();
    if token.contains(':') {
        return NaiveTime::parse_from_str(token, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(token, "%H:%M"))
            .map_err(|_| LineError::Time(token.to_string()));
    }
    parse_compact_clock(token)
}
