use anyhow::{Context, Result};
use battrend::parse::parse_timestamp;
use battrend::Event;

/// Two days of phone battery logging, used by `battrend demo`.
pub const DEMO_READINGS: &str = "
24.8.2025 1007 47
24.8.2025 1211 43
24.8.2025 1424 40
24.8.2025 1510 39
24.8.2025 1558 36
24.8.2025 1613 35
24.8.2025 1746 33
24.8.2025 1803 32
24.8.2025 1829 31
24.8.2025 1841 30
24.8.2025 1906 29
24.8.2025 1910 28
24.8.2025 1930 27
24.8.2025 2326 19
25.8.2025 0109 54
25.8.2025 0945 43
25.8.2025 1014 42
25.8.2025 1053 41
25.8.2025 1145 40
25.8.2025 1213 38
25.8.2025 1333 37
25.8.2025 1344 37
25.8.2025 1353 36
25.8.2025 1442 35
25.8.2025 1504 35
";

const DEMO_EVENTS: [(&str, &str, &str, &str, i64); 3] = [
    ("Workout", "blue", "24.8.2025", "1746", 17),
    ("Charge", "green", "25.8.2025", "0010", 40),
    ("Sleep", "purple", "25.8.2025", "0150", 8 * 60 + 19),
];

pub fn demo_events() -> Result<Vec<Event>> {
    DEMO_EVENTS
        .iter()
        .map(|&(label, color, date, time, minutes)| {
            let start = parse_timestamp(date, time)
                .with_context(|| format!("bad demo event start for {label}"))?;
            Ok(Event::new(label, color, start, minutes)?)
        })
        .collect()
}
