//! plotters adapter for the three battery charts.

use std::fs;
use std::panic;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use battrend::{format_time_left, Event, PredictionBasis, Reading, Report};
use chrono::NaiveDateTime;
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum View {
    /// All three charts stacked in one image.
    Combined,
    /// One image per chart.
    Separate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Png,
    Svg,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

/// Visual settings for the renderer, loadable from a JSON file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub line_color: String,
    pub trend_color: String,
    pub prediction_color_1: String,
    pub prediction_color_2: String,
    pub event_opacity: f64,
    pub theme: Theme,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            line_color: "#4682B4".to_string(),
            trend_color: "#FFD700".to_string(),
            prediction_color_1: "#FF4500".to_string(),
            prediction_color_2: "#32CD32".to_string(),
            event_opacity: 0.25,
            theme: Theme::Light,
        }
    }
}

impl RenderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read style {}", path.display()))?;
        let config: RenderConfig = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a valid style file", path.display()))?;
        config
            .palette()
            .with_context(|| format!("invalid style in {}", path.display()))?;
        Ok(config)
    }

    fn palette(&self) -> Result<Palette> {
        let color = |name: &str, value: &str| {
            parse_color(value).ok_or_else(|| anyhow!("{name}: unrecognised color '{value}'"))
        };
        if !(0.0..=1.0).contains(&self.event_opacity) {
            return Err(anyhow!(
                "event_opacity must be within 0..=1 (got {})",
                self.event_opacity
            ));
        }
        let (background, foreground, grid) = match self.theme {
            Theme::Light => (WHITE, BLACK, RGBColor(220, 220, 220)),
            Theme::Dark => (RGBColor(17, 17, 17), RGBColor(230, 230, 230), RGBColor(60, 60, 60)),
        };
        Ok(Palette {
            line: color("line_color", &self.line_color)?,
            trend: color("trend_color", &self.trend_color)?,
            prediction: [
                color("prediction_color_1", &self.prediction_color_1)?,
                color("prediction_color_2", &self.prediction_color_2)?,
            ],
            event_opacity: self.event_opacity,
            background,
            foreground,
            grid,
        })
    }
}

struct Palette {
    line: RGBColor,
    trend: RGBColor,
    prediction: [RGBColor; 2],
    event_opacity: f64,
    background: RGBColor,
    foreground: RGBColor,
    grid: RGBColor,
}

impl Palette {
    fn prediction_color(&self, basis: PredictionBasis) -> RGBColor {
        match basis {
            PredictionBasis::CurrentTrend => self.prediction[0],
            PredictionBasis::RecentUsage => self.prediction[1],
        }
    }

    fn event_color(&self, event_color: &str) -> RGBColor {
        parse_color(event_color).unwrap_or_else(|| {
            debug!("Unknown event color '{}', using gray", event_color);
            RGBColor(128, 128, 128)
        })
    }

    fn font(&self, size: f64) -> TextStyle<'static> {
        FontDesc::new(FontFamily::SansSerif, size, FontStyle::Normal).color(&self.foreground)
    }
}

/// `#RRGGBB`, `#RGB`, or one of a handful of CSS color names.
pub fn parse_color(value: &str) -> Option<RGBColor> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<_>>()?;
        return match digits.as_slice() {
            [r, g, b] => Some(RGBColor(r * 17, g * 17, b * 17)),
            [r1, r2, g1, g2, b1, b2] => Some(RGBColor(r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2)),
            _ => None,
        };
    }
    let rgb = match value.to_ascii_lowercase().as_str() {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "gray" | "grey" => (128, 128, 128),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "blue" => (0, 0, 255),
        "purple" => (128, 0, 128),
        "orange" => (255, 165, 0),
        "orangered" => (255, 69, 0),
        "yellow" => (255, 255, 0),
        "gold" => (255, 215, 0),
        "pink" => (255, 192, 203),
        "brown" => (165, 42, 42),
        "cyan" => (0, 255, 255),
        "magenta" => (255, 0, 255),
        "teal" => (0, 128, 128),
        "navy" => (0, 0, 128),
        "steelblue" => (70, 130, 180),
        "limegreen" => (50, 205, 50),
        _ => return None,
    };
    Some(RGBColor(rgb.0, rgb.1, rgb.2))
}

/// Shared time/value extents; x is hours since the first reading.
struct Frame {
    origin: NaiveDateTime,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl Frame {
    fn new(report: &Report, events: &[Event], with_predictions: bool) -> Option<Self> {
        let origin = report.readings.first()?.time;
        let mut times: Vec<NaiveDateTime> = report.readings.iter().map(|r| r.time).collect();
        for event in events {
            times.push(event.start());
            times.push(event.end());
        }
        if with_predictions {
            times.extend(report.predictions.iter().map(|p| p.drain_time));
        }
        let offsets: Vec<f64> = times.iter().map(|t| hours_from(origin, *t)).collect();
        let mut x_min = offsets.iter().copied().fold(f64::INFINITY, f64::min);
        let mut x_max = offsets.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if x_max - x_min < 1e-6 {
            x_min -= 0.5;
            x_max += 0.5;
        }

        let values = report.readings.iter().map(|r| r.value as f64);
        let y_min = values.clone().fold(0.0, f64::min);
        let y_max = values.fold(100.0, f64::max) + 5.0;
        Some(Self {
            origin,
            x_range: (x_min, x_max),
            y_range: (y_min, y_max),
        })
    }

    fn x(&self, time: NaiveDateTime) -> f64 {
        hours_from(self.origin, time)
    }

    fn point(&self, reading: &Reading) -> (f64, f64) {
        (self.x(reading.time), reading.value as f64)
    }

    fn time_label(&self, hours: f64) -> String {
        let offset = chrono::TimeDelta::try_milliseconds((hours * 3_600_000.0).round() as i64);
        offset
            .and_then(|o| self.origin.checked_add_signed(o))
            .map(|t| t.format("%d.%m %H:%M").to_string())
            .unwrap_or_default()
    }
}

fn hours_from(origin: NaiveDateTime, time: NaiveDateTime) -> f64 {
    battrend::hours_between(origin, time)
}

/// Render the report, turning plotting failures and backend panics into an error string.
pub fn render_report_guard(
    report: &Report,
    events: &[Event],
    path: &Path,
    kind: ChartKind,
    view: View,
    config: &RenderConfig,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        let palette = config.palette().map_err(|e| e.to_string())?;
        let result = match view {
            View::Combined => render_combined(report, events, path, kind, &palette),
            View::Separate => render_separate(report, events, path, kind, &palette),
        };
        result.map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_combined(
    report: &Report,
    events: &[Event],
    path: &Path,
    kind: ChartKind,
    palette: &Palette,
) -> Result<()> {
    let Some(frame) = Frame::new(report, events, true) else {
        warn!("No readings to plot");
        return Ok(());
    };
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, (1400, 1500)).into_drawing_area();
            draw_combined(root, report, events, &frame, palette)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, (1400, 1500)).into_drawing_area();
            draw_combined(root, report, events, &frame, palette)
        }
    }
}

fn draw_combined<DB>(
    root: DrawingArea<DB, Shift>,
    report: &Report,
    events: &[Event],
    frame: &Frame,
    palette: &Palette,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&palette.background)?;
    let root = root.titled("Battery Usage Report", palette.font(28.0))?;
    let panels = root.split_evenly((3, 1));
    draw_segment_panel(&panels[0], report, events, frame, palette)?;
    draw_event_panel(&panels[1], report, events, frame, palette)?;
    draw_prediction_panel(&panels[2], report, frame, palette)?;
    root.present()?;
    Ok(())
}

fn render_separate(
    report: &Report,
    events: &[Event],
    base: &Path,
    kind: ChartKind,
    palette: &Palette,
) -> Result<()> {
    let (Some(frame), Some(prediction_frame)) = (
        Frame::new(report, events, false),
        Frame::new(report, &[], true),
    ) else {
        warn!("No readings to plot");
        return Ok(());
    };
    let [segments_path, events_path, prediction_path] = derive_view_paths(base);

    match kind {
        ChartKind::Png => {
            let area = BitMapBackend::new(&segments_path, (1400, 600)).into_drawing_area();
            draw_single(area, palette, |a| draw_segment_panel(a, report, events, &frame, palette))?;
            let area = BitMapBackend::new(&events_path, (1400, 600)).into_drawing_area();
            draw_single(area, palette, |a| draw_event_panel(a, report, events, &frame, palette))?;
            let area = BitMapBackend::new(&prediction_path, (1400, 600)).into_drawing_area();
            draw_single(area, palette, |a| {
                draw_prediction_panel(a, report, &prediction_frame, palette)
            })?;
        }
        ChartKind::Svg => {
            let area = SVGBackend::new(&segments_path, (1400, 600)).into_drawing_area();
            draw_single(area, palette, |a| draw_segment_panel(a, report, events, &frame, palette))?;
            let area = SVGBackend::new(&events_path, (1400, 600)).into_drawing_area();
            draw_single(area, palette, |a| draw_event_panel(a, report, events, &frame, palette))?;
            let area = SVGBackend::new(&prediction_path, (1400, 600)).into_drawing_area();
            draw_single(area, palette, |a| {
                draw_prediction_panel(a, report, &prediction_frame, palette)
            })?;
        }
    }
    Ok(())
}

fn draw_single<DB, F>(area: DrawingArea<DB, Shift>, palette: &Palette, draw: F) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
    F: FnOnce(&DrawingArea<DB, Shift>) -> Result<()>,
{
    area.fill(&palette.background)?;
    draw(&area)?;
    area.present()?;
    Ok(())
}

/// `report.png` -> `report_segments.png`, `report_events.png`, `report_prediction.png`.
pub fn derive_view_paths(base: &Path) -> [PathBuf; 3] {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("battery");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("png");
    ["segments", "events", "prediction"]
        .map(|suffix| base.with_file_name(format!("{}_{}.{}", stem, suffix, ext)))
}

fn draw_segment_panel<DB>(
    area: &DrawingArea<DB, Shift>,
    report: &Report,
    events: &[Event],
    frame: &Frame,
    palette: &Palette,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (x_min, x_max) = frame.x_range;
    let (y_min, y_max) = frame.y_range;
    let mut chart = ChartBuilder::on(area)
        .caption("Battery Usage with Segments", palette.font(22.0))
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    configure_mesh(&mut chart, frame, palette)?;

    draw_event_spans(&mut chart, events, frame, palette)?;
    draw_battery_line(&mut chart, &report.readings, frame, palette, "Battery level")?;

    let trend = palette.trend;
    for (idx, metrics) in report.segment_metrics.iter().enumerate() {
        let start = frame.point(&metrics.start);
        let end = frame.point(&metrics.end);
        let anno = chart.draw_series(LineSeries::new([start, end], trend.stroke_width(2)))?;
        if idx == 0 {
            anno.label("Segment trend")
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], trend));
        }
        let mid = ((start.0 + end.0) / 2.0, (start.1 + end.1) / 2.0 + 3.0);
        chart.draw_series(std::iter::once(Text::new(
            format!(
                "{:.2}%/h (sd {:.2})",
                metrics.avg_gradient, metrics.variability
            ),
            mid,
            palette.font(12.0),
        )))?;
    }

    draw_legend(&mut chart, palette)?;
    Ok(())
}

fn draw_event_panel<DB>(
    area: &DrawingArea<DB, Shift>,
    report: &Report,
    events: &[Event],
    frame: &Frame,
    palette: &Palette,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (x_min, x_max) = frame.x_range;
    let (y_min, y_max) = frame.y_range;
    let mut chart = ChartBuilder::on(area)
        .caption("Battery Usage with Event Gradients", palette.font(22.0))
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    configure_mesh(&mut chart, frame, palette)?;

    draw_event_spans(&mut chart, events, frame, palette)?;
    draw_battery_line(&mut chart, &report.readings, frame, palette, "Battery level")?;

    for eg in &report.event_gradients {
        let color = palette.event_color(&eg.color);
        chart
            .draw_series(LineSeries::new(
                [frame.point(&eg.start), frame.point(&eg.end)],
                color.stroke_width(3),
            ))?
            .label(format!("Trend for {} ({:.2}%/h)", eg.label, eg.gradient))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    draw_legend(&mut chart, palette)?;
    Ok(())
}

fn draw_prediction_panel<DB>(
    area: &DrawingArea<DB, Shift>,
    report: &Report,
    frame: &Frame,
    palette: &Palette,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (x_min, x_max) = frame.x_range;
    let (y_min, y_max) = frame.y_range;
    let mut chart = ChartBuilder::on(area)
        .caption("Battery Drain Predictions", palette.font(22.0))
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    configure_mesh(&mut chart, frame, palette)?;

    draw_battery_line(&mut chart, &report.readings, frame, palette, "Actual battery level")?;

    for prediction in &report.predictions {
        let color = palette.prediction_color(prediction.basis);
        let drain = (frame.x(prediction.drain_time), 0.0);
        chart
            .draw_series(LineSeries::new(
                [frame.point(&prediction.from), drain],
                color.stroke_width(2),
            ))?
            .label(format!(
                "{} ({:.2}%/h, empty in {} at {})",
                prediction.basis.label(),
                prediction.gradient,
                format_time_left(prediction.hours_to_drain),
                prediction.drain_time.format("%d.%m.%Y %H:%M")
            ))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        chart.draw_series(std::iter::once(Circle::new(drain, 4, color.filled())))?;
    }

    draw_legend(&mut chart, palette)?;
    Ok(())
}

type Chart<'a, DB> = ChartContext<'a, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

fn configure_mesh<DB>(chart: &mut Chart<'_, DB>, frame: &Frame, palette: &Palette) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let x_fmt = |v: &f64| frame.time_label(*v);
    chart
        .configure_mesh()
        .light_line_style(palette.grid.mix(0.4))
        .bold_line_style(palette.grid)
        .axis_style(palette.foreground)
        .x_labels(8)
        .x_label_formatter(&x_fmt)
        .y_label_formatter(&|v| format!("{:.0}", v))
        .y_desc("Battery (%)")
        .label_style(palette.font(14.0))
        .axis_desc_style(palette.font(16.0))
        .draw()?;
    Ok(())
}

fn draw_event_spans<DB>(
    chart: &mut Chart<'_, DB>,
    events: &[Event],
    frame: &Frame,
    palette: &Palette,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (y_min, y_max) = frame.y_range;
    for event in events {
        let color = palette.event_color(event.color());
        let x0 = frame.x(event.start());
        let x1 = frame.x(event.end());
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x0, y_min), (x1, y_max)],
            color.mix(palette.event_opacity).filled(),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            event.label().to_string(),
            (x0, y_max - 2.0),
            palette.font(14.0),
        )))?;
    }
    Ok(())
}

fn draw_battery_line<DB>(
    chart: &mut Chart<'_, DB>,
    readings: &[Reading],
    frame: &Frame,
    palette: &Palette,
    label: &str,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let line = palette.line;
    chart
        .draw_series(LineSeries::new(
            readings.iter().map(|r| frame.point(r)),
            line.stroke_width(2),
        ))?
        .label(label)
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], line));
    chart.draw_series(
        readings
            .iter()
            .map(|r| Circle::new(frame.point(r), 3, line.filled())),
    )?;
    Ok(())
}

fn draw_legend<'a, DB>(chart: &mut Chart<'a, DB>, palette: &Palette) -> Result<()>
where
    DB: DrawingBackend + 'a,
    DB::ErrorType: 'static,
{
    chart
        .configure_series_labels()
        .background_style(palette.background.mix(0.8))
        .border_style(palette.foreground.mix(0.3))
        .label_font(palette.font(14.0))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color_forms() {
        assert_eq!(parse_color("#4682B4"), Some(RGBColor(70, 130, 180)));
        assert_eq!(parse_color("#fff"), Some(RGBColor(255, 255, 255)));
        assert_eq!(parse_color(" Purple "), Some(RGBColor(128, 0, 128)));
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("#GG0000"), None);
        assert_eq!(parse_color("chartreuse-ish"), None);
    }

    #[test]
    fn test_view_paths() {
        let [a, b, c] = derive_view_paths(Path::new("out/report.svg"));
        assert_eq!(a, PathBuf::from("out/report_segments.svg"));
        assert_eq!(b, PathBuf::from("out/report_events.svg"));
        assert_eq!(c, PathBuf::from("out/report_prediction.svg"));
    }

    #[test]
    fn test_default_config_is_valid() {
        let palette = RenderConfig::default().palette().unwrap();
        assert_eq!(palette.trend, RGBColor(255, 215, 0));
        assert_eq!(palette.prediction_color(PredictionBasis::RecentUsage), RGBColor(50, 205, 50));
        assert_eq!(palette.event_color("nope"), RGBColor(128, 128, 128));
    }

    #[test]
    fn test_partial_style_json_uses_defaults() {
        let config: RenderConfig =
            serde_json::from_str(r#"{"theme": "dark", "event_opacity": 0.5}"#).unwrap();
        assert_eq!(config.theme, Theme::Dark);
        assert_eq!(config.line_color, "#4682B4");
        assert!(config.palette().is_ok());

        let config: RenderConfig = serde_json::from_str(r#"{"event_opacity": 1.5}"#).unwrap();
        assert!(config.palette().is_err());
        let config: RenderConfig = serde_json::from_str(r#"{"trend_color": "sparkly"}"#).unwrap();
        assert!(config.palette().is_err());
        assert!(serde_json::from_str::<RenderConfig>(r#"{"colour": "red"}"#).is_err());
    }
}
