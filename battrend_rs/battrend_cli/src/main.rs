use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use battrend::{
    analyze, format_time_left, load_events_csv, load_readings_csv, parse_readings_detailed,
    Event, Lookup, Params, Reading, Report,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod demo;
mod render;

use render::{render_report_guard, ChartKind, RenderConfig, View};

#[derive(Parser, Debug)]
#[command(author, version, about = "Battery trend analysis CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse a battery log and write the trend report and charts
    Report(ReportArgs),
    /// Run the report over the bundled two-day sample log
    Demo(DemoArgs),
}

#[derive(Parser, Debug)]
struct ReportArgs {
    /// Battery readings: `D.M.YYYY HHMM value` lines, or a Date,Time,Battery CSV
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Events CSV (Label,Color,Start Date,Start Time,Duration [min])
    #[arg(long, value_hint = ValueHint::FilePath)]
    events: Option<PathBuf>,

    /// How to read the readings file
    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    format: InputFormat,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Parser, Debug)]
struct DemoArgs {
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "battery_report.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Also write the full report as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Output PNG figure path (defaults next to CSV)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable chart generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Chart layout
    #[arg(long, value_enum, default_value_t = ViewOpt::Combined)]
    view: ViewOpt,

    /// Chart style JSON (colors, event opacity, theme)
    #[arg(long, value_hint = ValueHint::FilePath)]
    style: Option<PathBuf>,

    /// Trailing window (hours) for the usage-based prediction
    #[arg(long, default_value_t = 48.0)]
    usage_window: f64,

    /// Nearest-reading search used for event alignment
    #[arg(long, value_enum, default_value_t = LookupOpt::Auto)]
    lookup: LookupOpt,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    Auto,
    Text,
    Csv,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ViewOpt {
    Combined,
    Separate,
}

impl From<ViewOpt> for View {
    fn from(value: ViewOpt) -> Self {
        match value {
            ViewOpt::Combined => View::Combined,
            ViewOpt::Separate => View::Separate,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LookupOpt {
    Auto,
    Linear,
    Binary,
}

impl From<LookupOpt> for Lookup {
    fn from(value: LookupOpt) -> Self {
        match value {
            LookupOpt::Auto => Lookup::Auto,
            LookupOpt::Linear => Lookup::Linear,
            LookupOpt::Binary => Lookup::Binary,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Report(args) => args.output.verbose,
        Command::Demo(args) => args.output.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Report(args) => handle_report(args),
        Command::Demo(args) => handle_demo(args),
    }
}

fn handle_report(args: ReportArgs) -> Result<()> {
    let t_load = Instant::now();
    let readings = load_readings(&args.input, args.format)?;
    let events = match args.events.as_ref() {
        Some(path) => load_events_csv(path)
            .with_context(|| format!("failed to load events {}", path.display()))?,
        None => Vec::new(),
    };
    debug!(
        "Load stage: {:.1} ms",
        t_load.elapsed().as_secs_f64() * 1000.0
    );

    if readings.is_empty() {
        warn!("No battery data found in {}", args.input.display());
        return Ok(());
    }
    info!(
        "Loaded {} readings and {} events from {}",
        readings.len(),
        events.len(),
        args.input.display()
    );
    run_report(readings, &events, &args.output)
}

fn handle_demo(args: DemoArgs) -> Result<()> {
    let (readings, _) = parse_readings_detailed(demo::DEMO_READINGS);
    let events = demo::demo_events()?;
    info!(
        "Running demo over {} readings and {} events",
        readings.len(),
        events.len()
    );
    run_report(readings, &events, &args.output)
}

fn load_readings(path: &Path, format: InputFormat) -> Result<Vec<Reading>> {
    let format = match format {
        InputFormat::Auto => {
            let is_csv = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if is_csv {
                InputFormat::Csv
            } else {
                InputFormat::Text
            }
        }
        other => other,
    };

    if format == InputFormat::Csv {
        return load_readings_csv(path)
            .with_context(|| format!("failed to load readings {}", path.display()));
    }

    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (readings, skipped) = parse_readings_detailed(&text);
    if !skipped.is_empty() {
        warn!(
            "Skipped {} malformed line(s) in {}",
            skipped.len(),
            path.display()
        );
    }
    Ok(readings)
}

fn run_report(readings: Vec<Reading>, events: &[Event], opts: &OutputArgs) -> Result<()> {
    let params = Params {
        usage_window_hours: opts.usage_window,
        lookup: opts.lookup.into(),
    };
    let style = match opts.style.as_ref() {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };

    let t_compute = Instant::now();
    let report = analyze(readings, events, &params)?;
    debug!(
        "Compute stage: {:.1} ms",
        t_compute.elapsed().as_secs_f64() * 1000.0
    );
    log_summary(&report);

    if opts.output.as_os_str() == "-" {
        write_report_stdout(&report)?;
    } else {
        write_report_csv(&report, &opts.output)?;
        info!("Wrote report CSV: {}", opts.output.display());
    }

    if let Some(path) = opts.json.as_ref() {
        let text = serde_json::to_string_pretty(&report)?;
        fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote report JSON: {}", path.display());
    }

    if opts.no_plot {
        return Ok(());
    }
    let view: View = opts.view.into();
    let mut targets: Vec<(PathBuf, ChartKind)> = Vec::new();
    if let Some(path) = opts.png.as_ref() {
        targets.push((path.clone(), ChartKind::Png));
    } else if opts.output.as_os_str() != "-" {
        let mut png_path = opts.output.clone();
        png_path.set_extension("png");
        targets.push((png_path, ChartKind::Png));
    }
    if let Some(path) = opts.svg.as_ref() {
        targets.push((path.clone(), ChartKind::Svg));
    }

    for (path, kind) in targets {
        let t_plot = Instant::now();
        if let Err(err) = render_report_guard(&report, events, &path, kind, view, &style) {
            warn!("Skipping chart render ({}): {}", path.display(), err);
        } else if view == View::Separate {
            info!("Wrote charts: {} (_segments/_events/_prediction)", path.display());
        } else {
            info!("Wrote chart: {}", path.display());
        }
        debug!(
            "Plot stage: {:.1} ms",
            t_plot.elapsed().as_secs_f64() * 1000.0
        );
    }

    Ok(())
}

fn log_summary(report: &Report) {
    info!(
        "{} segments, trend {:.2}%/h, recent usage {:.2}%/h",
        report.segments.len(),
        report.trend_gradient,
        report.usage_gradient
    );
    for eg in &report.event_gradients {
        info!("Event {}: {:.2}%/h", eg.label, eg.gradient);
    }
    if report.predictions.is_empty() {
        info!("Battery is not draining; no drain prediction");
    }
    for p in &report.predictions {
        info!(
            "{} prediction: empty in {} (at {})",
            p.basis.label(),
            format_time_left(p.hours_to_drain),
            p.drain_time.format("%d.%m.%Y %H:%M")
        );
    }
}

fn write_report_stdout(report: &Report) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_report_rows(report, &mut writer)
}

fn write_report_csv(report: &Report, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_report_rows(report, &mut writer)
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

fn write_report_rows<W: Write>(report: &Report, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "kind",
        "label",
        "start_time",
        "start_value",
        "end_time",
        "end_value",
        "gradient_pct_per_hr",
        "variability",
    ])?;

    for (idx, m) in report.segment_metrics.iter().enumerate() {
        writer.write_record([
            "segment".to_string(),
            format!("segment {}", idx + 1),
            m.start.time.format(TIME_FORMAT).to_string(),
            m.start.value.to_string(),
            m.end.time.format(TIME_FORMAT).to_string(),
            m.end.value.to_string(),
            format!("{:.3}", m.avg_gradient),
            format!("{:.3}", m.variability),
        ])?;
    }

    for eg in &report.event_gradients {
        writer.write_record([
            "event".to_string(),
            eg.label.clone(),
            eg.start.time.format(TIME_FORMAT).to_string(),
            eg.start.value.to_string(),
            eg.end.time.format(TIME_FORMAT).to_string(),
            eg.end.value.to_string(),
            format!("{:.3}", eg.gradient),
            String::new(),
        ])?;
    }

    for p in &report.predictions {
        writer.write_record([
            "prediction".to_string(),
            p.basis.label().to_string(),
            p.from.time.format(TIME_FORMAT).to_string(),
            p.from.value.to_string(),
            p.drain_time.format(TIME_FORMAT).to_string(),
            "0".to_string(),
            format!("{:.3}", p.gradient),
            String::new(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use battrend::parse_readings;

    fn report_csv(report: &Report) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_report_rows(report, &mut writer).unwrap();
        String::from_utf8(writer.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_report_rows() {
        let readings = parse_readings("24.8.2025 1000 50\n24.8.2025 1100 40\n24.8.2025 1200 45");
        let event = Event::new("Workout", "blue", readings[0].time, 60).unwrap();
        let report = analyze(readings, &[event], &Params::default()).unwrap();
        let csv = report_csv(&report);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "kind,label,start_time,start_value,end_time,end_value,gradient_pct_per_hr,variability"
        );
        assert_eq!(
            lines[1],
            "segment,segment 1,2025-08-24 10:00,50,2025-08-24 11:00,40,-10.000,0.000"
        );
        assert_eq!(
            lines[2],
            "segment,segment 2,2025-08-24 11:00,40,2025-08-24 12:00,45,5.000,0.000"
        );
        assert_eq!(
            lines[3],
            "event,Workout,2025-08-24 10:00,50,2025-08-24 11:00,40,-10.000,"
        );
        // Last segment charges, so only the usage prediction remains: 45 / 10 = 4.5 h.
        assert_eq!(
            lines[4],
            "prediction,Recent usage,2025-08-24 12:00,45,2025-08-24 16:30,0,-10.000,"
        );
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_csv_extension_selects_table_loader() {
        let err = load_readings(Path::new("/nonexistent/battrend/log.CSV"), InputFormat::Auto)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("failed to load readings"));
        let err = load_readings(Path::new("/nonexistent/battrend/log.txt"), InputFormat::Auto)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("failed to read"));
    }

    #[test]
    fn test_cli_parses_report_flags() {
        let cli = Cli::try_parse_from([
            "battrend",
            "report",
            "log.txt",
            "--events",
            "events.csv",
            "--view",
            "separate",
            "--lookup",
            "binary",
            "--usage-window",
            "24",
            "-o",
            "-",
        ])
        .unwrap();
        let Command::Report(args) = cli.command else {
            panic!("expected report subcommand");
        };
        assert_eq!(args.events, Some(PathBuf::from("events.csv")));
        assert_eq!(View::from(args.output.view), View::Separate);
        assert_eq!(Lookup::from(args.output.lookup), Lookup::Binary);
        assert_eq!(args.output.usage_window, 24.0);
        assert_eq!(args.output.output, PathBuf::from("-"));
    }
}
