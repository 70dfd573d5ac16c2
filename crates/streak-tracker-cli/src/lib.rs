//! `streak` command surface.
//!
//! Hosts can embed the tracker through:
//! - [`run_cli`] for full parsed CLI execution against the configured `SQLite` file.
//! - [`run_command`] for executing one [`Command`] against any [`StatusStore`],
//!   writing to any output sink.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use streak_tracker_core::{
    format_date, format_rfc3339, parse_date, today_local, DateStatus, MonthGrid, Status,
    StatusStore, StatusSummary, StreakEngine, StreakState, TrackerConfig, DEFAULT_ANCHOR_DATE,
};
use streak_tracker_store_sqlite::SqliteStatusStore;
use time::Date;
use tracing::{debug, info};

mod logging;
pub mod render;

pub use logging::init_tracing;

#[derive(Debug, Parser)]
#[command(name = "streak")]
#[command(about = "Track daily successful/unsuccessful marks and the running streak")]
pub struct Cli {
    #[arg(long, env = "STREAK_DB", default_value = "./streak_tracker.sqlite3")]
    db: PathBuf,

    /// First tracked day (YYYY-MM-DD).
    #[arg(long, env = "STREAK_ANCHOR_DATE", default_value_t = format_date(DEFAULT_ANCHOR_DATE))]
    anchor_date: String,

    #[arg(long, env = "STREAK_WEEK_START", default_value = "monday")]
    week_start: String,

    /// Evaluate as if today were this date (YYYY-MM-DD).
    #[arg(long, env = "STREAK_TODAY")]
    today: Option<String>,

    /// Tracing filter, e.g. `debug` or `streak_tracker_store_sqlite=debug`.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn log_level(&self) -> Option<&str> {
        self.log_level.as_deref()
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set the status of one day.
    Mark(MarkArgs),
    /// Advance one day through unset, successful, unsuccessful.
    Toggle(ToggleArgs),
    /// Print every month from the anchor through today.
    Show(OutputArgs),
    /// Print a single month.
    Month(MonthArgs),
    /// Print the current streak and totals.
    Status(OutputArgs),
}

#[derive(Debug, Args)]
pub struct MarkArgs {
    date: String,
    status: StatusArg,
}

#[derive(Debug, Args)]
pub struct ToggleArgs {
    date: String,
}

#[derive(Debug, Args)]
pub struct MonthArgs {
    year: i32,
    month: u8,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Successful,
    Unsuccessful,
    Unset,
}

/// Resolved configuration and reference date for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub config: TrackerConfig,
    pub today: Date,
}

#[derive(Debug, Serialize)]
struct MarkReport {
    date: String,
    status: Status,
    recorded_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToggleReport {
    date: String,
    previous_status: Status,
    status: Status,
    recorded_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    streak: StreakState,
    #[serde(flatten)]
    summary: StatusSummary,
}

#[derive(Debug, Serialize)]
struct ShowReport {
    statuses: BTreeMap<String, Status>,
    months: Vec<MonthGrid>,
}

/// Executes the parsed top-level CLI against the configured `SQLite` file.
///
/// # Errors
/// Returns an error when configuration is invalid, the store cannot be opened
/// or migrated, or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let context = resolve_context(&cli)?;
    let mut store = SqliteStatusStore::open_migrated(&cli.db)?;
    debug!(db = %cli.db.display(), anchor = %format_date(context.config.anchor_date), today = %format_date(context.today), "resolved streak context");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_command(cli.command, &context, &mut store, &mut out)
}

/// Builds the invocation context from flags and environment.
///
/// # Errors
/// Returns an error for an unparseable anchor date, week start, or `--today`.
pub fn resolve_context(cli: &Cli) -> Result<RunContext> {
    let config = TrackerConfig::from_raw(&cli.anchor_date, &cli.week_start)?;
    let today = match cli.today.as_deref() {
        Some(raw) => parse_date(raw).context("invalid --today value")?,
        None => today_local(),
    };
    Ok(RunContext { config, today })
}

/// Executes one command against `store`, writing human or JSON output to `out`.
///
/// # Errors
/// Returns an error for invalid dates or months and for store failures.
pub fn run_command<S, W>(
    command: Command,
    context: &RunContext,
    store: &mut S,
    out: &mut W,
) -> Result<()>
where
    S: StatusStore,
    W: Write,
{
    let engine = StreakEngine::new(&context.config);

    match command {
        Command::Mark(args) => {
            let date = parse_date(&args.date)?;
            let status = map_status(args.status);
            let record = store.set_status(date, status)?;
            info!(date = %args.date, %status, "marked day");

            let report = MarkReport {
                date: format_date(date),
                status,
                recorded_at: recorded_at(record.as_ref())?,
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            Ok(())
        }
        Command::Toggle(args) => {
            let date = parse_date(&args.date)?;
            let previous_status = store.get_status(date)?;
            let status = previous_status.next_in_cycle();
            let record = store.set_status(date, status)?;
            info!(date = %args.date, from = %previous_status, to = %status, "toggled day");

            let report = ToggleReport {
                date: format_date(date),
                previous_status,
                status,
                recorded_at: recorded_at(record.as_ref())?,
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            Ok(())
        }
        Command::Show(args) => {
            let statuses = store.list_statuses(engine.anchor_date(), context.today)?;
            let months = engine.calendar_through(context.today, &statuses)?;

            if args.json {
                let report = ShowReport {
                    statuses: statuses
                        .iter()
                        .map(|(date, status)| (format_date(*date), *status))
                        .collect(),
                    months,
                };
                writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
                return Ok(());
            }

            if months.is_empty() {
                writeln!(
                    out,
                    "tracking starts {}; nothing to show before then",
                    format_date(engine.anchor_date())
                )?;
                return Ok(());
            }

            for grid in &months {
                writeln!(out, "{}", render::render_month(grid))?;
            }
            writeln!(out, "{}", render::legend())?;
            if statuses.is_empty() {
                writeln!(out, "no marked days found")?;
            }
            Ok(())
        }
        Command::Month(args) => {
            let (from, to) = month_bounds(args.year, args.month)?;
            let statuses = store.list_statuses(from, to)?;
            let grid = engine.build_month_grid(args.year, args.month, context.today, &statuses)?;

            if args.json {
                writeln!(out, "{}", serde_json::to_string_pretty(&grid)?)?;
            } else {
                writeln!(out, "{}", render::render_month(&grid))?;
                writeln!(out, "{}", render::legend())?;
            }
            Ok(())
        }
        Command::Status(args) => {
            let window = store.list_statuses(engine.anchor_date(), context.today)?;
            // Totals count every stored mark, including future-dated ones.
            let everything = store.list_all_statuses()?;
            let report = StatusReport {
                streak: engine.streak_state(context.today, &window),
                summary: StatusSummary::from_statuses(&everything),
            };

            if args.json {
                writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            } else {
                print_status(out, &report)?;
            }
            Ok(())
        }
    }
}

fn print_status<W: Write>(out: &mut W, report: &StatusReport) -> Result<()> {
    writeln!(
        out,
        "current_streak={} total_days_tracked={} anchor_date={} reference_date={}",
        report.streak.current_streak,
        report.streak.total_days_tracked,
        format_date(report.streak.anchor_date),
        format_date(report.streak.reference_date)
    )?;
    writeln!(
        out,
        "successful_days={} unsuccessful_days={} total_marked_days={}",
        report.summary.successful_days,
        report.summary.unsuccessful_days,
        report.summary.total_marked_days
    )?;
    Ok(())
}

fn month_bounds(year: i32, month: u8) -> Result<(Date, Date)> {
    let month_value = time::Month::try_from(month)
        .map_err(|_| streak_tracker_core::TrackerError::InvalidMonth(month))?;
    let last_day = time::util::days_in_year_month(year, month_value);
    let from = Date::from_calendar_date(year, month_value, 1)
        .with_context(|| format!("invalid year {year}"))?;
    let to = Date::from_calendar_date(year, month_value, last_day)
        .with_context(|| format!("invalid year {year}"))?;
    Ok((from, to))
}

fn recorded_at(record: Option<&DateStatus>) -> Result<Option<String>> {
    record
        .map(|record| format_rfc3339(record.recorded_at))
        .transpose()
        .map_err(Into::into)
}

fn map_status(value: StatusArg) -> Status {
    match value {
        StatusArg::Successful => Status::Successful,
        StatusArg::Unsuccessful => Status::Unsuccessful,
        StatusArg::Unset => Status::Unset,
    }
}
