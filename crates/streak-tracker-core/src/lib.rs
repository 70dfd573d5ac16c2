//! Day-status tracking core: the status model, the [`StatusStore`] access
//! contract, and the pure streak and calendar computations in [`engine`].
//!
//! Dates are [`time::Date`] values throughout. There is no time-of-day
//! component anywhere in the computation, so day boundaries never depend on
//! a timezone once a caller has decided what "today" is.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::{date, format_description};
use time::{Date, OffsetDateTime, UtcOffset};

pub mod engine;
pub mod store;

pub use engine::{
    build_month_grid, calendar_months, compute_streak, days_since_start, streak_state,
    total_days_tracked, CalendarDay, Marker, MonthGrid, StreakEngine, StreakState,
};
pub use store::{InMemoryStatusStore, StatusStore};

/// First tracked day when nothing else is configured.
pub const DEFAULT_ANCHOR_DATE: Date = date!(2025 - 08 - 26);

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TrackerError {
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error("invalid month: {0} (expected 1-12)")]
    InvalidMonth(u8),
    #[error("invalid status: {0} (expected successful, unsuccessful, or unset)")]
    InvalidStatus(String),
    #[error("status store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TrackerError {
    /// Only store outages are worth retrying; every other kind is a bad input.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Successful,
    Unsuccessful,
    Unset,
}

impl Status {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Successful => "successful",
            Self::Unsuccessful => "unsuccessful",
            Self::Unset => "unset",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "successful" => Some(Self::Successful),
            "unsuccessful" => Some(Self::Unsuccessful),
            "unset" => Some(Self::Unset),
            _ => None,
        }
    }

    /// Next value in the click cycle used by the calendar page:
    /// unset, successful, unsuccessful, then back to unset.
    #[must_use]
    pub fn next_in_cycle(self) -> Self {
        match self {
            Self::Unset => Self::Successful,
            Self::Successful => Self::Unsuccessful,
            Self::Unsuccessful => Self::Unset,
        }
    }

    #[must_use]
    pub fn is_unset(self) -> bool {
        matches!(self, Self::Unset)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a status name, reporting [`TrackerError::InvalidStatus`] on anything
/// outside the three known values.
///
/// # Errors
/// Returns [`TrackerError::InvalidStatus`] for unknown names.
pub fn parse_status(raw: &str) -> Result<Status, TrackerError> {
    Status::parse(raw).ok_or_else(|| TrackerError::InvalidStatus(raw.to_string()))
}

/// One stored row. `Unset` is never stored; it is the absence of a row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateStatus {
    #[serde(with = "serde_iso_date")]
    pub date: Date,
    pub status: Status,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeekStart {
    #[default]
    Monday,
    Sunday,
}

impl WeekStart {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Sunday => "sunday",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "monday" => Some(Self::Monday),
            "sunday" => Some(Self::Sunday),
            _ => None,
        }
    }

    /// Column (0-6) a weekday lands in for this week layout.
    #[must_use]
    pub fn column_of(self, weekday: time::Weekday) -> u8 {
        match self {
            Self::Monday => weekday.number_days_from_monday(),
            Self::Sunday => weekday.number_days_from_sunday(),
        }
    }

    #[must_use]
    pub fn weekday_labels(self) -> [&'static str; 7] {
        match self {
            Self::Monday => ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"],
            Self::Sunday => ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"],
        }
    }
}

/// Startup configuration handed to the engine and the command layers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct TrackerConfig {
    #[serde(with = "serde_iso_date")]
    pub anchor_date: Date,
    pub week_start: WeekStart,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            anchor_date: DEFAULT_ANCHOR_DATE,
            week_start: WeekStart::default(),
        }
    }
}

impl TrackerConfig {
    /// Builds a configuration from its textual form (environment or flags).
    ///
    /// # Errors
    /// Returns [`TrackerError::Configuration`] when the anchor date is not a
    /// `YYYY-MM-DD` calendar date or the week start is not `monday`/`sunday`.
    pub fn from_raw(anchor_date: &str, week_start: &str) -> Result<Self, TrackerError> {
        let anchor_date = parse_date(anchor_date)
            .map_err(|err| TrackerError::Configuration(format!("anchor date: {err}")))?;
        let week_start = WeekStart::parse(week_start).ok_or_else(|| {
            TrackerError::Configuration(format!(
                "week start MUST be monday or sunday, got {week_start}"
            ))
        })?;

        Ok(Self {
            anchor_date,
            week_start,
        })
    }
}

/// Counts of explicit marks in a status mapping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct StatusSummary {
    pub successful_days: usize,
    pub unsuccessful_days: usize,
    pub total_marked_days: usize,
}

impl StatusSummary {
    #[must_use]
    pub fn from_statuses(statuses: &BTreeMap<Date, Status>) -> Self {
        let mut summary = Self::default();
        for status in statuses.values() {
            match status {
                Status::Successful => summary.successful_days += 1,
                Status::Unsuccessful => summary.unsuccessful_days += 1,
                Status::Unset => continue,
            }
            summary.total_marked_days += 1;
        }
        summary
    }
}

/// Parses a `YYYY-MM-DD` calendar date.
///
/// # Errors
/// Returns [`TrackerError::InvalidDate`] for malformed input or dates that do
/// not exist on the calendar (for example `2025-02-30`).
pub fn parse_date(raw: &str) -> Result<Date, TrackerError> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map_err(|err| TrackerError::InvalidDate(format!("{raw}: {err}")))
}

/// Formats a date as `YYYY-MM-DD`.
#[must_use]
pub fn format_date(value: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        value.year(),
        u8::from(value.month()),
        value.day()
    )
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`TrackerError::InvalidDate`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, TrackerError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|err| TrackerError::InvalidDate(format!("failed to format timestamp: {err}")))
}

/// Parses an RFC3339 timestamp.
///
/// # Errors
/// Returns [`TrackerError::InvalidDate`] when parsing fails.
pub fn parse_rfc3339(value: &str) -> Result<OffsetDateTime, TrackerError> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|err| TrackerError::InvalidDate(format!("invalid RFC3339 timestamp {value}: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Today's date in the local timezone, falling back to UTC when the local
/// offset cannot be determined.
#[must_use]
pub fn today_local() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| now_utc())
        .date()
}

/// Serde adapter that writes a [`Date`] as `YYYY-MM-DD`.
pub mod serde_iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    /// # Errors
    /// Propagates serializer failures.
    pub fn serialize<S>(value: &Date, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_date(*value))
    }

    /// # Errors
    /// Fails when the input is not a `YYYY-MM-DD` calendar date.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Date, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }
}
