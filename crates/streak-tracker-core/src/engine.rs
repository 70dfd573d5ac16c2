//! Streak and calendar computation.
//!
//! Everything here is a pure function of the anchor date, the reference date
//! and a status mapping. A day with no stored status counts toward the streak:
//! only an explicit [`Status::Unsuccessful`] mark breaks it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Date, Month};

use crate::{serde_iso_date, Status, TrackerConfig, TrackerError, WeekStart};

/// Derived streak figures; recomputed on every read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreakState {
    #[serde(with = "serde_iso_date")]
    pub anchor_date: Date,
    #[serde(with = "serde_iso_date")]
    pub reference_date: Date,
    pub current_streak: u32,
    pub total_days_tracked: u32,
}

/// Display class for a calendar cell. Precedence is anchor, then today, then
/// the status-derived marker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    Anchor,
    Today,
    Successful,
    Unsuccessful,
    Neutral,
}

impl Marker {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anchor => "anchor",
            Self::Today => "today",
            Self::Successful => "successful",
            Self::Unsuccessful => "unsuccessful",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarDay {
    #[serde(with = "serde_iso_date")]
    pub date: Date,
    pub day: u8,
    pub is_anchor: bool,
    pub is_today: bool,
    pub is_in_streak_window: bool,
    pub status: Status,
    pub marker: Marker,
}

/// One month laid out as whole weeks. Cells outside the month are `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u8,
    pub month_name: String,
    pub week_start: WeekStart,
    pub weeks: Vec<[Option<CalendarDay>; 7]>,
}

impl MonthGrid {
    pub fn days(&self) -> impl Iterator<Item = &CalendarDay> {
        self.weeks.iter().flatten().flatten()
    }
}

/// Number of consecutive qualifying days ending at `reference_date`.
#[must_use]
pub fn compute_streak(
    anchor_date: Date,
    reference_date: Date,
    statuses: &BTreeMap<Date, Status>,
) -> u32 {
    if reference_date < anchor_date {
        return 0;
    }

    let last_break = statuses
        .range(anchor_date..=reference_date)
        .rev()
        .find(|(_, status)| matches!(status, Status::Unsuccessful))
        .map(|(date, _)| *date);

    match last_break {
        Some(broken_on) => whole_days_between(broken_on, reference_date),
        None => total_days_tracked(anchor_date, reference_date),
    }
}

/// `reference_date - anchor_date + 1`, or zero when the reference date comes
/// first.
#[must_use]
pub fn total_days_tracked(anchor_date: Date, reference_date: Date) -> u32 {
    if reference_date < anchor_date {
        return 0;
    }
    whole_days_between(anchor_date, reference_date).saturating_add(1)
}

/// Signed day distance from the anchor; negative before tracking starts.
#[must_use]
pub fn days_since_start(anchor_date: Date, reference_date: Date) -> i64 {
    (reference_date - anchor_date).whole_days()
}

#[must_use]
pub fn streak_state(
    anchor_date: Date,
    reference_date: Date,
    statuses: &BTreeMap<Date, Status>,
) -> StreakState {
    StreakState {
        anchor_date,
        reference_date,
        current_streak: compute_streak(anchor_date, reference_date, statuses),
        total_days_tracked: total_days_tracked(anchor_date, reference_date),
    }
}

/// Lays out `year`/`month` as weeks starting on `week_start`, annotating each
/// in-month day against the anchor and reference dates.
///
/// # Errors
/// Returns [`TrackerError::InvalidMonth`] when `month` is outside 1-12 and
/// [`TrackerError::InvalidDate`] when `year` is outside the supported range.
pub fn build_month_grid(
    year: i32,
    month: u8,
    anchor_date: Date,
    reference_date: Date,
    statuses: &BTreeMap<Date, Status>,
    week_start: WeekStart,
) -> Result<MonthGrid, TrackerError> {
    let month_value = Month::try_from(month).map_err(|_| TrackerError::InvalidMonth(month))?;
    let first = calendar_date(year, month_value, 1)?;
    let days_in_month = time::util::days_in_year_month(year, month_value);

    let mut weeks = Vec::new();
    let mut week: [Option<CalendarDay>; 7] = Default::default();
    let mut column = usize::from(week_start.column_of(first.weekday()));

    for day in 1..=days_in_month {
        let date = calendar_date(year, month_value, day)?;
        week[column] = Some(annotate_day(date, anchor_date, reference_date, statuses));
        column += 1;
        if column == 7 {
            weeks.push(std::mem::take(&mut week));
            column = 0;
        }
    }
    if column > 0 {
        weeks.push(week);
    }

    Ok(MonthGrid {
        year,
        month,
        month_name: month_value.to_string(),
        week_start,
        weeks,
    })
}

/// `count` consecutive `(year, month)` pairs beginning with the month that
/// contains `start`.
#[must_use]
pub fn calendar_months(start: Date, count: usize) -> Vec<(i32, u8)> {
    let mut months = Vec::with_capacity(count);
    let mut year = start.year();
    let mut month = start.month();

    for _ in 0..count {
        months.push((year, u8::from(month)));
        if month == Month::December {
            year += 1;
        }
        month = month.next();
    }

    months
}

/// Engine bound to one tracker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakEngine {
    anchor_date: Date,
    week_start: WeekStart,
}

impl StreakEngine {
    #[must_use]
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            anchor_date: config.anchor_date,
            week_start: config.week_start,
        }
    }

    #[must_use]
    pub fn anchor_date(&self) -> Date {
        self.anchor_date
    }

    #[must_use]
    pub fn week_start(&self) -> WeekStart {
        self.week_start
    }

    #[must_use]
    pub fn compute_streak(&self, reference_date: Date, statuses: &BTreeMap<Date, Status>) -> u32 {
        compute_streak(self.anchor_date, reference_date, statuses)
    }

    #[must_use]
    pub fn streak_state(
        &self,
        reference_date: Date,
        statuses: &BTreeMap<Date, Status>,
    ) -> StreakState {
        streak_state(self.anchor_date, reference_date, statuses)
    }

    /// # Errors
    /// See [`build_month_grid`].
    pub fn build_month_grid(
        &self,
        year: i32,
        month: u8,
        reference_date: Date,
        statuses: &BTreeMap<Date, Status>,
    ) -> Result<MonthGrid, TrackerError> {
        build_month_grid(
            year,
            month,
            self.anchor_date,
            reference_date,
            statuses,
            self.week_start,
        )
    }

    /// Grids for `count` months starting at the anchor month.
    ///
    /// # Errors
    /// See [`build_month_grid`].
    pub fn calendar_from_anchor(
        &self,
        count: usize,
        reference_date: Date,
        statuses: &BTreeMap<Date, Status>,
    ) -> Result<Vec<MonthGrid>, TrackerError> {
        calendar_months(self.anchor_date, count)
            .into_iter()
            .map(|(year, month)| self.build_month_grid(year, month, reference_date, statuses))
            .collect()
    }

    /// Grids for every month from the anchor month through the month holding
    /// `reference_date`. Empty when the reference date precedes the anchor.
    ///
    /// # Errors
    /// See [`build_month_grid`].
    pub fn calendar_through(
        &self,
        reference_date: Date,
        statuses: &BTreeMap<Date, Status>,
    ) -> Result<Vec<MonthGrid>, TrackerError> {
        if reference_date < self.anchor_date {
            return Ok(Vec::new());
        }
        let span = months_between(self.anchor_date, reference_date) + 1;
        self.calendar_from_anchor(span, reference_date, statuses)
    }
}

fn annotate_day(
    date: Date,
    anchor_date: Date,
    reference_date: Date,
    statuses: &BTreeMap<Date, Status>,
) -> CalendarDay {
    let status = statuses.get(&date).copied().unwrap_or(Status::Unset);
    let is_anchor = date == anchor_date;
    let is_today = date == reference_date;
    let is_in_streak_window = anchor_date <= date && date <= reference_date;

    let marker = if is_anchor {
        Marker::Anchor
    } else if is_today {
        Marker::Today
    } else {
        match status {
            Status::Successful => Marker::Successful,
            Status::Unsuccessful => Marker::Unsuccessful,
            Status::Unset if is_in_streak_window => Marker::Successful,
            Status::Unset => Marker::Neutral,
        }
    };

    CalendarDay {
        date,
        day: date.day(),
        is_anchor,
        is_today,
        is_in_streak_window,
        status,
        marker,
    }
}

fn calendar_date(year: i32, month: Month, day: u8) -> Result<Date, TrackerError> {
    Date::from_calendar_date(year, month, day)
        .map_err(|err| TrackerError::InvalidDate(format!("{year}-{month}-{day}: {err}")))
}

fn whole_days_between(earlier: Date, later: Date) -> u32 {
    u32::try_from((later - earlier).whole_days()).unwrap_or(u32::MAX)
}

fn months_between(earlier: Date, later: Date) -> usize {
    let months = (i64::from(later.year()) - i64::from(earlier.year())) * 12
        + i64::from(u8::from(later.month()))
        - i64::from(u8::from(earlier.month()));
    usize::try_from(months).unwrap_or(0)
}
