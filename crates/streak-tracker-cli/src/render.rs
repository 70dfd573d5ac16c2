use std::fmt::Write as _;

use streak_tracker_core::{CalendarDay, Marker, MonthGrid};

const CELL_WIDTH: usize = 4;

fn marker_symbol(marker: Marker) -> char {
    match marker {
        Marker::Anchor => '*',
        Marker::Today => '@',
        Marker::Successful => '+',
        Marker::Unsuccessful => 'x',
        Marker::Neutral => ' ',
    }
}

fn render_cell(cell: Option<&CalendarDay>) -> String {
    match cell {
        Some(day) => format!("{:>2}{} ", day.day, marker_symbol(day.marker)),
        None => " ".repeat(CELL_WIDTH),
    }
}

/// Plain-text month block: title, weekday header, one line per week.
#[must_use]
pub fn render_month(grid: &MonthGrid) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", grid.month_name, grid.year);

    let header = grid
        .week_start
        .weekday_labels()
        .iter()
        .map(|label| format!("{label:>2}  "))
        .collect::<String>();
    let _ = writeln!(out, "{}", header.trim_end());

    for week in &grid.weeks {
        let line = week
            .iter()
            .map(|cell| render_cell(cell.as_ref()))
            .collect::<String>();
        let _ = writeln!(out, "{}", line.trim_end());
    }

    out
}

#[must_use]
pub fn legend() -> String {
    [
        Marker::Anchor,
        Marker::Today,
        Marker::Successful,
        Marker::Unsuccessful,
    ]
    .iter()
    .map(|marker| format!("{}={}", marker_symbol(*marker), marker.as_str()))
    .collect::<Vec<_>>()
    .join("  ")
}
