#![allow(clippy::missing_errors_doc)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use streak_tracker_core::{
    format_date, format_rfc3339, now_utc, parse_date, parse_rfc3339, DateStatus, Status,
    StatusStore, TrackerError,
};
use time::Date;
use tracing::{debug, warn};

const STATUS_MIGRATION_VERSION: i64 = 1;

const SCHEMA_STATUS_V1: &str = r"
CREATE TABLE IF NOT EXISTS day_statuses (
  date TEXT PRIMARY KEY,
  status TEXT NOT NULL CHECK (status IN ('successful', 'unsuccessful')),
  recorded_at TEXT NOT NULL
);
";

/// Durable [`StatusStore`] backed by a single `SQLite` file.
pub struct SqliteStatusStore {
    conn: Connection,
}

impl SqliteStatusStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Opens `path` and applies the schema in one step.
    pub fn open_migrated(path: &Path) -> Result<Self> {
        let store = Self::open(path)?;
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_STATUS_V1)
            .context("failed to apply day status schema")?;

        let now = format_rfc3339(now_utc())?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![STATUS_MIGRATION_VERSION, now],
            )
            .context("failed to register day status schema migration")?;

        Ok(())
    }

    /// Full stored row for `date`, including when it was last written.
    pub fn get_record(&self, date: Date) -> Result<Option<DateStatus>, TrackerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT date, status, recorded_at FROM day_statuses WHERE date = ?1")
            .map_err(|err| unavailable("prepare record lookup", &err))?;

        stmt.query_row(params![format_date(date)], parse_record_row)
            .optional()
            .map_err(|err| unavailable("read day status", &err))
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl StatusStore for SqliteStatusStore {
    fn get_status(&self, date: Date) -> Result<Status, TrackerError> {
        Ok(self
            .get_record(date)?
            .map_or(Status::Unset, |record| record.status))
    }

    fn set_status(
        &mut self,
        date: Date,
        status: Status,
    ) -> Result<Option<DateStatus>, TrackerError> {
        let key = format_date(date);

        if status.is_unset() {
            let removed = self
                .conn
                .execute("DELETE FROM day_statuses WHERE date = ?1", params![key])
                .map_err(|err| unavailable("delete day status", &err))?;
            debug!(date = %key, removed, "cleared day status");
            return Ok(None);
        }

        let recorded_at = now_utc();
        self.conn
            .execute(
                "INSERT INTO day_statuses(date, status, recorded_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(date) DO UPDATE SET
                   status = excluded.status,
                   recorded_at = excluded.recorded_at",
                params![key, status.as_str(), format_rfc3339(recorded_at)?],
            )
            .map_err(|err| unavailable("upsert day status", &err))?;
        debug!(date = %key, status = %status, "recorded day status");

        Ok(Some(DateStatus {
            date,
            status,
            recorded_at,
        }))
    }

    fn list_statuses(&self, from: Date, to: Date) -> Result<BTreeMap<Date, Status>, TrackerError> {
        if from > to {
            return Ok(BTreeMap::new());
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT date, status, recorded_at
                 FROM day_statuses
                 WHERE date BETWEEN ?1 AND ?2
                 ORDER BY date ASC",
            )
            .map_err(|err| unavailable("prepare range scan", &err))?;

        let rows = stmt
            .query_map(params![format_date(from), format_date(to)], parse_record_row)
            .map_err(|err| unavailable("scan day statuses", &err))?;

        let mut statuses = BTreeMap::new();
        for row in rows {
            let record = row.map_err(|err| unavailable("decode day status", &err))?;
            statuses.insert(record.date, record.status);
        }
        Ok(statuses)
    }
}

fn parse_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DateStatus> {
    let date_raw: String = row.get(0)?;
    let status_raw: String = row.get(1)?;
    let recorded_at_raw: String = row.get(2)?;

    let date = parse_date(&date_raw).map_err(|err| to_sql_error(0, &err))?;
    let status = match Status::parse(&status_raw) {
        Some(status) if !status.is_unset() => status,
        _ => {
            return Err(to_sql_error(
                1,
                &TrackerError::InvalidStatus(status_raw.clone()),
            ))
        }
    };
    let recorded_at = parse_rfc3339(&recorded_at_raw).map_err(|err| to_sql_error(2, &err))?;

    Ok(DateStatus {
        date,
        status,
        recorded_at,
    })
}

fn to_sql_error(column: usize, err: &TrackerError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

fn unavailable(operation: &str, err: &rusqlite::Error) -> TrackerError {
    warn!(operation, error = %err, "status store operation failed");
    TrackerError::StoreUnavailable(format!("{operation}: {err}"))
}
