use std::collections::BTreeMap;

use time::Date;

use crate::{now_utc, DateStatus, Status, TrackerError};

/// Date-keyed status persistence.
///
/// Each date is an independent key: there is no cross-date transaction and
/// concurrent writers to the same date resolve as last-writer-wins. Adapters
/// never retry internally; an unreachable backend surfaces as
/// [`TrackerError::StoreUnavailable`] and the caller decides what to do.
pub trait StatusStore {
    /// Returns the stored status, or [`Status::Unset`] when no row exists.
    ///
    /// # Errors
    /// Returns [`TrackerError::StoreUnavailable`] when the backend cannot be read.
    fn get_status(&self, date: Date) -> Result<Status, TrackerError>;

    /// Upserts `status` for `date`, or deletes the row when `status` is
    /// [`Status::Unset`]. Deleting a missing row is a no-op. Returns the row
    /// that is now stored, if any.
    ///
    /// # Errors
    /// Returns [`TrackerError::StoreUnavailable`] when the backend cannot be written.
    fn set_status(&mut self, date: Date, status: Status)
        -> Result<Option<DateStatus>, TrackerError>;

    /// Returns every stored status with `from <= date <= to`. Dates without a
    /// row are absent from the mapping. An inverted range yields an empty map.
    ///
    /// # Errors
    /// Returns [`TrackerError::StoreUnavailable`] when the backend cannot be read.
    fn list_statuses(&self, from: Date, to: Date) -> Result<BTreeMap<Date, Status>, TrackerError>;

    /// Every stored status regardless of date.
    ///
    /// # Errors
    /// Returns [`TrackerError::StoreUnavailable`] when the backend cannot be read.
    fn list_all_statuses(&self) -> Result<BTreeMap<Date, Status>, TrackerError> {
        self.list_statuses(Date::MIN, Date::MAX)
    }
}

/// Process-local store used by tests and by hosts that do not need
/// durability.
#[derive(Debug, Clone)]
pub struct InMemoryStatusStore {
    records: BTreeMap<Date, DateStatus>,
    available: bool,
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            available: true,
        }
    }
}

impl InMemoryStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the backend going away (`false`) or coming back (`true`).
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    #[must_use]
    pub fn record(&self, date: Date) -> Option<&DateStatus> {
        self.records.get(&date)
    }

    fn ensure_available(&self) -> Result<(), TrackerError> {
        if self.available {
            Ok(())
        } else {
            Err(TrackerError::StoreUnavailable(
                "in-memory store is marked unavailable".to_string(),
            ))
        }
    }
}

impl StatusStore for InMemoryStatusStore {
    fn get_status(&self, date: Date) -> Result<Status, TrackerError> {
        self.ensure_available()?;
        Ok(self
            .records
            .get(&date)
            .map_or(Status::Unset, |record| record.status))
    }

    fn set_status(
        &mut self,
        date: Date,
        status: Status,
    ) -> Result<Option<DateStatus>, TrackerError> {
        self.ensure_available()?;

        if status.is_unset() {
            let _ = self.records.remove(&date);
            return Ok(None);
        }

        let record = DateStatus {
            date,
            status,
            recorded_at: now_utc(),
        };
        self.records.insert(date, record.clone());
        Ok(Some(record))
    }

    fn list_statuses(&self, from: Date, to: Date) -> Result<BTreeMap<Date, Status>, TrackerError> {
        self.ensure_available()?;
        if from > to {
            return Ok(BTreeMap::new());
        }

        Ok(self
            .records
            .range(from..=to)
            .map(|(date, record)| (*date, record.status))
            .collect())
    }
}
