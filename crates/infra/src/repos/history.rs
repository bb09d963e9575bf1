//! Append-only contact history.

use notifyflow_core::ScheduleId;
use notifyflow_outreach::ContactHistory;

use super::table::Table;
use crate::error::RepoResult;

/// Writer side is append-only: no update, no delete.
pub trait ContactHistoryRepo: Send + Sync {
    fn append(&self, entry: ContactHistory) -> RepoResult<()>;

    /// Entries for one schedule, in the order they occurred.
    fn for_schedule(&self, schedule_id: ScheduleId) -> RepoResult<Vec<ContactHistory>>;
}

#[derive(Debug, Default)]
pub struct InMemoryContactHistoryRepo {
    rows: Table<ScheduleId, Vec<ContactHistory>>,
}

impl InMemoryContactHistoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContactHistoryRepo for InMemoryContactHistoryRepo {
    fn append(&self, entry: ContactHistory) -> RepoResult<()> {
        self.rows
            .write()?
            .entry(entry.schedule_id)
            .or_default()
            .push(entry);
        Ok(())
    }

    fn for_schedule(&self, schedule_id: ScheduleId) -> RepoResult<Vec<ContactHistory>> {
        let mut entries = self.rows.get(&schedule_id)?.unwrap_or_default();
        entries.sort_by_key(|e| e.occurred_at);
        Ok(entries)
    }
}
