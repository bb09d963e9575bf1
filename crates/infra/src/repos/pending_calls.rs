//! Pending manual calls. At most one OPEN call per schedule.

use notifyflow_core::{PatientId, PendingCallId, ScheduleId};
use notifyflow_outreach::{PendingCall, PendingCallStatus};

use super::table::Table;
use crate::error::{RepoError, RepoResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCallFilter {
    pub status: Option<PendingCallStatus>,
    pub patient_id: Option<PatientId>,
    pub schedule_id: Option<ScheduleId>,
    pub limit: usize,
}

impl Default for PendingCallFilter {
    fn default() -> Self {
        Self {
            status: Some(PendingCallStatus::Open),
            patient_id: None,
            schedule_id: None,
            limit: 100,
        }
    }
}

pub trait PendingCallRepo: Send + Sync {
    /// Insert an OPEN call. Fails with `AlreadyOpen` if the schedule already
    /// has one; the check and the insert are one atomic step.
    fn insert_open(&self, call: &PendingCall) -> RepoResult<()>;

    fn get(&self, id: PendingCallId) -> RepoResult<Option<PendingCall>>;

    fn save(&self, call: &PendingCall) -> RepoResult<()>;

    fn find_open(&self, schedule_id: ScheduleId) -> RepoResult<Option<PendingCall>>;

    /// Oldest first.
    fn list(&self, filter: &PendingCallFilter) -> RepoResult<Vec<PendingCall>>;
}

#[derive(Debug, Default)]
pub struct InMemoryPendingCallRepo {
    rows: Table<PendingCallId, PendingCall>,
}

impl InMemoryPendingCallRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingCallRepo for InMemoryPendingCallRepo {
    fn insert_open(&self, call: &PendingCall) -> RepoResult<()> {
        let mut rows = self.rows.write()?;
        if rows
            .values()
            .any(|c| c.schedule_id == call.schedule_id && c.is_open())
        {
            return Err(RepoError::AlreadyOpen(call.schedule_id.to_string()));
        }
        rows.insert(call.id, call.clone());
        Ok(())
    }

    fn get(&self, id: PendingCallId) -> RepoResult<Option<PendingCall>> {
        self.rows.get(&id)
    }

    fn save(&self, call: &PendingCall) -> RepoResult<()> {
        let mut rows = self.rows.write()?;
        match rows.get_mut(&call.id) {
            Some(row) => {
                *row = call.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound(format!("pending call {}", call.id))),
        }
    }

    fn find_open(&self, schedule_id: ScheduleId) -> RepoResult<Option<PendingCall>> {
        Ok(self
            .rows
            .filter(|c| c.schedule_id == schedule_id && c.is_open())?
            .into_iter()
            .next())
    }

    fn list(&self, filter: &PendingCallFilter) -> RepoResult<Vec<PendingCall>> {
        let mut calls = self.rows.filter(|c| {
            filter.status.is_none_or(|s| c.status == s)
                && filter.patient_id.is_none_or(|p| c.patient_id == p)
                && filter.schedule_id.is_none_or(|id| c.schedule_id == id)
        })?;
        calls.sort_by_key(|c| (c.created_at, c.id));
        calls.truncate(filter.limit);
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use notifyflow_core::ContractId;

    use super::*;

    #[test]
    fn one_open_call_per_schedule() {
        let repo = InMemoryPendingCallRepo::new();
        let schedule = ScheduleId::new();
        let open = |reason: &str| {
            PendingCall::open(schedule, PatientId::new(), ContractId::new(), 0, reason, Utc::now())
        };

        let mut first = open("first");
        repo.insert_open(&first).unwrap();
        let err = repo.insert_open(&open("second")).unwrap_err();
        assert!(matches!(err, RepoError::AlreadyOpen(_)));

        first.resolve(Utc::now()).unwrap();
        repo.save(&first).unwrap();
        repo.insert_open(&open("third")).unwrap();
        assert_eq!(repo.find_open(schedule).unwrap().map(|c| c.reason), Some("third".into()));
    }
}
