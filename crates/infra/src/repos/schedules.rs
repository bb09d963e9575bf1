//! Contact schedule storage with an atomic claim.

use chrono::{DateTime, Duration, Utc};

use notifyflow_core::{AggregateRoot, ContractId, ExpectedVersion, PatientId, ScheduleId, WorkerId};
use notifyflow_outreach::{ContactSchedule, ScheduleStatus};

use super::table::Table;
use crate::error::{RepoError, RepoResult};

/// Listing filter. Without a status only active (non-terminal) schedules
/// are returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleFilter {
    pub status: Option<ScheduleStatus>,
    pub patient_id: Option<PatientId>,
    pub due_before: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ScheduleFilter {
    fn default() -> Self {
        Self {
            status: None,
            patient_id: None,
            due_before: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl ScheduleFilter {
    pub fn matches(&self, schedule: &ContactSchedule) -> bool {
        let status_ok = match self.status {
            Some(status) => schedule.status() == status,
            None => !schedule.status().is_terminal(),
        };
        status_ok
            && self.patient_id.is_none_or(|p| schedule.patient_id() == p)
            && self
                .due_before
                .is_none_or(|at| schedule.next_action_at().is_some_and(|next| next <= at))
    }
}

pub trait ContactScheduleRepo: Send + Sync {
    fn get(&self, id: ScheduleId) -> RepoResult<Option<ContactSchedule>>;

    /// Store a newly enrolled schedule. Fails with `Conflict` when an active
    /// schedule already exists for the same patient and contract.
    fn insert(&self, schedule: &ContactSchedule) -> RepoResult<()>;

    /// Replace a schedule whose stored version still equals `expected`.
    fn save(&self, schedule: &ContactSchedule, expected: ExpectedVersion) -> RepoResult<()>;

    fn find_active(
        &self,
        patient_id: PatientId,
        contract_id: ContractId,
    ) -> RepoResult<Option<ContactSchedule>>;

    fn find_active_for_contract(&self, contract_id: ContractId)
        -> RepoResult<Option<ContactSchedule>>;

    /// PENDING or SENT schedules whose timer has passed, oldest first.
    fn list_promotable(&self, now: DateTime<Utc>, limit: usize) -> RepoResult<Vec<ContactSchedule>>;

    /// DUE schedules whose timer has passed, oldest first.
    fn list_due(&self, now: DateTime<Utc>, limit: usize) -> RepoResult<Vec<ContactSchedule>>;

    /// Atomically mark a claimable schedule as held by `worker`.
    ///
    /// `Ok(None)` means another worker holds it, or it is no longer DUE; the
    /// caller skips it.
    fn claim(
        &self,
        id: ScheduleId,
        worker: &WorkerId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> RepoResult<Option<ContactSchedule>>;

    /// Drop `worker`'s claim without changing anything else.
    fn release(&self, id: ScheduleId, worker: &WorkerId) -> RepoResult<()>;

    fn list(&self, filter: &ScheduleFilter) -> RepoResult<Vec<ContactSchedule>>;
}

/// In-memory schedule store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryContactScheduleRepo {
    rows: Table<ScheduleId, ContactSchedule>,
}

impl InMemoryContactScheduleRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn oldest_first<F>(&self, limit: usize, keep: F) -> RepoResult<Vec<ContactSchedule>>
    where
        F: FnMut(&ContactSchedule) -> bool,
    {
        let mut rows = self.rows.filter(keep)?;
        rows.sort_by_key(|s| (s.next_action_at(), s.id_typed()));
        rows.truncate(limit);
        Ok(rows)
    }
}

impl ContactScheduleRepo for InMemoryContactScheduleRepo {
    fn get(&self, id: ScheduleId) -> RepoResult<Option<ContactSchedule>> {
        self.rows.get(&id)
    }

    fn insert(&self, schedule: &ContactSchedule) -> RepoResult<()> {
        let mut rows = self.rows.write()?;
        let id = schedule.id_typed();
        if rows.contains_key(&id) {
            return Err(RepoError::Conflict(format!("schedule {id} already exists")));
        }
        let duplicate = rows.values().any(|s| {
            s.is_active()
                && s.patient_id() == schedule.patient_id()
                && s.contract_id() == schedule.contract_id()
        });
        if duplicate {
            return Err(RepoError::Conflict(format!(
                "active schedule exists for patient {} and contract {}",
                schedule.patient_id(),
                schedule.contract_id()
            )));
        }
        rows.insert(id, schedule.clone());
        Ok(())
    }

    fn save(&self, schedule: &ContactSchedule, expected: ExpectedVersion) -> RepoResult<()> {
        let mut rows = self.rows.write()?;
        let id = schedule.id_typed();
        let stored = rows
            .get(&id)
            .ok_or_else(|| RepoError::NotFound(format!("schedule {id}")))?;
        if !expected.matches(stored.version()) {
            return Err(RepoError::Conflict(format!(
                "schedule {id}: expected {expected:?}, stored {}",
                stored.version()
            )));
        }
        rows.insert(id, schedule.clone());
        Ok(())
    }

    fn find_active(
        &self,
        patient_id: PatientId,
        contract_id: ContractId,
    ) -> RepoResult<Option<ContactSchedule>> {
        Ok(self
            .rows
            .filter(|s| {
                s.is_active() && s.patient_id() == patient_id && s.contract_id() == contract_id
            })?
            .into_iter()
            .next())
    }

    fn find_active_for_contract(
        &self,
        contract_id: ContractId,
    ) -> RepoResult<Option<ContactSchedule>> {
        Ok(self
            .rows
            .filter(|s| s.is_active() && s.contract_id() == contract_id)?
            .into_iter()
            .next())
    }

    fn list_promotable(&self, now: DateTime<Utc>, limit: usize) -> RepoResult<Vec<ContactSchedule>> {
        self.oldest_first(limit, |s| s.is_promotable(now))
    }

    fn list_due(&self, now: DateTime<Utc>, limit: usize) -> RepoResult<Vec<ContactSchedule>> {
        self.oldest_first(limit, |s| s.status() == ScheduleStatus::Due && s.is_due_at(now))
    }

    fn claim(
        &self,
        id: ScheduleId,
        worker: &WorkerId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> RepoResult<Option<ContactSchedule>> {
        let mut rows = self.rows.write()?;
        match rows.get_mut(&id) {
            Some(schedule) if schedule.is_claimable(now, ttl) => {
                schedule.mark_claimed(worker.clone(), now);
                Ok(Some(schedule.clone()))
            }
            Some(_) => Ok(None),
            None => Err(RepoError::NotFound(format!("schedule {id}"))),
        }
    }

    fn release(&self, id: ScheduleId, worker: &WorkerId) -> RepoResult<()> {
        let mut rows = self.rows.write()?;
        if let Some(schedule) = rows.get_mut(&id) {
            if schedule.claimed_by() == Some(worker) {
                schedule.release_claim();
            }
        }
        Ok(())
    }

    fn list(&self, filter: &ScheduleFilter) -> RepoResult<Vec<ContactSchedule>> {
        let mut rows = self.rows.filter(|s| filter.matches(s))?;
        rows.sort_by_key(|s| (s.next_action_at(), s.id_typed()));
        Ok(rows
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use notifyflow_core::FlowConfigId;
    use notifyflow_events::execute;
    use notifyflow_outreach::{EnrollSchedule, ScheduleCommand};

    use super::*;

    fn enrolled(patient_id: PatientId, contract_id: ContractId, at: DateTime<Utc>) -> ContactSchedule {
        let id = ScheduleId::new();
        let mut schedule = ContactSchedule::empty(id);
        execute(
            &mut schedule,
            &ScheduleCommand::Enroll(EnrollSchedule {
                schedule_id: id,
                patient_id,
                contract_id,
                flow_config_id: FlowConfigId::new(),
                first_step_delay: Duration::zero(),
                occurred_at: at,
            }),
        )
        .unwrap();
        schedule
    }

    #[test]
    fn second_active_enrolment_is_a_conflict() {
        let repo = InMemoryContactScheduleRepo::new();
        let (patient, contract) = (PatientId::new(), ContractId::new());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        repo.insert(&enrolled(patient, contract, now)).unwrap();
        let err = repo.insert(&enrolled(patient, contract, now)).unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
        assert!(repo.find_active(patient, contract).unwrap().is_some());
    }

    #[test]
    fn stale_save_is_rejected() {
        let repo = InMemoryContactScheduleRepo::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let schedule = enrolled(PatientId::new(), ContractId::new(), now);
        repo.insert(&schedule).unwrap();

        let err = repo.save(&schedule, ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
        repo.save(&schedule, ExpectedVersion::Exact(1)).unwrap();
    }

    #[test]
    fn filter_defaults_to_active_schedules() {
        let repo = InMemoryContactScheduleRepo::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let patient = PatientId::new();
        repo.insert(&enrolled(patient, ContractId::new(), now)).unwrap();
        repo.insert(&enrolled(PatientId::new(), ContractId::new(), now)).unwrap();

        let all = repo.list(&ScheduleFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let mine = repo
            .list(&ScheduleFilter {
                patient_id: Some(patient),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(mine.len(), 1);

        let page = repo
            .list(&ScheduleFilter {
                offset: 1,
                limit: 5,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 1);
    }
}
