//! Manual follow-up calls opened when automated contact gives up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notifyflow_core::{
    ContractId, DomainError, DomainResult, Entity, PatientId, PendingCallId, ScheduleId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingCallStatus {
    Open,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCall {
    pub id: PendingCallId,
    pub schedule_id: ScheduleId,
    pub patient_id: PatientId,
    pub contract_id: ContractId,
    /// Step the schedule was on when it escalated.
    pub step_index: u32,
    pub reason: String,
    pub status: PendingCallStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingCall {
    pub fn open(
        schedule_id: ScheduleId,
        patient_id: PatientId,
        contract_id: ContractId,
        step_index: u32,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PendingCallId::new(),
            schedule_id,
            patient_id,
            contract_id,
            step_index,
            reason: reason.into(),
            status: PendingCallStatus::Open,
            created_at: now,
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PendingCallStatus::Open
    }

    /// OPEN -> DONE. Checked before anything changes.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_open() {
            return Err(DomainError::already_resolved(format!(
                "pending call {} was resolved already",
                self.id
            )));
        }
        self.status = PendingCallStatus::Done;
        self.resolved_at = Some(now);
        Ok(())
    }
}

impl Entity for PendingCall {
    type Id = PendingCallId;

    fn id(&self) -> &PendingCallId {
        &self.id
    }
}
