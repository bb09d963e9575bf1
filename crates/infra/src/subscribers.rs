//! Event subscribers wired by the module.
//!
//! - [`HistoryRecorder`] appends every contact attempt (and every completed
//!   manual call) to the contact history.
//! - [`EscalationOpener`] opens a pending call whenever a schedule escalates,
//!   whoever advanced it.
//! - [`EscalationResumer`] moves an escalated schedule on once its pending
//!   call is resolved.
//! - [`AuditLog`] writes every outreach event to the log.

use std::sync::{Arc, Weak};

use anyhow::{Context, anyhow};
use tracing::{debug, info};

use notifyflow_core::HistoryEntryId;
use notifyflow_events::{Event, EventSubscriber};
use notifyflow_outreach::{
    CallResolved, Channel, ContactHistory, ContactOutcome, OutreachEvent, ScheduleStatus,
    StepAdvanced, StepOutcome,
};

use crate::repos::ContactHistoryRepo;
use crate::services::{ContactSchedulingService, PendingCallTracker};

pub struct HistoryRecorder {
    history: Arc<dyn ContactHistoryRepo>,
}

impl HistoryRecorder {
    pub fn new(history: Arc<dyn ContactHistoryRepo>) -> Self {
        Self { history }
    }

    fn entry_for(event: &OutreachEvent) -> Option<ContactHistory> {
        match event {
            OutreachEvent::ContactAttempted(attempt) => Some(ContactHistory {
                id: HistoryEntryId::new(),
                schedule_id: attempt.schedule_id,
                patient_id: attempt.patient_id,
                step_index: attempt.step_index,
                channel: attempt.channel,
                outcome: attempt.outcome,
                occurred_at: attempt.occurred_at,
                notes: attempt.notes.clone(),
            }),
            OutreachEvent::CallResolved(resolved) => Some(ContactHistory {
                id: HistoryEntryId::new(),
                schedule_id: resolved.schedule_id,
                patient_id: resolved.patient_id,
                step_index: resolved.step_index,
                channel: Channel::Voice,
                outcome: ContactOutcome::Sent,
                occurred_at: resolved.occurred_at,
                notes: Some("manual call completed".to_string()),
            }),
            _ => None,
        }
    }
}

impl EventSubscriber<OutreachEvent> for HistoryRecorder {
    fn name(&self) -> &str {
        "history_recorder"
    }

    fn handle(&self, event: &OutreachEvent) -> anyhow::Result<()> {
        let Some(entry) = Self::entry_for(event) else {
            return Ok(());
        };
        let schedule_id = entry.schedule_id;
        self.history
            .append(entry)
            .with_context(|| format!("appending history for schedule {schedule_id}"))
    }
}

/// Holds the tracker weakly: the tracker publishes on the dispatcher this
/// subscriber is registered on.
pub struct EscalationOpener {
    tracker: Weak<PendingCallTracker>,
}

impl EscalationOpener {
    pub fn new(tracker: &Arc<PendingCallTracker>) -> Self {
        Self {
            tracker: Arc::downgrade(tracker),
        }
    }

    pub(crate) fn reason_for(advanced: &StepAdvanced) -> String {
        match &advanced.outcome {
            StepOutcome::Failed { reason, .. } => format!(
                "schedule {}: step {} failed: {reason}",
                advanced.schedule_id, advanced.from_step
            ),
            other => format!(
                "schedule {}: step {} escalated ({})",
                advanced.schedule_id,
                advanced.from_step,
                other.action()
            ),
        }
    }

    fn open(&self, advanced: &StepAdvanced) -> anyhow::Result<()> {
        let tracker = self
            .tracker
            .upgrade()
            .ok_or_else(|| anyhow!("pending call tracker has been dropped"))?;
        tracker
            .ensure_open(advanced.schedule_id, Self::reason_for(advanced))
            .with_context(|| format!("opening a call for schedule {}", advanced.schedule_id))?;
        Ok(())
    }
}

impl EventSubscriber<OutreachEvent> for EscalationOpener {
    fn name(&self) -> &str {
        "escalation_opener"
    }

    fn handle(&self, event: &OutreachEvent) -> anyhow::Result<()> {
        match event {
            OutreachEvent::StepAdvanced(advanced)
                if advanced.to_status == ScheduleStatus::Escalated =>
            {
                self.open(advanced)
            }
            _ => Ok(()),
        }
    }
}

/// Holds the scheduling service weakly: the service owns the dispatcher this
/// subscriber is registered on.
pub struct EscalationResumer {
    scheduling: Weak<ContactSchedulingService>,
}

impl EscalationResumer {
    pub fn new(scheduling: &Arc<ContactSchedulingService>) -> Self {
        Self {
            scheduling: Arc::downgrade(scheduling),
        }
    }

    fn resume(&self, resolved: &CallResolved) -> anyhow::Result<()> {
        let scheduling = self
            .scheduling
            .upgrade()
            .ok_or_else(|| anyhow!("scheduling service has been dropped"))?;

        let schedule = scheduling.get(resolved.schedule_id)?;
        if schedule.status() != ScheduleStatus::Escalated {
            debug!(
                schedule_id = %resolved.schedule_id,
                status = %schedule.status(),
                "schedule not escalated, nothing to resume"
            );
            return Ok(());
        }

        let resumed = scheduling.apply_outcome(schedule, StepOutcome::CallResolved)?;
        info!(
            schedule_id = %resolved.schedule_id,
            call_id = %resolved.call_id,
            status = %resumed.status(),
            step_index = resumed.current_step_index(),
            "schedule resumed after manual call"
        );
        Ok(())
    }
}

impl EventSubscriber<OutreachEvent> for EscalationResumer {
    fn name(&self) -> &str {
        "escalation_resumer"
    }

    fn handle(&self, event: &OutreachEvent) -> anyhow::Result<()> {
        match event {
            OutreachEvent::CallResolved(resolved) => self.resume(resolved),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditLog;

impl EventSubscriber<OutreachEvent> for AuditLog {
    fn name(&self) -> &str {
        "audit_log"
    }

    fn handle(&self, event: &OutreachEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event).context("serializing event")?;
        info!(
            target: "notifyflow::audit",
            event_type = event.event_type(),
            occurred_at = %event.occurred_at(),
            payload = %payload,
            "outreach event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use notifyflow_core::{ContractId, PatientId, PendingCallId, ScheduleId};
    use notifyflow_outreach::{ContactAttempted, FailureKind};

    use super::*;
    use crate::repos::InMemoryContactHistoryRepo;

    fn at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn history_records_attempts_and_completed_calls() {
        let repo = Arc::new(InMemoryContactHistoryRepo::new());
        let recorder = HistoryRecorder::new(repo.clone());
        let schedule_id = ScheduleId::new();
        let patient_id = PatientId::new();

        recorder
            .handle(&OutreachEvent::ContactAttempted(ContactAttempted {
                schedule_id,
                patient_id,
                step_index: 0,
                channel: Channel::Sms,
                outcome: ContactOutcome::Failed,
                notes: Some("gateway busy".to_string()),
                manual: false,
                occurred_at: at(),
            }))
            .unwrap();
        recorder
            .handle(&OutreachEvent::CallResolved(CallResolved {
                call_id: PendingCallId::new(),
                schedule_id,
                patient_id,
                step_index: 1,
                occurred_at: at(),
            }))
            .unwrap();

        let entries = repo.for_schedule(schedule_id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, ContactOutcome::Failed);
        assert_eq!(entries[0].notes.as_deref(), Some("gateway busy"));
        assert_eq!(entries[1].channel, Channel::Voice);
        assert_eq!(entries[1].outcome, ContactOutcome::Sent);
        assert_eq!(entries[1].notes.as_deref(), Some("manual call completed"));
    }

    fn escalation(outcome: StepOutcome) -> StepAdvanced {
        StepAdvanced {
            schedule_id: ScheduleId::new(),
            patient_id: PatientId::new(),
            contract_id: ContractId::new(),
            from_status: ScheduleStatus::Due,
            to_status: ScheduleStatus::Escalated,
            from_step: 1,
            to_step: 1,
            outcome,
            retry_count: 0,
            next_action_at: None,
            occurred_at: at(),
        }
    }

    #[test]
    fn call_reason_names_the_step_and_the_failure() {
        let advanced = escalation(StepOutcome::failed(FailureKind::Permanent, "no answer"));
        let reason = EscalationOpener::reason_for(&advanced);
        assert!(reason.contains("step 1 failed: no answer"));
        assert!(reason.contains(&advanced.schedule_id.to_string()));
    }

    #[test]
    fn opener_ignores_other_transitions_and_fails_without_a_tracker() {
        let opener = EscalationOpener {
            tracker: Weak::new(),
        };
        let mut sent = escalation(StepOutcome::Sent);
        sent.to_status = ScheduleStatus::Sent;
        assert!(opener.handle(&OutreachEvent::StepAdvanced(sent)).is_ok());

        let err = opener
            .handle(&OutreachEvent::StepAdvanced(escalation(StepOutcome::failed(
                FailureKind::Permanent,
                "no answer",
            ))))
            .unwrap_err();
        assert!(err.to_string().contains("dropped"));
    }

    #[test]
    fn resumer_fails_once_the_service_is_gone() {
        let resumer = EscalationResumer {
            scheduling: Weak::new(),
        };
        let err = resumer
            .handle(&OutreachEvent::CallResolved(CallResolved {
                call_id: PendingCallId::new(),
                schedule_id: ScheduleId::new(),
                patient_id: PatientId::new(),
                step_index: 0,
                occurred_at: at(),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("dropped"));
    }
}
