//! Append-only record of contact attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notifyflow_core::{Entity, HistoryEntryId, PatientId, ScheduleId};

use crate::flow::Channel;
use crate::schedule::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactOutcome {
    Sent,
    Failed,
    NoAnswer,
}

impl ContactOutcome {
    /// Transient failures may still succeed on retry; permanent ones mean
    /// nobody could be reached.
    pub fn from_failure(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Transient => ContactOutcome::Failed,
            FailureKind::Permanent => ContactOutcome::NoAnswer,
        }
    }
}

/// One delivery attempt. Never edited or deleted after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactHistory {
    pub id: HistoryEntryId,
    pub schedule_id: ScheduleId,
    pub patient_id: PatientId,
    pub step_index: u32,
    pub channel: Channel,
    pub outcome: ContactOutcome,
    pub occurred_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl Entity for ContactHistory {
    type Id = HistoryEntryId;

    fn id(&self) -> &HistoryEntryId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds_map_to_outcomes() {
        assert_eq!(
            ContactOutcome::from_failure(FailureKind::Transient),
            ContactOutcome::Failed
        );
        assert_eq!(
            ContactOutcome::from_failure(FailureKind::Permanent),
            ContactOutcome::NoAnswer
        );
    }

    #[test]
    fn outcomes_serialize_in_upper_case() {
        let json = serde_json::to_string(&ContactOutcome::NoAnswer).unwrap();
        assert_eq!(json, "\"NO_ANSWER\"");
    }
}
