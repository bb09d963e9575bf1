//! Bulk enrolment of contracts into contact schedules.
//!
//! Every contract is an independent item: one bad contract is reported and
//! skipped, the rest of the batch carries on. Enrolling a contract that
//! already has an active schedule is a no-op, so re-running a batch is safe.

use std::sync::Arc;

use tracing::{info, warn};

use notifyflow_core::{ContractId, FlowConfigId, ScheduleId};

use crate::clock::Clock;
use crate::error::{NotificationError, NotificationResult};
use crate::repos::{ContactScheduleRepo, ContractRepo, InstallmentRepo};
use crate::services::ContactSchedulingService;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Enrolled { schedule_id: ScheduleId },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EnrollmentResult {
    pub contract_id: ContractId,
    #[serde(flatten)]
    pub status: EnrollmentStatus,
}

/// Per-contract results, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BulkEnrollmentReport {
    pub results: Vec<EnrollmentResult>,
}

impl BulkEnrollmentReport {
    pub fn enrolled(&self) -> usize {
        self.count(|s| matches!(s, EnrollmentStatus::Enrolled { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, EnrollmentStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, EnrollmentStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&EnrollmentStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}

pub struct BulkScheduler {
    contracts: Arc<dyn ContractRepo>,
    installments: Arc<dyn InstallmentRepo>,
    schedules: Arc<dyn ContactScheduleRepo>,
    scheduling: Arc<ContactSchedulingService>,
    default_flow: Option<FlowConfigId>,
    clock: Arc<dyn Clock>,
}

impl BulkScheduler {
    pub fn new(
        contracts: Arc<dyn ContractRepo>,
        installments: Arc<dyn InstallmentRepo>,
        schedules: Arc<dyn ContactScheduleRepo>,
        scheduling: Arc<ContactSchedulingService>,
        default_flow: Option<FlowConfigId>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            contracts,
            installments,
            schedules,
            scheduling,
            default_flow,
            clock,
        }
    }

    pub fn enroll(&self, contract_ids: &[ContractId]) -> BulkEnrollmentReport {
        let results: Vec<EnrollmentResult> = contract_ids
            .iter()
            .map(|&contract_id| EnrollmentResult {
                contract_id,
                status: self.enroll_one(contract_id),
            })
            .collect();
        let report = BulkEnrollmentReport { results };

        info!(
            total = contract_ids.len(),
            enrolled = report.enrolled(),
            skipped = report.skipped(),
            failed = report.failed(),
            "bulk enrolment finished"
        );
        report
    }

    /// Enrol every contract that currently has an overdue installment.
    pub fn enroll_overdue(&self) -> NotificationResult<BulkEnrollmentReport> {
        let contract_ids = self.installments.overdue_contract_ids(self.clock.now())?;
        Ok(self.enroll(&contract_ids))
    }

    fn enroll_one(&self, contract_id: ContractId) -> EnrollmentStatus {
        match self.try_enroll(contract_id) {
            Ok(status) => status,
            Err(e) if e.is_conflict() => EnrollmentStatus::Skipped {
                reason: e.to_string(),
            },
            Err(e) => {
                warn!(%contract_id, error = %e, "contract enrolment failed");
                EnrollmentStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn try_enroll(&self, contract_id: ContractId) -> NotificationResult<EnrollmentStatus> {
        let contract = self
            .contracts
            .get_contract(contract_id)?
            .ok_or_else(|| NotificationError::not_found(format!("contract {contract_id}")))?;

        if !contract.active {
            return Ok(skipped("contract is not active"));
        }
        if self.installments.overdue_count(contract_id, self.clock.now())? == 0 {
            return Ok(skipped("no overdue installment"));
        }
        if let Some(active) = self.schedules.find_active_for_contract(contract_id)? {
            return Ok(skipped(format!("already enrolled in schedule {}", active.id_typed())));
        }

        let flow_config_id = contract
            .flow_config_id
            .or(self.default_flow)
            .ok_or_else(|| {
                NotificationError::Configuration(format!(
                    "contract {contract_id} has no flow and no default flow is configured"
                ))
            })?;

        let schedule =
            self.scheduling
                .create_schedule(contract.patient_id, contract_id, flow_config_id)?;
        Ok(EnrollmentStatus::Enrolled {
            schedule_id: schedule.id_typed(),
        })
    }
}

fn skipped(reason: impl Into<String>) -> EnrollmentStatus {
    EnrollmentStatus::Skipped {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    fn scheduler(h: &Harness, default_flow: Option<FlowConfigId>) -> BulkScheduler {
        let repos = h.module.repositories();
        BulkScheduler::new(
            repos.contracts.clone(),
            repos.installments.clone(),
            repos.schedules.clone(),
            h.module.scheduling().clone(),
            default_flow,
            h.clock.clone(),
        )
    }

    #[test]
    fn contract_without_any_flow_fails_alone() {
        let h = Harness::new();
        let (_, second) = h.add_overdue_contract("Second");

        let report = scheduler(&h, None).enroll(&[h.contract_id, second]);
        assert_eq!(report.failed(), 2);
        assert!(report.results.iter().all(|r| matches!(
            &r.status,
            EnrollmentStatus::Failed { reason } if reason.contains("no default flow")
        )));

        let report = scheduler(&h, Some(h.flow_id)).enroll(&[h.contract_id, second]);
        assert_eq!(report.enrolled(), 2);
    }

    #[test]
    fn contract_without_overdue_installments_is_skipped() {
        let h = Harness::new();
        h.billing.settle(h.contract_id).unwrap();

        let report = scheduler(&h, Some(h.flow_id)).enroll(&[h.contract_id]);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.enrolled(), 0);
    }

    #[test]
    fn report_serializes_with_flat_status() {
        let contract_id = ContractId::new();
        let report = BulkEnrollmentReport {
            results: vec![EnrollmentResult {
                contract_id,
                status: EnrollmentStatus::Skipped {
                    reason: "no overdue installment".to_string(),
                },
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["status"], "skipped");
        assert_eq!(json["results"][0]["reason"], "no overdue installment");
    }
}
