//! Billing records (patients, contracts, installments). Read-only here.

use chrono::{DateTime, Utc};

use notifyflow_core::{ContractId, PatientId};
use notifyflow_outreach::{Contract, Installment, Patient};

use super::table::Table;
use crate::error::RepoResult;

pub trait PatientRepo: Send + Sync {
    fn get_patient(&self, id: PatientId) -> RepoResult<Option<Patient>>;
}

pub trait ContractRepo: Send + Sync {
    fn get_contract(&self, id: ContractId) -> RepoResult<Option<Contract>>;
}

pub trait InstallmentRepo: Send + Sync {
    fn installments_for(&self, contract_id: ContractId) -> RepoResult<Vec<Installment>>;

    /// Contracts with at least one overdue unpaid installment as of `now`.
    fn overdue_contract_ids(&self, now: DateTime<Utc>) -> RepoResult<Vec<ContractId>>;

    fn overdue_count(&self, contract_id: ContractId, now: DateTime<Utc>) -> RepoResult<usize> {
        Ok(self
            .installments_for(contract_id)?
            .iter()
            .filter(|i| i.is_overdue(now))
            .count())
    }
}

/// In-memory billing data for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBilling {
    patients: Table<PatientId, Patient>,
    contracts: Table<ContractId, Contract>,
    installments: Table<ContractId, Vec<Installment>>,
}

impl InMemoryBilling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_patient(&self, patient: Patient) -> RepoResult<()> {
        self.patients.upsert(patient.id, patient)
    }

    pub fn add_contract(&self, contract: Contract) -> RepoResult<()> {
        self.contracts.upsert(contract.id, contract)
    }

    pub fn add_installment(&self, installment: Installment) -> RepoResult<()> {
        self.installments
            .write()?
            .entry(installment.contract_id)
            .or_default()
            .push(installment);
        Ok(())
    }

    /// Mark every installment of `contract_id` as paid.
    pub fn settle(&self, contract_id: ContractId) -> RepoResult<()> {
        if let Some(rows) = self.installments.write()?.get_mut(&contract_id) {
            rows.iter_mut().for_each(|i| i.paid = true);
        }
        Ok(())
    }
}

impl PatientRepo for InMemoryBilling {
    fn get_patient(&self, id: PatientId) -> RepoResult<Option<Patient>> {
        self.patients.get(&id)
    }
}

impl ContractRepo for InMemoryBilling {
    fn get_contract(&self, id: ContractId) -> RepoResult<Option<Contract>> {
        self.contracts.get(&id)
    }
}

impl InstallmentRepo for InMemoryBilling {
    fn installments_for(&self, contract_id: ContractId) -> RepoResult<Vec<Installment>> {
        Ok(self.installments.get(&contract_id)?.unwrap_or_default())
    }

    fn overdue_contract_ids(&self, now: DateTime<Utc>) -> RepoResult<Vec<ContractId>> {
        let rows = self.installments.read()?;
        let mut ids: Vec<ContractId> = rows
            .iter()
            .filter(|(_, items)| items.iter().any(|i| i.is_overdue(now)))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
