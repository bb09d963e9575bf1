//! Read-only views of the billing side: patients, contracts, installments.
//!
//! These records are owned by the billing system; outreach only reads them to
//! decide eligibility and to address a notification.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use notifyflow_core::{ContractId, Entity, FlowConfigId, InstallmentId, PatientId};

use crate::flow::Channel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Patient {
    /// Address to use for `channel`, if the patient has one on file.
    pub fn contact_for(&self, channel: Channel) -> Option<&str> {
        let address = match channel {
            Channel::Sms | Channel::Voice | Channel::Whatsapp => self.phone.as_deref(),
            Channel::Email => self.email.as_deref(),
        };
        address.filter(|addr| !addr.trim().is_empty())
    }
}

impl Entity for Patient {
    type Id = PatientId;

    fn id(&self) -> &PatientId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub patient_id: PatientId,
    /// Flow to use for this contract; `None` falls back to the deployment default.
    pub flow_config_id: Option<FlowConfigId>,
    pub active: bool,
}

impl Entity for Contract {
    type Id = ContractId;

    fn id(&self) -> &ContractId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub contract_id: ContractId,
    pub number: u32,
    pub due_date: NaiveDate,
    /// Amount in smallest currency unit (e.g., cents).
    pub amount: u64,
    pub paid: bool,
}

impl Installment {
    /// Unpaid and past its due date as of `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.paid && self.due_date < now.date_naive()
    }
}

impl Entity for Installment {
    type Id = InstallmentId;

    fn id(&self) -> &InstallmentId {
        &self.id
    }
}
