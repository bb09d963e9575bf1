//! Run one outreach sweep against a seeded in-memory deployment.
//!
//! Settings come from `NOTIFYFLOW_*` variables; `NOTIFYFLOW_LOG_FORMAT`
//! picks `json` (default) or `pretty` logs. Every channel is served by the
//! logging notifier, so nothing leaves the process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};

use notifyflow_core::{ContractId, FlowConfigId, InstallmentId, PatientId};
use notifyflow_observability::LogFormat;
use notifyflow_outreach::{
    Channel, Contract, FlowConfig, FlowStepConfig, Installment, Message, Patient,
};
use notifyflow_infra::repos::InMemoryBilling;
use notifyflow_infra::{
    LoggingNotifier, NotificationModule, NotificationSettings, NotifierRegistry,
    PlaceholderRenderer, Repositories, SystemClock,
};

fn main() -> anyhow::Result<()> {
    let format = std::env::var("NOTIFYFLOW_LOG_FORMAT")
        .map(|v| LogFormat::parse(&v))
        .unwrap_or_default();
    notifyflow_observability::init(format);

    let billing = Arc::new(InMemoryBilling::new());
    let repos = Repositories::in_memory(billing.clone());
    let flow_id = seed_flow(&repos)?;
    seed_billing(&billing)?;

    // The seeded flow replaces any NOTIFYFLOW_DEFAULT_FLOW: the stores are empty.
    let settings = NotificationSettings::from_env()
        .context("loading settings")?
        .with_default_flow(flow_id);

    let mut notifiers = NotifierRegistry::new();
    for channel in Channel::ALL {
        notifiers.register(channel, Arc::new(LoggingNotifier))?;
    }

    let module = NotificationModule::new(
        repos,
        notifiers,
        Arc::new(PlaceholderRenderer),
        settings,
        Arc::new(SystemClock),
    )?;

    let enrolment = module.facade().bulk_schedule_overdue()?;
    tracing::info!(%flow_id, enrolled = enrolment.enrolled(), "demo contracts enrolled");

    let report = module.facade().run_automated()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn seed_flow(repos: &Repositories) -> anyhow::Result<FlowConfigId> {
    let now = Utc::now();
    let sms = Message::new(
        Channel::Sms,
        None,
        "{{patient_name}}, you have {{overdue_count}} overdue installment(s).",
        true,
        now,
    )?;
    let email = Message::new(
        Channel::Email,
        Some("Payment reminder".to_string()),
        "Dear {{patient_name}}, contract {{contract_id}} has overdue installments.",
        true,
        now,
    )?;
    repos.messages.insert(&sms)?;
    repos.messages.insert(&email)?;

    let id = FlowConfigId::new();
    let day = Duration::from_secs(86_400);
    repos.flows.register(FlowConfig::new(
        id,
        "overdue-default",
        1,
        vec![
            FlowStepConfig::new(0, Channel::Sms, Duration::ZERO, sms.id),
            FlowStepConfig::new(1, Channel::Email, day * 2, email.id),
        ],
    )?)?;
    Ok(id)
}

fn seed_billing(billing: &InMemoryBilling) -> anyhow::Result<()> {
    let patient_id = PatientId::new();
    let contract_id = ContractId::new();
    billing.add_patient(Patient {
        id: patient_id,
        name: "Demo Patient".to_string(),
        phone: Some("+15550100".to_string()),
        email: Some("demo@example.com".to_string()),
    })?;
    billing.add_contract(Contract {
        id: contract_id,
        patient_id,
        flow_config_id: None,
        active: true,
    })?;
    billing.add_installment(Installment {
        id: InstallmentId::new(),
        contract_id,
        number: 1,
        due_date: (Utc::now() - ChronoDuration::days(10)).date_naive(),
        amount: 10_000,
        paid: false,
    })?;
    Ok(())
}
