use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use chrono::{NaiveDate, TimeZone, Utc};
use notifyflow_core::{ContractId, FlowConfigId, InstallmentId, PatientId, WorkerId};
use notifyflow_infra::repos::InMemoryBilling;
use notifyflow_infra::{
    ManualClock, Notifier, NotificationModule, NotificationSettings, NotifierRegistry,
    PlaceholderRenderer, Repositories, DeliveryError,
};
use notifyflow_infra::notifier::{Recipient, RenderedMessage};
use notifyflow_outreach::{
    Channel, Contract, FlowConfig, FlowStepConfig, Installment, Message, Patient,
};
use std::sync::Arc;
use std::time::Duration;

/// Accepts everything instantly, so the numbers measure the engine only.
struct NullNotifier;

impl Notifier for NullNotifier {
    fn send(&self, _recipient: &Recipient, _message: &RenderedMessage) -> Result<(), DeliveryError> {
        Ok(())
    }
}

fn module_with_contracts(contracts: usize, workers: usize) -> NotificationModule {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let billing = Arc::new(InMemoryBilling::new());
    let repos = Repositories::in_memory(billing.clone());

    let sms = Message::new(Channel::Sms, None, "Hi {{patient_name}}", true, start).unwrap();
    repos.messages.insert(&sms).unwrap();
    let flow_id = FlowConfigId::new();
    repos
        .flows
        .register(
            FlowConfig::new(
                flow_id,
                "bench",
                1,
                vec![
                    FlowStepConfig::new(0, Channel::Sms, Duration::ZERO, sms.id),
                    FlowStepConfig::new(1, Channel::Sms, Duration::from_secs(86_400), sms.id),
                ],
            )
            .unwrap(),
        )
        .unwrap();

    for n in 0..contracts {
        let patient_id = PatientId::new();
        let contract_id = ContractId::new();
        billing
            .add_patient(Patient {
                id: patient_id,
                name: format!("Patient {n}"),
                phone: Some("+15550100".to_string()),
                email: None,
            })
            .unwrap();
        billing
            .add_contract(Contract {
                id: contract_id,
                patient_id,
                flow_config_id: None,
                active: true,
            })
            .unwrap();
        billing
            .add_installment(Installment {
                id: InstallmentId::new(),
                contract_id,
                number: 1,
                due_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
                amount: 10_000,
                paid: false,
            })
            .unwrap();
    }

    let mut notifiers = NotifierRegistry::new();
    notifiers.register(Channel::Sms, Arc::new(NullNotifier)).unwrap();

    NotificationModule::new(
        repos,
        notifiers,
        Arc::new(PlaceholderRenderer),
        NotificationSettings::default()
            .with_max_concurrent(workers)
            .with_sweep_batch_limit(contracts)
            .with_worker_id(WorkerId::new("bench"))
            .with_default_flow(flow_id),
        Arc::new(ManualClock::new(start)),
    )
    .unwrap()
}

fn bench_bulk_enrolment(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_enrolment");
    for size in [10usize, 100, 500] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || module_with_contracts(size, 1),
                |module| black_box(module.facade().bulk_schedule_overdue().unwrap()),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    for (size, workers) in [(100usize, 1usize), (100, 4), (500, 1), (500, 4)] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("{workers}_workers"), size),
            &size,
            |b, &size| {
                b.iter_batched(
                    || {
                        let module = module_with_contracts(size, workers);
                        module.facade().bulk_schedule_overdue().unwrap();
                        module
                    },
                    |module| {
                        let report = module.facade().run_automated().unwrap();
                        assert_eq!(report.sent, size);
                        black_box(report)
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_bulk_enrolment, bench_sweep);
criterion_main!(benches);
