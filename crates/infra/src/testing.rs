//! Shared fixtures for the unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use notifyflow_core::{
    ContractId, ExpectedVersion, FlowConfigId, InstallmentId, PatientId, ScheduleId, WorkerId,
};
use notifyflow_outreach::{
    Channel, ContactSchedule, Contract, FlowConfig, FlowStepConfig, Installment, Message, Patient,
};

use crate::clock::{Clock, ManualClock};
use crate::config::{NotificationSettings, RetryPolicy};
use crate::error::{DeliveryError, RepoError, RepoResult};
use crate::module::{NotificationModule, Repositories};
use crate::notifier::{Notifier, NotifierRegistry, PlaceholderRenderer, Recipient, RenderedMessage};
use crate::repos::{ContactScheduleRepo, InMemoryBilling, ScheduleFilter};

pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// What a scripted notifier does on one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    Deliver,
    Transient,
    Permanent,
    Hang(StdDuration),
}

/// Notifier that plays back queued behaviours, then falls back to `fallback`.
pub(crate) struct ScriptedNotifier {
    queue: Mutex<VecDeque<Script>>,
    fallback: Script,
    calls: AtomicUsize,
    delivered: Mutex<Vec<(String, String)>>,
}

impl ScriptedNotifier {
    pub(crate) fn new(fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn delivering() -> Arc<Self> {
        Self::new(Script::Deliver)
    }

    pub(crate) fn then(&self, script: Script) -> &Self {
        self.queue.lock().unwrap().push_back(script);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (address, body) of every delivered message.
    pub(crate) fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Notifier for ScriptedNotifier {
    fn send(&self, recipient: &Recipient, message: &RenderedMessage) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.queue.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match script {
            Script::Deliver => {
                self.delivered
                    .lock()
                    .unwrap()
                    .push((recipient.address.clone(), message.body.clone()));
                Ok(())
            }
            Script::Transient => Err(DeliveryError::transient("gateway busy")),
            Script::Permanent => Err(DeliveryError::permanent("number does not exist")),
            Script::Hang(for_how_long) => {
                thread::sleep(for_how_long);
                Ok(())
            }
        }
    }
}

/// Schedule store whose saves can be made to lose the version check, as if
/// another writer always got there first.
pub(crate) struct ContestedScheduleRepo {
    inner: Arc<dyn ContactScheduleRepo>,
    contested: AtomicBool,
}

impl ContestedScheduleRepo {
    pub(crate) fn new(inner: Arc<dyn ContactScheduleRepo>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            contested: AtomicBool::new(false),
        })
    }

    pub(crate) fn contest(&self, on: bool) {
        self.contested.store(on, Ordering::SeqCst);
    }
}

impl ContactScheduleRepo for ContestedScheduleRepo {
    fn get(&self, id: ScheduleId) -> RepoResult<Option<ContactSchedule>> {
        self.inner.get(id)
    }

    fn insert(&self, schedule: &ContactSchedule) -> RepoResult<()> {
        self.inner.insert(schedule)
    }

    fn save(&self, schedule: &ContactSchedule, expected: ExpectedVersion) -> RepoResult<()> {
        if self.contested.load(Ordering::SeqCst) {
            return Err(RepoError::Conflict(format!(
                "schedule {} was written concurrently",
                schedule.id_typed()
            )));
        }
        self.inner.save(schedule, expected)
    }

    fn find_active(
        &self,
        patient_id: PatientId,
        contract_id: ContractId,
    ) -> RepoResult<Option<ContactSchedule>> {
        self.inner.find_active(patient_id, contract_id)
    }

    fn find_active_for_contract(
        &self,
        contract_id: ContractId,
    ) -> RepoResult<Option<ContactSchedule>> {
        self.inner.find_active_for_contract(contract_id)
    }

    fn list_promotable(&self, now: DateTime<Utc>, limit: usize) -> RepoResult<Vec<ContactSchedule>> {
        self.inner.list_promotable(now, limit)
    }

    fn list_due(&self, now: DateTime<Utc>, limit: usize) -> RepoResult<Vec<ContactSchedule>> {
        self.inner.list_due(now, limit)
    }

    fn claim(
        &self,
        id: ScheduleId,
        worker: &WorkerId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> RepoResult<Option<ContactSchedule>> {
        self.inner.claim(id, worker, now, ttl)
    }

    fn release(&self, id: ScheduleId, worker: &WorkerId) -> RepoResult<()> {
        self.inner.release(id, worker)
    }

    fn list(&self, filter: &ScheduleFilter) -> RepoResult<Vec<ContactSchedule>> {
        self.inner.list(filter)
    }
}

/// A wired module over in-memory stores with one overdue patient.
///
/// The default flow is SMS (immediately), e-mail two days later, then a voice
/// step three days after that.
pub(crate) struct Harness {
    pub module: NotificationModule,
    pub billing: Arc<InMemoryBilling>,
    pub clock: Arc<ManualClock>,
    pub sms: Arc<ScriptedNotifier>,
    pub email: Arc<ScriptedNotifier>,
    pub voice: Arc<ScriptedNotifier>,
    pub flow_id: FlowConfigId,
    pub patient_id: PatientId,
    pub contract_id: ContractId,
}

pub(crate) fn settings() -> NotificationSettings {
    NotificationSettings::default()
        .with_retry(RetryPolicy::exponential(
            2,
            StdDuration::from_secs(5 * 60),
            StdDuration::from_secs(60 * 60),
        ))
        .with_send_timeout(StdDuration::from_millis(200))
        .with_max_concurrent(2)
        .with_worker_id(WorkerId::new("test-worker"))
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_settings(settings())
    }

    pub(crate) fn with_settings(settings: NotificationSettings) -> Self {
        Self::with_repos(settings, |repos| repos)
    }

    /// Like `with_settings`, letting the caller swap stores before wiring.
    pub(crate) fn with_repos(
        settings: NotificationSettings,
        wrap: impl FnOnce(Repositories) -> Repositories,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let billing = Arc::new(InMemoryBilling::new());
        let repos = wrap(Repositories::in_memory(billing.clone()));

        let sms_text = Message::new(
            Channel::Sms,
            None,
            "Hi {{patient_name}}, installment(s) overdue: {{overdue_count}}",
            true,
            start(),
        )
        .unwrap();
        let email_text = Message::new(
            Channel::Email,
            Some("Payment reminder (step {{step}})".to_string()),
            "Dear {{patient_name}}, please settle contract {{contract_id}}.",
            true,
            start(),
        )
        .unwrap();
        let voice_text = Message::new(Channel::Voice, None, "Call script", true, start()).unwrap();
        for message in [&sms_text, &email_text, &voice_text] {
            repos.messages.insert(message).unwrap();
        }

        let flow_id = FlowConfigId::new();
        repos
            .flows
            .register(
                FlowConfig::new(
                    flow_id,
                    "overdue-default",
                    1,
                    vec![
                        FlowStepConfig::new(0, Channel::Sms, StdDuration::ZERO, sms_text.id),
                        FlowStepConfig::new(
                            1,
                            Channel::Email,
                            StdDuration::from_secs(2 * 86_400),
                            email_text.id,
                        ),
                        FlowStepConfig::new(
                            2,
                            Channel::Voice,
                            StdDuration::from_secs(3 * 86_400),
                            voice_text.id,
                        ),
                    ],
                )
                .unwrap(),
            )
            .unwrap();

        let sms = ScriptedNotifier::delivering();
        let email = ScriptedNotifier::delivering();
        let voice = ScriptedNotifier::delivering();
        let mut notifiers = NotifierRegistry::new();
        notifiers.register(Channel::Sms, sms.clone()).unwrap();
        notifiers.register(Channel::Email, email.clone()).unwrap();
        notifiers.register(Channel::Voice, voice.clone()).unwrap();

        let module = NotificationModule::new(
            repos,
            notifiers,
            Arc::new(PlaceholderRenderer),
            settings.with_default_flow(flow_id),
            clock.clone(),
        )
        .unwrap();

        let mut harness = Self {
            module,
            billing,
            clock,
            sms,
            email,
            voice,
            flow_id,
            patient_id: PatientId::new(),
            contract_id: ContractId::new(),
        };
        let (patient_id, contract_id) = harness.add_overdue_contract("Ana Souza");
        harness.patient_id = patient_id;
        harness.contract_id = contract_id;
        harness
    }

    /// Add a patient with one active contract and one overdue installment.
    pub(crate) fn add_overdue_contract(&self, name: &str) -> (PatientId, ContractId) {
        let patient_id = PatientId::new();
        let contract_id = ContractId::new();
        self.billing
            .add_patient(Patient {
                id: patient_id,
                name: name.to_string(),
                phone: Some("+5511999990000".to_string()),
                email: Some("patient@example.com".to_string()),
            })
            .unwrap();
        self.billing
            .add_contract(Contract {
                id: contract_id,
                patient_id,
                flow_config_id: None,
                active: true,
            })
            .unwrap();
        self.billing
            .add_installment(Installment {
                id: InstallmentId::new(),
                contract_id,
                number: 1,
                due_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
                amount: 25_000,
                paid: false,
            })
            .unwrap();
        (patient_id, contract_id)
    }

    pub(crate) fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }

    pub(crate) fn in_days(&self, days: i64) -> DateTime<Utc> {
        self.clock.now() + Duration::days(days)
    }
}
