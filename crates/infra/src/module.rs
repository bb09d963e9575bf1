//! Composition root: wires repositories, services, subscribers and buses.

use std::sync::Arc;

use tracing::info;

use notifyflow_events::{EventDispatcher, MessageKind};
use notifyflow_outreach::{OutreachEvent, OutreachEventKind};

use crate::clock::Clock;
use crate::config::NotificationSettings;
use crate::error::NotificationResult;
use crate::facade::NotificationFacade;
use crate::handlers::{self, CommandHandlers, QueryHandlers};
use crate::notifier::{NotifierRegistry, TemplateRenderer};
use crate::repos::{
    ContactHistoryRepo, ContactScheduleRepo, ContractRepo, FlowStepConfigRepo, InMemoryBilling,
    InMemoryContactHistoryRepo, InMemoryContactScheduleRepo, InMemoryFlowRepo,
    InMemoryMessageRepo, InMemoryPendingCallRepo, InstallmentRepo, MessageRepo, PatientRepo,
    PendingCallRepo,
};
use crate::services::{
    AutomatedRunDriver, BulkScheduler, ContactSchedulingService, NotificationSenderService,
    PendingCallTracker,
};
use crate::subscribers::{AuditLog, EscalationOpener, EscalationResumer, HistoryRecorder};

/// Storage the module runs against.
#[derive(Clone)]
pub struct Repositories {
    pub patients: Arc<dyn PatientRepo>,
    pub contracts: Arc<dyn ContractRepo>,
    pub installments: Arc<dyn InstallmentRepo>,
    pub schedules: Arc<dyn ContactScheduleRepo>,
    pub history: Arc<dyn ContactHistoryRepo>,
    pub pending_calls: Arc<dyn PendingCallRepo>,
    pub messages: Arc<dyn MessageRepo>,
    pub flows: Arc<dyn FlowStepConfigRepo>,
}

impl Repositories {
    /// Fresh in-memory stores over the given billing data.
    pub fn in_memory(billing: Arc<InMemoryBilling>) -> Self {
        Self {
            patients: billing.clone(),
            contracts: billing.clone(),
            installments: billing,
            schedules: Arc::new(InMemoryContactScheduleRepo::new()),
            history: Arc::new(InMemoryContactHistoryRepo::new()),
            pending_calls: Arc::new(InMemoryPendingCallRepo::new()),
            messages: Arc::new(InMemoryMessageRepo::new()),
            flows: Arc::new(InMemoryFlowRepo::new()),
        }
    }
}

/// A fully wired notification module.
///
/// Construction fails if any command or query kind is left without a
/// handler, or if the settings do not validate.
pub struct NotificationModule {
    facade: NotificationFacade,
    events: Arc<EventDispatcher<OutreachEvent>>,
    scheduling: Arc<ContactSchedulingService>,
    repos: Repositories,
    settings: NotificationSettings,
}

impl NotificationModule {
    pub fn new(
        repos: Repositories,
        notifiers: NotifierRegistry,
        renderer: Arc<dyn TemplateRenderer>,
        settings: NotificationSettings,
        clock: Arc<dyn Clock>,
    ) -> NotificationResult<Self> {
        settings.validate()?;
        let events: Arc<EventDispatcher<OutreachEvent>> = Arc::new(EventDispatcher::new());

        let scheduling = Arc::new(ContactSchedulingService::new(
            repos.schedules.clone(),
            repos.flows.clone(),
            events.clone(),
            settings.retry.clone(),
            clock.clone(),
        ));
        let sender = Arc::new(NotificationSenderService::new(
            repos.patients.clone(),
            repos.installments.clone(),
            repos.messages.clone(),
            repos.flows.clone(),
            notifiers,
            renderer,
            settings.send_timeout,
            settings.max_in_flight_per_channel,
        ));
        let tracker = Arc::new(PendingCallTracker::new(
            repos.pending_calls.clone(),
            repos.schedules.clone(),
            events.clone(),
            clock.clone(),
        ));
        let run_driver = Arc::new(AutomatedRunDriver::new(
            repos.schedules.clone(),
            repos.installments.clone(),
            scheduling.clone(),
            sender.clone(),
            tracker.clone(),
            events.clone(),
            settings.clone(),
            clock.clone(),
        ));
        let bulk = Arc::new(BulkScheduler::new(
            repos.contracts.clone(),
            repos.installments.clone(),
            repos.schedules.clone(),
            scheduling.clone(),
            settings.default_flow_config_id,
            clock.clone(),
        ));

        events.subscribe_all(
            &[OutreachEventKind::ContactAttempted, OutreachEventKind::CallResolved],
            Arc::new(HistoryRecorder::new(repos.history.clone())),
        );
        events.subscribe(
            OutreachEventKind::StepAdvanced,
            Arc::new(EscalationOpener::new(&tracker)),
        );
        events.subscribe(
            OutreachEventKind::CallResolved,
            Arc::new(EscalationResumer::new(&scheduling)),
        );
        events.subscribe_all(OutreachEventKind::all(), Arc::new(AuditLog));

        let commands = handlers::command_bus(Arc::new(CommandHandlers {
            scheduling: scheduling.clone(),
            sender,
            run_driver,
            bulk,
            tracker: tracker.clone(),
            messages: repos.messages.clone(),
            flows: repos.flows.clone(),
            events: events.clone(),
            clock,
        }))?;
        let queries = handlers::query_bus(Arc::new(QueryHandlers {
            schedules: repos.schedules.clone(),
            tracker,
        }))?;

        info!(
            commands = commands.len(),
            queries = queries.len(),
            worker = %settings.worker_id,
            "notification module ready"
        );

        Ok(Self {
            facade: NotificationFacade::new(Arc::new(commands), Arc::new(queries)),
            events,
            scheduling,
            repos,
            settings,
        })
    }

    pub fn facade(&self) -> &NotificationFacade {
        &self.facade
    }

    /// Subscribe extra listeners here (outbound webhooks, metrics, ...).
    pub fn events(&self) -> &Arc<EventDispatcher<OutreachEvent>> {
        &self.events
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    pub fn scheduling(&self) -> &Arc<ContactSchedulingService> {
        &self.scheduling
    }
}
