//! Notification sender: one delivery attempt for one schedule.
//!
//! Resolves the schedule's current step, the patient's address on that
//! step's channel, and the message content, then calls the channel notifier.
//! The notifier runs on its own thread so a hung gateway costs at most
//! `send_timeout`; a timed-out call is abandoned and reported as transient.
//! Abandoned threads still count against the channel's in-flight cap until
//! they return, so a hung gateway cannot pile up threads without bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use notifyflow_core::{PatientId, ScheduleId};
use notifyflow_outreach::{
    Channel, ContactAttempted, ContactOutcome, ContactSchedule, FlowStepConfig, Message,
    StepOutcome,
};

use crate::error::{DeliveryError, NotificationError, NotificationResult};
use crate::notifier::{
    Notifier, NotifierRegistry, Recipient, RenderContext, RenderedMessage, TemplateRenderer,
};
use crate::repos::{FlowStepConfigRepo, InstallmentRepo, MessageRepo, PatientRepo};

/// What happened when the sender tried to reach a patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub schedule_id: ScheduleId,
    pub patient_id: PatientId,
    pub step_index: u32,
    pub channel: Channel,
    pub result: Result<(), DeliveryError>,
}

impl DeliveryAttempt {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// State machine input for this attempt.
    pub fn outcome(&self) -> StepOutcome {
        match &self.result {
            Ok(()) => StepOutcome::Sent,
            Err(e) => StepOutcome::failed(e.kind(), e.to_string()),
        }
    }

    pub fn to_event(&self, manual: bool, occurred_at: DateTime<Utc>) -> ContactAttempted {
        let (outcome, notes) = match &self.result {
            Ok(()) => (ContactOutcome::Sent, None),
            Err(e) => (ContactOutcome::from_failure(e.kind()), Some(e.to_string())),
        };
        ContactAttempted {
            schedule_id: self.schedule_id,
            patient_id: self.patient_id,
            step_index: self.step_index,
            channel: self.channel,
            outcome,
            notes,
            manual,
            occurred_at,
        }
    }
}

/// Notifier calls still running, per channel.
#[derive(Debug, Default)]
struct InFlight {
    counts: Mutex<HashMap<Channel, usize>>,
}

impl InFlight {
    fn acquire(self: &Arc<Self>, channel: Channel, cap: usize) -> Option<InFlightSlot> {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(channel).or_default();
        if *count >= cap {
            return None;
        }
        *count += 1;
        Some(InFlightSlot {
            in_flight: Arc::clone(self),
            channel,
        })
    }

    fn count(&self, channel: Channel) -> usize {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.get(&channel).copied().unwrap_or(0)
    }
}

/// Held by the notifier thread; frees the slot when the call returns.
struct InFlightSlot {
    in_flight: Arc<InFlight>,
    channel: Channel,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        let mut counts = self
            .in_flight
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = counts.get_mut(&self.channel) {
            *count = count.saturating_sub(1);
        }
    }
}

pub struct NotificationSenderService {
    patients: Arc<dyn PatientRepo>,
    installments: Arc<dyn InstallmentRepo>,
    messages: Arc<dyn MessageRepo>,
    flows: Arc<dyn FlowStepConfigRepo>,
    notifiers: NotifierRegistry,
    renderer: Arc<dyn TemplateRenderer>,
    send_timeout: Duration,
    max_in_flight: usize,
    in_flight: Arc<InFlight>,
}

impl NotificationSenderService {
    pub fn new(
        patients: Arc<dyn PatientRepo>,
        installments: Arc<dyn InstallmentRepo>,
        messages: Arc<dyn MessageRepo>,
        flows: Arc<dyn FlowStepConfigRepo>,
        notifiers: NotifierRegistry,
        renderer: Arc<dyn TemplateRenderer>,
        send_timeout: Duration,
        max_in_flight: usize,
    ) -> Self {
        Self {
            patients,
            installments,
            messages,
            flows,
            notifiers,
            renderer,
            send_timeout,
            max_in_flight: max_in_flight.max(1),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Notifier calls on `channel` that have not returned yet.
    pub fn in_flight(&self, channel: Channel) -> usize {
        self.in_flight.count(channel)
    }

    /// Try the schedule's current step once.
    ///
    /// Delivery problems (no address, gateway failure, timeout) come back
    /// inside the `DeliveryAttempt`. `Err` is reserved for records that
    /// should exist and do not, which no retry will fix.
    pub fn send_for(
        &self,
        schedule: &ContactSchedule,
        now: DateTime<Utc>,
    ) -> NotificationResult<DeliveryAttempt> {
        let step = self.current_step(schedule)?;
        let patient = self
            .patients
            .get_patient(schedule.patient_id())?
            .ok_or_else(|| {
                NotificationError::not_found(format!("patient {}", schedule.patient_id()))
            })?;

        let attempt = |result| DeliveryAttempt {
            schedule_id: schedule.id_typed(),
            patient_id: patient.id,
            step_index: step.step_index,
            channel: step.channel,
            result,
        };

        let Some(address) = patient.contact_for(step.channel) else {
            return Ok(attempt(Err(DeliveryError::permanent(format!(
                "patient has no {} address",
                step.channel
            )))));
        };
        let recipient = Recipient {
            patient_id: patient.id,
            name: patient.name.clone(),
            address: address.to_string(),
        };

        let template = self.template_for(&step)?;
        let context = RenderContext {
            patient_name: patient.name.clone(),
            contract_id: schedule.contract_id(),
            step_index: step.step_index,
            overdue_count: self.installments.overdue_count(schedule.contract_id(), now)?,
        };

        let result = self
            .renderer
            .render(&template, &context)
            .and_then(|message| self.deliver(step.channel, recipient, message));

        match &result {
            Ok(()) => debug!(
                schedule_id = %schedule.id_typed(),
                step_index = step.step_index,
                channel = %step.channel,
                "notification sent"
            ),
            Err(error) => warn!(
                schedule_id = %schedule.id_typed(),
                step_index = step.step_index,
                channel = %step.channel,
                error = %error,
                "notification failed"
            ),
        }
        Ok(attempt(result))
    }

    fn current_step(&self, schedule: &ContactSchedule) -> NotificationResult<FlowStepConfig> {
        let flow = self
            .flows
            .get(schedule.flow_config_id())?
            .ok_or_else(|| {
                NotificationError::not_found(format!("flow {}", schedule.flow_config_id()))
            })?;
        flow.step(schedule.current_step_index())
            .cloned()
            .ok_or_else(|| {
                NotificationError::Configuration(format!(
                    "flow {} has no step {}",
                    flow.id(),
                    schedule.current_step_index()
                ))
            })
    }

    /// The step's own message, else the channel default.
    fn template_for(&self, step: &FlowStepConfig) -> NotificationResult<Message> {
        if let Some(message) = self.messages.get(step.message_template_id)? {
            return Ok(message);
        }
        self.messages.default_for(step.channel)?.ok_or_else(|| {
            NotificationError::Configuration(format!(
                "message {} is missing and channel {} has no default",
                step.message_template_id, step.channel
            ))
        })
    }

    fn deliver(
        &self,
        channel: Channel,
        recipient: Recipient,
        message: RenderedMessage,
    ) -> Result<(), DeliveryError> {
        let notifier: Arc<dyn Notifier> = self.notifiers.get(channel)?;
        let Some(slot) = self.in_flight.acquire(channel, self.max_in_flight) else {
            return Err(DeliveryError::transient(format!(
                "{} {channel} sends still in flight",
                self.max_in_flight
            )));
        };
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name(format!("notify-{channel}"))
            .spawn(move || {
                let _slot = slot;
                // The receiver is gone if the call outlived the timeout.
                let _ = tx.send(notifier.send(&recipient, &message));
            })
            .map_err(|e| DeliveryError::transient(format!("could not start send: {e}")))?;

        match rx.recv_timeout(self.send_timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(DeliveryError::Timeout(self.send_timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(DeliveryError::transient("notifier panicked"))
            }
        }
    }
}
