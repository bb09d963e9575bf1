//! Outbound delivery: per-channel notifiers and template rendering.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use notifyflow_core::{ContractId, PatientId};
use notifyflow_outreach::{Channel, Message};

use crate::error::{DeliveryError, NotificationError, NotificationResult};

/// Who a notification goes to, resolved for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub patient_id: PatientId,
    pub name: String,
    /// Phone number or e-mail address, depending on the channel.
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub channel: Channel,
    pub subject: Option<String>,
    pub body: String,
}

/// One channel gateway (SMS, e-mail, voice, ...).
///
/// Implementations may block on network IO; the sender bounds every call
/// with its send timeout.
pub trait Notifier: Send + Sync {
    fn send(&self, recipient: &Recipient, message: &RenderedMessage) -> Result<(), DeliveryError>;
}

/// Notifiers keyed by channel. One notifier per channel.
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    notifiers: HashMap<Channel, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        channel: Channel,
        notifier: Arc<dyn Notifier>,
    ) -> NotificationResult<&mut Self> {
        if self.notifiers.contains_key(&channel) {
            return Err(NotificationError::Configuration(format!(
                "notifier already registered for channel {channel}"
            )));
        }
        self.notifiers.insert(channel, notifier);
        Ok(self)
    }

    pub fn get(&self, channel: Channel) -> Result<Arc<dyn Notifier>, DeliveryError> {
        self.notifiers
            .get(&channel)
            .cloned()
            .ok_or(DeliveryError::NoNotifier(channel))
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<_> = self.notifiers.keys().copied().collect();
        channels.sort();
        channels
    }
}

impl fmt::Debug for NotifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}

/// Values available to templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub patient_name: String,
    pub contract_id: ContractId,
    pub step_index: u32,
    pub overdue_count: usize,
}

pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template: &Message,
        context: &RenderContext,
    ) -> Result<RenderedMessage, DeliveryError>;
}

/// Substitutes `{{patient_name}}`, `{{contract_id}}`, `{{step}}` and
/// `{{overdue_count}}`. Unknown placeholders are left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl PlaceholderRenderer {
    fn substitute(text: &str, context: &RenderContext) -> String {
        // Steps are shown 1-based to patients.
        text.replace("{{patient_name}}", &context.patient_name)
            .replace("{{contract_id}}", &context.contract_id.to_string())
            .replace("{{step}}", &(context.step_index + 1).to_string())
            .replace("{{overdue_count}}", &context.overdue_count.to_string())
    }
}

impl TemplateRenderer for PlaceholderRenderer {
    fn render(
        &self,
        template: &Message,
        context: &RenderContext,
    ) -> Result<RenderedMessage, DeliveryError> {
        let body = Self::substitute(&template.content, context);
        if body.trim().is_empty() {
            return Err(DeliveryError::permanent(format!(
                "message {} renders to an empty body",
                template.id
            )));
        }
        Ok(RenderedMessage {
            channel: template.channel,
            subject: template
                .subject
                .as_deref()
                .map(|s| Self::substitute(s, context)),
            body,
        })
    }
}

/// Logs instead of delivering. For local runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn send(&self, recipient: &Recipient, message: &RenderedMessage) -> Result<(), DeliveryError> {
        info!(
            patient_id = %recipient.patient_id,
            channel = %message.channel,
            address = %recipient.address,
            "notification delivered to log"
        );
        Ok(())
    }
}
