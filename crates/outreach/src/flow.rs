//! Flow configuration: the ordered contact steps a schedule walks through.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use notifyflow_core::{DomainError, DomainResult, FlowConfigId, MessageId, ValueObject};

/// Longest delay a single step may wait after the previous one.
const MAX_STEP_DELAY: StdDuration = StdDuration::from_secs(365 * 24 * 60 * 60);

/// Outbound delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Voice,
    Whatsapp,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Sms, Channel::Email, Channel::Voice, Channel::Whatsapp];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Voice => "voice",
            Channel::Whatsapp => "whatsapp",
        }
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStepConfig {
    pub step_index: u32,
    pub channel: Channel,
    /// Wait between the previous step's delivery (or enrolment, for step 0)
    /// and this step becoming due.
    pub delay_after_previous: StdDuration,
    pub message_template_id: MessageId,
    /// A failed attempt on this step escalates straight to a manual call.
    #[serde(default)]
    pub requires_voice: bool,
}

impl FlowStepConfig {
    pub fn new(
        step_index: u32,
        channel: Channel,
        delay_after_previous: StdDuration,
        message_template_id: MessageId,
    ) -> Self {
        Self {
            step_index,
            channel,
            delay_after_previous,
            message_template_id,
            requires_voice: false,
        }
    }

    pub fn requiring_voice(mut self) -> Self {
        self.requires_voice = true;
        self
    }

    /// Delay as a calendar duration (validated to fit when the flow was built).
    pub fn delay(&self) -> Duration {
        Duration::from_std(self.delay_after_previous).unwrap_or_default()
    }
}

impl ValueObject for FlowStepConfig {}

/// A versioned, immutable step set.
///
/// Step indexes are contiguous from 0. Editing a flow that active schedules
/// already reference means registering a new `FlowConfig` with a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    id: FlowConfigId,
    name: String,
    version: u32,
    steps: Vec<FlowStepConfig>,
}

impl FlowConfig {
    pub fn new(
        id: FlowConfigId,
        name: impl Into<String>,
        version: u32,
        steps: Vec<FlowStepConfig>,
    ) -> DomainResult<Self> {
        if steps.is_empty() {
            return Err(DomainError::validation("flow must have at least one step"));
        }

        for (position, step) in steps.iter().enumerate() {
            if step.step_index as usize != position {
                return Err(DomainError::validation(format!(
                    "step indexes must be contiguous from 0 (position {position} has index {})",
                    step.step_index
                )));
            }
            if step.delay_after_previous > MAX_STEP_DELAY {
                return Err(DomainError::validation(format!(
                    "step {} delay exceeds one year",
                    step.step_index
                )));
            }
        }

        Ok(Self {
            id,
            name: name.into(),
            version,
            steps,
        })
    }

    pub fn id(&self) -> FlowConfigId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn steps(&self) -> &[FlowStepConfig] {
        &self.steps
    }

    pub fn first_step(&self) -> &FlowStepConfig {
        // Non-empty by construction.
        &self.steps[0]
    }

    pub fn step(&self, index: u32) -> Option<&FlowStepConfig> {
        self.steps.get(index as usize)
    }

    /// The step after `index`, if the flow continues.
    pub fn next_step(&self, index: u32) -> Option<&FlowStepConfig> {
        self.step(index.checked_add(1)?)
    }

    pub fn is_last(&self, index: u32) -> bool {
        self.next_step(index).is_none()
    }

    pub fn references_message(&self, message_id: MessageId) -> bool {
        self.steps
            .iter()
            .any(|s| s.message_template_id == message_id)
    }
}
