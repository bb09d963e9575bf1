//! Message definitions and flow configurations.

use notifyflow_core::{FlowConfigId, MessageId};
use notifyflow_outreach::{Channel, FlowConfig, Message};

use super::table::Table;
use crate::error::{RepoError, RepoResult};

pub trait MessageRepo: Send + Sync {
    fn get(&self, id: MessageId) -> RepoResult<Option<Message>>;

    fn insert(&self, message: &Message) -> RepoResult<()>;

    fn update(&self, message: &Message) -> RepoResult<()>;

    fn delete(&self, id: MessageId) -> RepoResult<()>;

    /// The message flagged `is_default` for `channel`, if any.
    fn default_for(&self, channel: Channel) -> RepoResult<Option<Message>>;
}

pub trait FlowStepConfigRepo: Send + Sync {
    fn get(&self, id: FlowConfigId) -> RepoResult<Option<FlowConfig>>;

    /// Register a flow version. Registered flows are never edited in place.
    fn register(&self, flow: FlowConfig) -> RepoResult<()>;

    fn list(&self) -> RepoResult<Vec<FlowConfig>>;

    fn references_message(&self, message_id: MessageId) -> RepoResult<bool> {
        Ok(self.list()?.iter().any(|f| f.references_message(message_id)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMessageRepo {
    rows: Table<MessageId, Message>,
}

impl InMemoryMessageRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageRepo for InMemoryMessageRepo {
    fn get(&self, id: MessageId) -> RepoResult<Option<Message>> {
        self.rows.get(&id)
    }

    fn insert(&self, message: &Message) -> RepoResult<()> {
        let mut rows = self.rows.write()?;
        if rows.contains_key(&message.id) {
            return Err(RepoError::Conflict(format!("message {} already exists", message.id)));
        }
        rows.insert(message.id, message.clone());
        Ok(())
    }

    fn update(&self, message: &Message) -> RepoResult<()> {
        let mut rows = self.rows.write()?;
        match rows.get_mut(&message.id) {
            Some(row) => {
                *row = message.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound(format!("message {}", message.id))),
        }
    }

    fn delete(&self, id: MessageId) -> RepoResult<()> {
        match self.rows.write()?.remove(&id) {
            Some(_) => Ok(()),
            None => Err(RepoError::NotFound(format!("message {id}"))),
        }
    }

    fn default_for(&self, channel: Channel) -> RepoResult<Option<Message>> {
        let mut defaults = self.rows.filter(|m| m.channel == channel && m.is_default)?;
        // Most recently edited default wins.
        defaults.sort_by_key(|m| m.updated_at);
        Ok(defaults.pop())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFlowRepo {
    rows: Table<FlowConfigId, FlowConfig>,
}

impl InMemoryFlowRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlowStepConfigRepo for InMemoryFlowRepo {
    fn get(&self, id: FlowConfigId) -> RepoResult<Option<FlowConfig>> {
        self.rows.get(&id)
    }

    fn register(&self, flow: FlowConfig) -> RepoResult<()> {
        let mut rows = self.rows.write()?;
        if rows.contains_key(&flow.id()) {
            return Err(RepoError::Conflict(format!(
                "flow {} is already registered; register a new version instead",
                flow.id()
            )));
        }
        rows.insert(flow.id(), flow);
        Ok(())
    }

    fn list(&self) -> RepoResult<Vec<FlowConfig>> {
        self.rows.filter(|_| true)
    }
}
