//! Outbound message definitions referenced by flow steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notifyflow_core::{DomainError, DomainResult, Entity, MessageId};

use crate::flow::Channel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel: Channel,
    /// Used by e-mail; other channels ignore it.
    pub subject: Option<String>,
    /// Template body with `{{placeholder}}` markers.
    pub content: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        channel: Channel,
        subject: Option<String>,
        content: impl Into<String>,
        is_default: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let content = content.into();
        ensure_content(&content)?;
        Ok(Self {
            id: MessageId::new(),
            channel,
            subject,
            content,
            is_default,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update(
        &mut self,
        subject: Option<String>,
        content: impl Into<String>,
        is_default: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let content = content.into();
        ensure_content(&content)?;
        self.subject = subject;
        self.content = content;
        self.is_default = is_default;
        self.updated_at = now;
        Ok(())
    }
}

fn ensure_content(content: &str) -> DomainResult<()> {
    if content.trim().is_empty() {
        return Err(DomainError::validation("message content must not be empty"));
    }
    Ok(())
}

impl Entity for Message {
    type Id = MessageId;

    fn id(&self) -> &MessageId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_content_is_rejected() {
        let err = Message::new(Channel::Sms, None, "   ", false, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn update_keeps_identity() {
        let created = Utc::now();
        let mut msg =
            Message::new(Channel::Email, None, "Hi {{patient_name}}", true, created).unwrap();
        let id = msg.id;
        let later = created + chrono::Duration::minutes(1);

        msg.update(Some("Reminder".into()), "Hello again", false, later).unwrap();
        assert_eq!(msg.id, id);
        assert_eq!(msg.content, "Hello again");
        assert_eq!(msg.created_at, created);
        assert_eq!(msg.updated_at, later);
        assert!(msg.update(None, "", false, later).is_err());
    }
}
