//! Private chat messages, participants, and the de-duplication key.
//!
//! Messages carry no server-assigned id. Two records denote the same event
//! exactly when their [`DedupKey`]s are equal.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Opaque identity of a chat participant (the identity provider's user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
        }
    }
}

/// A conversation counterpart as listed by the partner directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    #[serde(alias = "clerkId")]
    pub id: UserId,
    #[serde(rename = "displayName", alias = "username", default)]
    pub display_name: String,
}

impl Partner {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
        }
    }
}

/// One private message, as published, delivered, and stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "senderClerkId")]
    pub sender_id: UserId,
    #[serde(alias = "recipientClerkId")]
    pub recipient_id: UserId,
    #[serde(default, alias = "senderUsername")]
    pub sender_display_name: String,
    #[serde(default, alias = "recipientUsername")]
    pub recipient_display_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build an outgoing message from `identity` to `partner`.
    ///
    /// The timestamp is truncated to milliseconds so the broker's echo of
    /// this message parses back to an identical key.
    pub fn compose(
        identity: &Identity,
        partner: &Partner,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sender_id: identity.id.clone(),
            recipient_id: partner.id.clone(),
            sender_display_name: identity.display_name.clone(),
            recipient_display_name: partner.display_name.clone(),
            content: content.into(),
            timestamp: now.trunc_subsecs(3),
        }
    }

    /// Parse and validate a JSON payload.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let msg: Message = serde_json::from_str(raw)?;
        msg.validate()?;
        Ok(msg)
    }

    fn validate(&self) -> Result<(), FrameError> {
        if self.sender_id.is_blank() {
            return Err(FrameError::MissingField("senderId"));
        }
        if self.recipient_id.is_blank() {
            return Err(FrameError::MissingField("recipientId"));
        }
        Ok(())
    }

    /// The other participant, seen from `local`: the sender if `local`
    /// received the message, otherwise the recipient.
    pub fn counterpart(&self, local: &UserId) -> &UserId {
        if &self.recipient_id == local {
            &self.sender_id
        } else {
            &self.recipient_id
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            sender: self.sender_id.clone(),
            timestamp: self.timestamp,
            content: self.content.clone(),
        }
    }
}

/// `(sender, timestamp, content)`: the only identity a message has.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    sender: UserId,
    timestamp: DateTime<Utc>,
    content: String,
}
