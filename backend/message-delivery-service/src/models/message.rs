use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery status of a message.
///
/// Variants are declared in lifecycle order so the derived `Ord` matches
/// `sent < delivered < read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(format!("unknown message status '{other}'")),
        }
    }
}

/// A message as it flows through the pipeline and as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    /// Fixed at append time; serialized as RFC3339.
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub status: MessageStatus,
}

impl MessageRecord {
    /// Build a freshly produced record: new id, current time, `sent`, unread.
    pub fn new_outgoing(sender_id: String, receiver_id: String, content: String) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            content,
            timestamp: Utc::now(),
            read: false,
            status: MessageStatus::Sent,
        }
    }
}

/// Inbound body of `POST /messages`.
///
/// Missing fields deserialize as empty strings so that validation reports
/// them uniformly.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub content: String,
}
