use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound message from the transport layer — the sole entry point
/// into the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    /// Opaque stable identifier of the remote party.
    pub user_id: String,
    /// Message text content.
    pub text: String,
    /// Transport hint: first message of a fresh transport session.
    #[serde(default)]
    pub first_of_session: bool,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Build a message arriving now.
    pub fn new(user_id: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            first_of_session: false,
            timestamp: Utc::now(),
        }
    }

    /// Build a message with an explicit arrival time (used by tests that
    /// drive a simulated clock).
    pub fn at(user_id: &str, text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            first_of_session: false,
            timestamp,
        }
    }
}

/// An outbound message to deliver through the transport layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub user_id: String,
    pub text: String,
    /// Message to quote/reply to, when the transport supports it.
    /// Delivery degrades to a plain send when quoting fails.
    #[serde(default)]
    pub quoted_message_id: Option<String>,
}

impl OutboundMessage {
    pub fn plain(user_id: &str, text: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            text: text.to_string(),
            quoted_message_id: None,
        }
    }
}
