use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One utterance in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePair {
    pub sender: Sender,
    pub content: String,
    #[serde(default)]
    pub interrupted: bool,
    /// Still receiving deltas.
    #[serde(skip)]
    pub streaming: bool,
    pub timestamp: DateTime<Utc>,
}

impl MessagePair {
    pub fn new(sender: Sender) -> Self {
        Self {
            sender,
            content: String::new(),
            interrupted: false,
            streaming: true,
            timestamp: Utc::now(),
        }
    }

    pub fn complete(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            streaming: false,
            ..Self::new(sender)
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectReason {
    ClientClosed {
        code: Option<u16>,
        reason: String,
    },
    ClientLost,
    VendorClosed {
        code: Option<u16>,
        reason: String,
    },
    VendorLost,
    Error {
        message: String,
    },
    Cancelled,
}

impl DisconnectReason {
    /// Only a normal close initiated by the client counts as graceful.
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            DisconnectReason::ClientClosed {
                code: None | Some(1000) | Some(1001),
                ..
            }
        )
    }
}

/// Everything recorded about one client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub customer_id: Option<String>,
    pub active_agent: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub messages: Vec<MessagePair>,
    pub disconnect_reason: Option<DisconnectReason>,
    pub graceful_disconnect: bool,
    /// The user spoke over the assistant at least once.
    pub interrupted: bool,
    pub agents_used: BTreeSet<String>,
    pub tools_invoked: BTreeSet<String>,
}

impl Session {
    pub fn new(customer_id: Option<String>, initial_agent: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            customer_id,
            active_agent: initial_agent.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            messages: Vec::new(),
            disconnect_reason: None,
            graceful_disconnect: false,
            interrupted: false,
            agents_used: BTreeSet::from([initial_agent.to_string()]),
            tools_invoked: BTreeSet::new(),
        }
    }

    /// Stamp the end of the session. Only the first reason is kept.
    ///
    /// Entries that never received any text are dropped.
    pub fn finish(&mut self, reason: DisconnectReason) {
        if self.disconnect_reason.is_some() {
            return;
        }
        self.graceful_disconnect = reason.is_graceful();
        self.disconnect_reason = Some(reason);
        self.ended_at = Some(Utc::now());
        self.messages.retain(|m| !m.content.is_empty());
        for message in &mut self.messages {
            message.streaming = false;
        }
    }

    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Succeeded,
    Switched { agent: String },
    Failed { kind: String, message: String },
}

/// Audit entry for one intercepted function call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub started_at: DateTime<Utc>,
    pub outcome: ToolOutcome,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graceful_only_for_normal_client_close() {
        let normal = DisconnectReason::ClientClosed {
            code: Some(1000),
            reason: String::new(),
        };
        let going_away = DisconnectReason::ClientClosed {
            code: Some(1001),
            reason: String::new(),
        };
        let abnormal = DisconnectReason::ClientClosed {
            code: Some(1011),
            reason: "server error".into(),
        };
        assert!(normal.is_graceful());
        assert!(going_away.is_graceful());
        assert!(!abnormal.is_graceful());
        assert!(!DisconnectReason::ClientLost.is_graceful());
        assert!(!DisconnectReason::VendorClosed {
            code: Some(1000),
            reason: String::new()
        }
        .is_graceful());
        assert!(!DisconnectReason::Cancelled.is_graceful());
    }

    #[test]
    fn test_finish_keeps_first_reason() {
        let mut session = Session::new(Some("c-1".into()), "root");
        session.messages.push(MessagePair::new(Sender::User));
        session.messages[0].content.push_str("hi");

        session.finish(DisconnectReason::VendorLost);
        session.finish(DisconnectReason::ClientClosed {
            code: Some(1000),
            reason: String::new(),
        });

        assert_eq!(session.disconnect_reason, Some(DisconnectReason::VendorLost));
        assert!(!session.graceful_disconnect);
        assert!(session.ended_at.is_some());
        assert!(!session.messages[0].streaming);
    }

    #[test]
    fn test_finish_drops_empty_pairs() {
        let mut session = Session::new(None, "root");
        session.messages.push(MessagePair::new(Sender::User));
        session.messages.push(MessagePair::complete(Sender::Assistant, "hello"));
        session.messages.push(MessagePair::new(Sender::User));

        session.finish(DisconnectReason::ClientLost);
        assert_eq!(session.messages.len(), 1);
        assert!(session.has_messages());

        let mut silent = Session::new(None, "root");
        silent.messages.push(MessagePair::new(Sender::User));
        silent.finish(DisconnectReason::ClientLost);
        assert!(!silent.has_messages());
    }

    #[test]
    fn test_serialized_shape() {
        let mut session = Session::new(None, "root");
        session.finish(DisconnectReason::ClientLost);
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["disconnect_reason"]["kind"], "client_lost");
        assert_eq!(value["agents_used"], serde_json::json!(["root"]));
    }
}
