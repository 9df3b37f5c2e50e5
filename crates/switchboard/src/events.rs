//! Typed views over the realtime event protocol.
//!
//! The bridge forwards almost every event unchanged, so these types only model the
//! events the engine has to react to. Anything else parses as `Other`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::SessionConfig;
use crate::errors::ClientEventError;

const FUNCTION_CALL_DONE: &str = "response.function_call_arguments.done";

/// Server-originated events the engine inspects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum VendorEvent {
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputTranscriptFailed {
        #[serde(default)]
        error: Value,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AssistantTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AssistantTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.text.delta")]
    AssistantTextDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.text.done")]
    AssistantTextDone {
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Value,
    },

    /// A function call event missing its call id or name. It cannot be answered and
    /// must not reach the client.
    #[serde(skip)]
    MalformedFunctionCall { error: String },

    #[serde(other)]
    Other,
}

impl VendorEvent {
    /// Parse a raw text frame. Malformed events are treated as opaque, except for
    /// function calls.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) if event_type(text).as_deref() == Some(FUNCTION_CALL_DONE) => {
                VendorEvent::MalformedFunctionCall {
                    error: e.to_string(),
                }
            }
            Err(_) => VendorEvent::Other,
        }
    }

    /// Whether the transcript accumulator cares about this event.
    pub fn affects_transcript(&self) -> bool {
        !matches!(
            self,
            VendorEvent::FunctionCallArgumentsDone { .. }
                | VendorEvent::MalformedFunctionCall { .. }
                | VendorEvent::Error { .. }
                | VendorEvent::Other
        )
    }
}

fn event_type(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

/// Client-originated events the engine inspects before forwarding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(default)]
        session: Map<String, Value>,
    },

    #[serde(rename = "conversation.item.create")]
    ItemCreate { item: ConversationItem },

    #[serde(other)]
    Other,
}

/// A client frame that passed validation.
///
/// `value` is what gets forwarded, and `event` is read from that same value, so the
/// engine inspects exactly what the vendor will see. Duplicate keys have already
/// collapsed to their last occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFrame {
    pub event: ClientEvent,
    pub value: Value,
}

impl ClientFrame {
    /// Parse a raw text frame. Events the engine inspects must match their typed
    /// form; anything unparseable is refused rather than forwarded.
    pub fn parse(text: &str) -> Result<Self, ClientEventError> {
        let value: Value = serde_json::from_str(text)?;
        let event = match value.get("type").and_then(Value::as_str) {
            Some("session.update") | Some("conversation.item.create") => {
                serde_json::from_value(value.clone())?
            }
            Some(_) => ClientEvent::Other,
            None => return Err(ClientEventError::MissingType),
        };
        Ok(Self { event, value })
    }

    pub fn to_text(&self) -> String {
        self.value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: Vec<ItemContent>,
    },
    FunctionCallOutput {
        #[serde(default)]
        call_id: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

impl ConversationItem {
    /// Text typed by the user, if this item is a user message carrying any.
    pub fn user_text(&self) -> Option<String> {
        match self {
            ConversationItem::Message { role, content } if role == "user" => {
                let text = content
                    .iter()
                    .filter_map(|c| c.text.as_deref().or(c.transcript.as_deref()))
                    .collect::<Vec<_>>()
                    .join(" ");
                (!text.is_empty()).then_some(text)
            }
            _ => None,
        }
    }
}

/// Events the engine itself emits, towards the vendor or the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "conversation.item.create")]
    ItemCreate { item: OutputItem },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "error")]
    Error { error: ErrorBody },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: String,
    pub message: String,
}

impl OutboundEvent {
    pub fn function_call_output(call_id: &str, output: &Value) -> Self {
        OutboundEvent::ItemCreate {
            item: OutputItem::FunctionCallOutput {
                call_id: call_id.to_string(),
                output: output.to_string(),
            },
        }
    }

    pub fn client_error(code: &str, message: &str) -> Self {
        OutboundEvent::Error {
            error: ErrorBody {
                kind: "invalid_request_error".to_string(),
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
