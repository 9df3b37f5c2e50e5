use tracing::debug;

use super::model::{MessagePair, Sender, Session};
use crate::events::VendorEvent;

/// Tracks which transcript entries are still receiving deltas.
///
/// Entries live in `Session::messages`; this only remembers their indexes, so the
/// session stays the single owner of the transcript.
#[derive(Debug, Default)]
pub struct Transcript {
    open_user: Option<usize>,
    open_assistant: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, session: &mut Session, event: &VendorEvent) {
        match event {
            VendorEvent::SpeechStarted => {
                if let Some(idx) = self.open_assistant.take() {
                    let pair = &mut session.messages[idx];
                    pair.interrupted = true;
                    pair.streaming = false;
                    session.interrupted = true;
                    debug!(session_id = %session.id, "user interrupted the assistant");
                }
                match self.open_user {
                    Some(idx) if session.messages[idx].content.is_empty() => {}
                    Some(idx) => {
                        session.messages[idx].streaming = false;
                        self.open_user = Some(open(session, Sender::User));
                    }
                    None => self.open_user = Some(open(session, Sender::User)),
                }
            }
            VendorEvent::InputTranscriptDelta { delta } => {
                let idx = *self.open_user.get_or_insert_with(|| open(session, Sender::User));
                session.messages[idx].content.push_str(delta);
            }
            VendorEvent::InputTranscriptCompleted { transcript } => {
                close(session, self.open_user.take(), Sender::User, transcript);
            }
            VendorEvent::InputTranscriptFailed { error } => {
                if let Some(idx) = self.open_user.take() {
                    session.messages.remove(idx);
                    if let Some(assistant) = self.open_assistant.as_mut() {
                        if *assistant > idx {
                            *assistant -= 1;
                        }
                    }
                }
                debug!(session_id = %session.id, error = %error, "input transcription failed");
            }
            VendorEvent::AssistantTranscriptDelta { delta }
            | VendorEvent::AssistantTextDelta { delta } => {
                let idx = *self
                    .open_assistant
                    .get_or_insert_with(|| open(session, Sender::Assistant));
                session.messages[idx].content.push_str(delta);
            }
            VendorEvent::AssistantTranscriptDone { transcript } => {
                close(session, self.open_assistant.take(), Sender::Assistant, transcript);
            }
            VendorEvent::AssistantTextDone { text } => {
                close(session, self.open_assistant.take(), Sender::Assistant, text);
            }
            _ => {}
        }
    }

    /// Record a message the client typed instead of spoke.
    pub fn record_user_text(&mut self, session: &mut Session, text: &str) {
        session.messages.push(MessagePair::complete(Sender::User, text));
    }
}

fn open(session: &mut Session, sender: Sender) -> usize {
    session.messages.push(MessagePair::new(sender));
    session.messages.len() - 1
}

/// Finalize an open entry, preferring the full text over accumulated deltas.
fn close(session: &mut Session, open_idx: Option<usize>, sender: Sender, full_text: &str) {
    match open_idx {
        Some(idx) => {
            let pair = &mut session.messages[idx];
            if !full_text.is_empty() {
                pair.content = full_text.to_string();
            }
            pair.streaming = false;
        }
        None if !full_text.is_empty() => {
            session.messages.push(MessagePair::complete(sender, full_text));
        }
        None => {}
    }
}
