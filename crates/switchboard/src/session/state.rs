use super::model::Session;
use super::transcript::Transcript;
use crate::config::LayeredConfig;

/// Mutable per-connection state shared by the two forwarding loops.
///
/// Always accessed under one lock, so tool handling and transcript updates for a
/// session never interleave.
#[derive(Debug)]
pub struct SessionState {
    pub session: Session,
    pub transcript: Transcript,
    pub config: LayeredConfig,
}

impl SessionState {
    pub fn new(session: Session, config: LayeredConfig) -> Self {
        Self {
            session,
            transcript: Transcript::new(),
            config,
        }
    }
}
