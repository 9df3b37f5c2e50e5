use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::{Peer, SessionError};
use crate::events::OutboundEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// A transport-neutral websocket message. Binary and ping frames never reach the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(Option<CloseInfo>),
}

/// One side of the bridge, as a pair of channels.
///
/// The server pumps a real socket into and out of these channels, which keeps the engine
/// free of any particular websocket library. When `incoming` yields `None` the peer went
/// away without a close frame.
#[derive(Debug)]
pub struct Connection {
    pub incoming: mpsc::Receiver<Frame>,
    pub outgoing: mpsc::Sender<Frame>,
}

impl Connection {
    /// Create a connection plus the far end of it.
    pub fn pair(buffer: usize) -> (Connection, Connection) {
        let (a_tx, a_rx) = mpsc::channel(buffer);
        let (b_tx, b_rx) = mpsc::channel(buffer);
        (
            Connection {
                incoming: a_rx,
                outgoing: b_tx,
            },
            Connection {
                incoming: b_rx,
                outgoing: a_tx,
            },
        )
    }
}

/// Where the interceptor writes the events it injects into the vendor conversation.
#[async_trait]
pub trait VendorSink: Send {
    async fn send(&mut self, event: OutboundEvent) -> Result<(), SessionError>;
}

#[async_trait]
impl VendorSink for mpsc::Sender<Frame> {
    async fn send(&mut self, event: OutboundEvent) -> Result<(), SessionError> {
        let text = event.to_text()?;
        mpsc::Sender::send(self, Frame::Text(text))
            .await
            .map_err(|_| SessionError::ConnectionLost(Peer::Vendor))
    }
}
