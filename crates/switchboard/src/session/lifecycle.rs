use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use switchboard_gateway::ToolExecutor;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};

use super::connection::{CloseInfo, Connection, Frame, VendorSink};
use super::interceptor::{FunctionCall, ToolCallInterceptor};
use super::model::{DisconnectReason, Session};
use super::state::SessionState;
use crate::agents::AgentRegistry;
use crate::collaborators::ConversationLogger;
use crate::config::{LayeredConfig, SessionConfigLayer};
use crate::errors::{Peer, SessionError};
use crate::events::{ClientEvent, ClientFrame, ConversationItem, OutboundEvent, VendorEvent};

/// Keys of a client `session.update` that the server owns.
const SERVER_OWNED_KEYS: &[&str] = &["instructions", "tools"];

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound for a single tool execution.
    pub tool_timeout: Duration,
    /// Upper bound for handing a finished session to the conversation logger.
    pub log_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(10),
            log_timeout: Duration::from_secs(5),
        }
    }
}

/// Bridges one client connection to one vendor connection for the lifetime of a session.
pub struct SessionManager {
    registry: Arc<AgentRegistry>,
    executor: Arc<dyn ToolExecutor>,
    logger: Arc<dyn ConversationLogger>,
    defaults: Arc<SessionConfigLayer>,
    options: SessionOptions,
}

impl SessionManager {
    pub fn new(
        registry: Arc<AgentRegistry>,
        executor: Arc<dyn ToolExecutor>,
        logger: Arc<dyn ConversationLogger>,
        defaults: Arc<SessionConfigLayer>,
        options: SessionOptions,
    ) -> Self {
        Self {
            registry,
            executor,
            logger,
            defaults,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Run the session until either side goes away, then log it.
    ///
    /// The returned session is already finalized. If this future is dropped before it
    /// completes, the session is still finalized and logged from a spawned task.
    pub async fn run(&self, session: Session, client: Connection, vendor: Connection) -> Session {
        let span = info_span!("session", session_id = %session.id);
        self.run_inner(session, client, vendor).instrument(span).await
    }

    async fn run_inner(&self, session: Session, client: Connection, vendor: Connection) -> Session {
        info!(
            customer_id = session.customer_id.as_deref().unwrap_or("-"),
            agent = %session.active_agent,
            "session started"
        );
        let mut guard = SessionGuard {
            shared: Mutex::new(SessionState::new(
                session,
                LayeredConfig::new(self.defaults.clone()),
            )),
            logger: self.logger.clone(),
            log_timeout: self.options.log_timeout,
            closed: false,
        };

        let Connection {
            incoming: mut client_rx,
            outgoing: client_tx,
        } = client;
        let Connection {
            incoming: mut vendor_rx,
            outgoing: vendor_tx,
        } = vendor;

        let connected = self.connect(guard.shared.get_mut(), &vendor_tx).await;
        let reason = match connected {
            Err(e) => reason_for(e),
            Ok(()) => {
                let interceptor = ToolCallInterceptor::new(
                    self.registry.clone(),
                    self.executor.clone(),
                    self.options.tool_timeout,
                );
                let client = client_loop(&guard.shared, &mut client_rx, &client_tx, &vendor_tx);
                let vendor = vendor_loop(
                    &guard.shared,
                    interceptor,
                    &mut vendor_rx,
                    &client_tx,
                    vendor_tx.clone(),
                );
                let outcome = tokio::select! {
                    r = AssertUnwindSafe(client).catch_unwind() => r,
                    r = AssertUnwindSafe(vendor).catch_unwind() => r,
                };
                outcome.unwrap_or_else(|panic| DisconnectReason::Error {
                    message: panic_message(panic),
                })
            }
        };

        // Tell whichever side is still there that the session is over.
        if !matches!(reason, DisconnectReason::ClientClosed { .. } | DisconnectReason::ClientLost) {
            let _ = client_tx.try_send(Frame::Close(Some(close_info(&reason))));
        }
        if !matches!(reason, DisconnectReason::VendorClosed { .. } | DisconnectReason::VendorLost) {
            let _ = vendor_tx.try_send(Frame::Close(Some(CloseInfo {
                code: 1000,
                reason: String::new(),
            })));
        }
        drop((client_rx, client_tx, vendor_rx, vendor_tx));

        guard.close(reason).await
    }

    /// Present the initial agent to the vendor.
    async fn connect(
        &self,
        state: &mut SessionState,
        vendor_tx: &mpsc::Sender<Frame>,
    ) -> Result<(), SessionError> {
        let agent = self.registry.active_definition(&state.session)?;
        let config = state.config.apply(&agent.config_layer());
        let mut sink = vendor_tx.clone();
        VendorSink::send(&mut sink, OutboundEvent::SessionUpdate { session: config }).await
    }
}

/// Owns the session state and guarantees it is logged exactly once.
struct SessionGuard {
    shared: Mutex<SessionState>,
    logger: Arc<dyn ConversationLogger>,
    log_timeout: Duration,
    closed: bool,
}

impl SessionGuard {
    fn take_session(&mut self) -> Session {
        let state = self.shared.get_mut();
        let placeholder = Session::new(None, &state.session.active_agent);
        std::mem::replace(&mut state.session, placeholder)
    }

    async fn close(mut self, reason: DisconnectReason) -> Session {
        let mut session = self.take_session();
        self.closed = true;
        session.finish(reason);
        info!(
            reason = ?session.disconnect_reason,
            graceful = session.graceful_disconnect,
            messages = session.messages.len(),
            "session ended"
        );
        log_session(self.logger.as_ref(), &session, self.log_timeout).await;
        session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let mut session = self.take_session();
        session.finish(DisconnectReason::Cancelled);
        if !session.has_messages() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let logger = self.logger.clone();
                let log_timeout = self.log_timeout;
                handle.spawn(async move {
                    log_session(logger.as_ref(), &session, log_timeout).await;
                });
            }
            Err(_) => warn!(session_id = %session.id, "no runtime left to log cancelled session"),
        }
    }
}

async fn log_session(logger: &dyn ConversationLogger, session: &Session, log_timeout: Duration) {
    if !session.has_messages() {
        debug!(session_id = %session.id, "nothing to log");
        return;
    }
    match tokio::time::timeout(log_timeout, logger.log(session)).await {
        Ok(Ok(())) => debug!(session_id = %session.id, "conversation logged"),
        Ok(Err(e)) => warn!(session_id = %session.id, error = %e, "failed to log conversation"),
        Err(_) => warn!(session_id = %session.id, "conversation logging timed out"),
    }
}

/// Client to vendor: forward everything except tool results, which only the server may send.
///
/// Frames are validated before forwarding and the session lock is only held briefly,
/// so the client side keeps draining while a tool call is in flight.
async fn client_loop(
    shared: &Mutex<SessionState>,
    incoming: &mut mpsc::Receiver<Frame>,
    to_client: &mpsc::Sender<Frame>,
    to_vendor: &mpsc::Sender<Frame>,
) -> DisconnectReason {
    loop {
        let text = match incoming.recv().await {
            Some(Frame::Text(text)) => text,
            Some(Frame::Close(info)) => {
                let (code, reason) =
                    info.map_or((None, String::new()), |i| (Some(i.code), i.reason));
                return DisconnectReason::ClientClosed { code, reason };
            }
            None => return DisconnectReason::ClientLost,
        };

        let ClientFrame { event, value } = match ClientFrame::parse(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "rejected malformed client event");
                let error = OutboundEvent::client_error("invalid_event", &e.to_string());
                if let Err(e) = send_event(to_client, &error, Peer::Client).await {
                    return reason_for(e);
                }
                continue;
            }
        };

        match event {
            ClientEvent::ItemCreate {
                item: ConversationItem::FunctionCallOutput { call_id },
            } => {
                warn!(call_id = %call_id, "rejected tool result sent by client");
                let error = OutboundEvent::client_error(
                    "tool_result_not_allowed",
                    "Tool results are produced by the server",
                );
                if let Err(e) = send_event(to_client, &error, Peer::Client).await {
                    return reason_for(e);
                }
                continue;
            }
            ClientEvent::SessionUpdate { session } => {
                let layer = SessionConfigLayer::from(session).without(SERVER_OWNED_KEYS);
                let config = shared.lock().await.config.apply(&layer);
                debug!("merged client session.update");
                let update = OutboundEvent::SessionUpdate { session: config };
                if let Err(e) = send_event(to_vendor, &update, Peer::Vendor).await {
                    return reason_for(e);
                }
                continue;
            }
            ClientEvent::ItemCreate { item } => {
                if let Some(user_text) = item.user_text() {
                    let mut guard = shared.lock().await;
                    let state = &mut *guard;
                    state.transcript.record_user_text(&mut state.session, &user_text);
                }
            }
            ClientEvent::Other => {}
        }

        if to_vendor.send(Frame::Text(value.to_string())).await.is_err() {
            return DisconnectReason::VendorLost;
        }
    }
}

/// Vendor to client: forward everything except function calls, which are handled here.
async fn vendor_loop(
    shared: &Mutex<SessionState>,
    mut interceptor: ToolCallInterceptor,
    incoming: &mut mpsc::Receiver<Frame>,
    to_client: &mpsc::Sender<Frame>,
    mut to_vendor: mpsc::Sender<Frame>,
) -> DisconnectReason {
    loop {
        let text = match incoming.recv().await {
            Some(Frame::Text(text)) => text,
            Some(Frame::Close(info)) => {
                let (code, reason) =
                    info.map_or((None, String::new()), |i| (Some(i.code), i.reason));
                return DisconnectReason::VendorClosed { code, reason };
            }
            None => return DisconnectReason::VendorLost,
        };

        match VendorEvent::parse(&text) {
            VendorEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                let call = FunctionCall {
                    call_id,
                    name,
                    arguments,
                };
                let mut pending = {
                    let mut state = shared.lock().await;
                    interceptor.begin(call, &mut state)
                };
                // The lock is released while the tool runs.
                interceptor.execute(&mut pending).await;
                let mut state = shared.lock().await;
                if let Err(e) = interceptor.finish(pending, &mut state, &mut to_vendor).await {
                    return reason_for(e);
                }
                continue;
            }
            VendorEvent::MalformedFunctionCall { error } => {
                warn!(error = %error, "dropped malformed function call event");
                continue;
            }
            VendorEvent::Error { error } => {
                warn!(error = %error, "vendor reported an error");
            }
            event if event.affects_transcript() => {
                let mut guard = shared.lock().await;
                let state = &mut *guard;
                state.transcript.apply(&mut state.session, &event);
            }
            _ => {}
        }

        if to_client.send(Frame::Text(text)).await.is_err() {
            return DisconnectReason::ClientLost;
        }
    }
}

async fn send_event(
    tx: &mpsc::Sender<Frame>,
    event: &OutboundEvent,
    peer: Peer,
) -> Result<(), SessionError> {
    let text = event.to_text()?;
    tx.send(Frame::Text(text))
        .await
        .map_err(|_| SessionError::ConnectionLost(peer))
}

fn reason_for(error: SessionError) -> DisconnectReason {
    match error {
        SessionError::ConnectionLost(Peer::Client) => DisconnectReason::ClientLost,
        SessionError::ConnectionLost(Peer::Vendor) => DisconnectReason::VendorLost,
        other => DisconnectReason::Error {
            message: other.to_string(),
        },
    }
}

fn close_info(reason: &DisconnectReason) -> CloseInfo {
    match reason {
        DisconnectReason::Error { .. } => CloseInfo {
            code: 1011,
            reason: "internal error".to_string(),
        },
        _ => CloseInfo {
            code: 1000,
            reason: "upstream closed".to_string(),
        },
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}
