//! Per-connection session handling: the transcript, tool-call interception and the
//! lifecycle that ties a client connection to a vendor connection.

mod connection;
mod interceptor;
mod lifecycle;
mod model;
mod state;
mod transcript;

pub use connection::{CloseInfo, Connection, Frame, VendorSink};
pub use interceptor::{FunctionCall, InterceptorState, PendingCall, ToolCallInterceptor};
pub use lifecycle::{SessionManager, SessionOptions};
pub use model::{DisconnectReason, MessagePair, Sender, Session, ToolCallRecord, ToolOutcome};
pub use state::SessionState;
pub use transcript::Transcript;
