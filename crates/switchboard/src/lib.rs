//! Realtime session orchestration: bridges a client connection to a hosted realtime
//! conversation service, handing tool calls to agents and tools along the way.

pub mod agents;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod events;
pub mod session;

pub use agents::{AgentCatalog, AgentDefinition, AgentRegistry, AgentSpec, ToolRoute};
pub use config::{compose, LayeredConfig, SessionConfig, SessionConfigLayer};
pub use errors::{ClientEventError, RegistryError, SessionError};
pub use session::{
    Connection, DisconnectReason, Frame, Session, SessionManager, SessionOptions,
};
