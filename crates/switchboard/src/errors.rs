use std::fmt;

use thiserror::Error;

/// Which side of the bridge a transport problem came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    Client,
    Vendor,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Client => f.write_str("client"),
            Peer::Vendor => f.write_str("vendor"),
        }
    }
}

/// Errors that end a session. Tool failures are never represented here.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("The {0} connection was lost")]
    ConnectionLost(Peer),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent {0} is defined more than once")]
    DuplicateAgent(String),

    #[error("Agent {agent} transfers to unknown agent {target}")]
    UnknownTransferTarget { agent: String, target: String },

    #[error("Failed to render instructions for agent {agent}: {source}")]
    Template {
        agent: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Why a client frame was refused instead of being forwarded to the vendor.
#[derive(Error, Debug)]
pub enum ClientEventError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Event has no type")]
    MissingType,
}
