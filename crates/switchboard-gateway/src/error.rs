use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use switchboard_protocol::protocol::{INVALID_PARAMS, METHOD_NOT_FOUND};
use switchboard_protocol::ToolError;

use crate::client::{Error as ClientError, ServiceError};
use crate::transport::TransportError;

/// Why a tool call could not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unavailable,
    NotFound,
    InvalidArguments,
    Timeout,
    Upstream,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Upstream => "upstream",
        };
        f.write_str(name)
    }
}

/// A tool outcome that failed, carried back into the conversation as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(tool: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("Unknown tool: {}", tool))
    }

    pub fn timeout(tool: &str) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Tool {} did not respond in time", tool),
        )
    }

    /// The payload handed to the model in place of a result.
    pub fn to_output(&self) -> Value {
        json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
            }
        })
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolFailure {}

impl From<ClientError> for ToolFailure {
    fn from(err: ClientError) -> Self {
        let kind = match &err {
            ClientError::RpcError { code, .. } if *code == METHOD_NOT_FOUND => ErrorKind::NotFound,
            ClientError::RpcError { code, .. } if *code == INVALID_PARAMS => {
                ErrorKind::InvalidArguments
            }
            ClientError::RpcError { .. } => ErrorKind::Upstream,
            ClientError::Service(ServiceError::Timeout) => ErrorKind::Timeout,
            ClientError::Service(ServiceError::Transport(TransportError::InvalidResponse(_))) => {
                ErrorKind::Upstream
            }
            ClientError::Service(_) => ErrorKind::Unavailable,
            ClientError::Serialization(_) | ClientError::UnexpectedResponse => ErrorKind::Upstream,
        };
        ToolFailure::new(kind, err.to_string())
    }
}

impl From<ToolError> for ToolFailure {
    fn from(err: ToolError) -> Self {
        let kind = match &err {
            ToolError::InvalidParameters(_) | ToolError::SerializationError(_) => {
                ErrorKind::InvalidArguments
            }
            ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::ExecutionError(_) => ErrorKind::Upstream,
        };
        ToolFailure::new(kind, err.to_string())
    }
}
