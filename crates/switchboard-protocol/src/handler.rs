use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::tool::Tool;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Execution failed: {0}")]
    ExecutionError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Tool not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// A tool that runs in-process instead of going through the remote gateway.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// The name of the tool
    fn name(&self) -> &'static str;

    /// A description of what the tool does
    fn description(&self) -> &'static str;

    /// JSON schema describing the tool's parameters
    fn schema(&self) -> Value;

    /// Execute the tool with the given parameters
    async fn call(&self, params: Value) -> Result<Value>;

    fn tool(&self) -> Tool {
        Tool::new(self.name(), self.description(), self.schema())
    }
}
