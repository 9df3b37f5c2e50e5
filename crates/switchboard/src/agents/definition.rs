use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use switchboard_protocol::Tool;

use crate::config::SessionConfigLayer;

/// An agent as written in the catalog, before it is resolved for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Instruction template, rendered with the session's customer record.
    pub instructions: String,
    /// Names of gateway tools this agent may call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Agents this one may hand the conversation to.
    #[serde(default)]
    pub transfers: Vec<String>,
    /// Extend the description with topics from the document index at session start.
    #[serde(default)]
    pub dynamic_description: bool,
    /// Extra vendor session settings applied whenever this agent is active.
    #[serde(default)]
    pub session: SessionConfigLayer,
}

/// A fully resolved agent, immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub id: String,
    pub description: String,
    pub instructions: String,
    pub tools: Vec<Tool>,
    pub session: SessionConfigLayer,
}

impl AgentDefinition {
    /// The override layer that makes this agent the one the vendor presents.
    pub fn config_layer(&self) -> SessionConfigLayer {
        self.session
            .clone()
            .with_instructions(&self.instructions)
            .with_tools(&self.tools)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name == name)
    }
}

/// Read-only customer data exposed to instruction templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}
