mod definition;
mod registry;

pub use definition::{AgentDefinition, AgentSpec, CustomerRecord};
pub use registry::{switch_tool_name, AgentCatalog, AgentRegistry, LoadContext, ToolRoute};
