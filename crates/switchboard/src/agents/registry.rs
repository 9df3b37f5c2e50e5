use std::collections::{HashMap, HashSet};

use minijinja::{context, Environment};
use serde_json::json;
use switchboard_protocol::Tool;
use tracing::{debug, info, warn};

use super::definition::{AgentDefinition, AgentSpec, CustomerRecord};
use crate::collaborators::TopicSource;
use crate::errors::RegistryError;
use crate::session::Session;

const SWITCH_TOOL_PREFIX: &str = "transfer_to_";

/// Name of the generated tool that hands the conversation to `agent_id`.
pub fn switch_tool_name(agent_id: &str) -> String {
    format!("{}{}", SWITCH_TOOL_PREFIX, agent_id)
}

/// What a tool name resolves to, decided once when the registry is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRoute {
    /// Make the given agent the active one.
    Switch(String),
    /// Run the named tool through the gateway.
    Execute(String),
}

/// Process-wide, validated set of agent specs.
#[derive(Debug, Clone)]
pub struct AgentCatalog {
    specs: Vec<AgentSpec>,
    default_agent: String,
}

impl AgentCatalog {
    pub fn new(specs: Vec<AgentSpec>, default_agent: &str) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.id.as_str()) {
                return Err(RegistryError::DuplicateAgent(spec.id.clone()));
            }
        }
        for spec in &specs {
            if let Some(target) = spec.transfers.iter().find(|t| !seen.contains(t.as_str())) {
                return Err(RegistryError::UnknownTransferTarget {
                    agent: spec.id.clone(),
                    target: target.clone(),
                });
            }
        }
        if !seen.contains(default_agent) {
            return Err(RegistryError::UnknownAgent(default_agent.to_string()));
        }

        Ok(Self {
            specs,
            default_agent: default_agent.to_string(),
        })
    }

    pub fn specs(&self) -> &[AgentSpec] {
        &self.specs
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    pub fn ids(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.id.as_str()).collect()
    }
}

/// Inputs gathered at session start that shape the resolved agents.
pub struct LoadContext<'a> {
    pub customer: Option<&'a CustomerRecord>,
    pub topics: &'a dyn TopicSource,
    /// Every tool schema the gateway can execute.
    pub tools: &'a [Tool],
}

/// The agents of one session plus the tool routing table.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
    routes: HashMap<String, ToolRoute>,
    default_agent: String,
}

impl AgentRegistry {
    /// Resolve the catalog for a new session.
    pub async fn load(
        catalog: &AgentCatalog,
        ctx: LoadContext<'_>,
    ) -> Result<Self, RegistryError> {
        let mut descriptions = HashMap::new();
        for spec in catalog.specs() {
            let description = if spec.dynamic_description {
                dynamic_description(spec, ctx.topics).await
            } else {
                spec.description.clone()
            };
            descriptions.insert(spec.id.clone(), description);
        }

        let available: HashMap<&str, &Tool> =
            ctx.tools.iter().map(|t| (t.name.as_str(), t)).collect();
        let env = Environment::new();
        let mut agents = HashMap::new();
        let mut routes = HashMap::new();

        for spec in catalog.specs() {
            let description = descriptions.get(&spec.id).cloned().unwrap_or_default();
            let instructions = env
                .render_str(
                    &spec.instructions,
                    context! {
                        customer => ctx.customer,
                        agent => context! { id => &spec.id, description => &description },
                    },
                )
                .map_err(|source| RegistryError::Template {
                    agent: spec.id.clone(),
                    source,
                })?;

            let mut tools = Vec::new();
            for name in &spec.tools {
                match available.get(name.as_str()) {
                    Some(tool) => {
                        tools.push((*tool).clone());
                        routes.insert(name.clone(), ToolRoute::Execute(name.clone()));
                    }
                    None => warn!(
                        agent = %spec.id,
                        tool = %name,
                        "tool not offered by the gateway, skipping"
                    ),
                }
            }

            for target in &spec.transfers {
                let name = switch_tool_name(target);
                let target_description = descriptions.get(target).cloned().unwrap_or_default();
                tools.push(Tool::new(
                    name.clone(),
                    format!(
                        "Transfer the conversation to the {} agent. {}",
                        target, target_description
                    )
                    .trim_end()
                    .to_string(),
                    json!({"type": "object", "properties": {}, "additionalProperties": false}),
                ));
                routes.insert(name, ToolRoute::Switch(target.clone()));
            }

            debug!(agent = %spec.id, tools = tools.len(), "resolved agent");
            agents.insert(
                spec.id.clone(),
                AgentDefinition {
                    id: spec.id.clone(),
                    description,
                    instructions,
                    tools,
                    session: spec.session.clone(),
                },
            );
        }

        Ok(Self {
            agents,
            routes,
            default_agent: catalog.default_agent().to_string(),
        })
    }

    pub fn get(&self, agent_id: &str) -> Result<&AgentDefinition, RegistryError> {
        self.agents
            .get(agent_id)
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))
    }

    pub fn route(&self, tool_name: &str) -> Option<&ToolRoute> {
        self.routes.get(tool_name)
    }

    /// Route `tool_name` only if the session's active agent exposes it.
    pub fn route_for(&self, session: &Session, tool_name: &str) -> Option<&ToolRoute> {
        let active = self.active_definition(session).ok()?;
        if !active.has_tool(tool_name) {
            return None;
        }
        self.route(tool_name)
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Point the session at `agent_id`, returning the previously active agent.
    pub fn set_active(
        &self,
        session: &mut Session,
        agent_id: &str,
    ) -> Result<String, RegistryError> {
        self.get(agent_id)?;
        session.agents_used.insert(agent_id.to_string());
        Ok(std::mem::replace(&mut session.active_agent, agent_id.to_string()))
    }

    pub fn get_active<'a>(&self, session: &'a Session) -> &'a str {
        &session.active_agent
    }

    pub fn active_definition(&self, session: &Session) -> Result<&AgentDefinition, RegistryError> {
        self.get(&session.active_agent)
    }
}

async fn dynamic_description(spec: &AgentSpec, topics: &dyn TopicSource) -> String {
    match topics.topics().await {
        Ok(topics) if !topics.is_empty() => {
            info!(agent = %spec.id, count = topics.len(), "loaded topics for agent description");
            format!("{} Topics: {}", spec.description, topics.join(", "))
                .trim_start()
                .to_string()
        }
        Ok(_) => spec.description.clone(),
        Err(e) => {
            warn!(agent = %spec.id, error = %e, "topic lookup failed, using static description");
            spec.description.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticTopics;
    use async_trait::async_trait;

    struct BrokenTopics;

    #[async_trait]
    impl TopicSource for BrokenTopics {
        async fn topics(&self) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("index unavailable")
        }
    }

    fn spec(id: &str, tools: &[&str], transfers: &[&str]) -> AgentSpec {
        AgentSpec {
            id: id.to_string(),
            description: format!("{} description", id),
            instructions: format!("You are {}.", id),
            tools: tools.iter().map(|s| s.to_string()).collect(),
            transfers: transfers.iter().map(|s| s.to_string()).collect(),
            dynamic_description: false,
            session: Default::default(),
        }
    }

    fn catalog() -> AgentCatalog {
        let mut knowledge = spec("knowledge_agent", &["search_documents"], &["root"]);
        knowledge.dynamic_description = true;
        AgentCatalog::new(
            vec![
                spec("root", &[], &["database_agent", "knowledge_agent"]),
                spec("database_agent", &["lookup_order", "missing_tool"], &["root"]),
                knowledge,
            ],
            "root",
        )
        .unwrap()
    }

    fn gateway_tools() -> Vec<Tool> {
        vec![
            Tool::new("lookup_order", "Look up an order", json!({"type": "object"})),
            Tool::new("search_documents", "Search documents", json!({"type": "object"})),
        ]
    }

    async fn load(topics: &dyn TopicSource, customer: Option<&CustomerRecord>) -> AgentRegistry {
        let tools = gateway_tools();
        AgentRegistry::load(
            &catalog(),
            LoadContext {
                customer,
                topics,
                tools: &tools,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_routes_are_resolved_at_load() {
        let registry = load(&StaticTopics(vec![]), None).await;

        assert_eq!(
            registry.route("transfer_to_database_agent"),
            Some(&ToolRoute::Switch("database_agent".into()))
        );
        assert_eq!(
            registry.route("lookup_order"),
            Some(&ToolRoute::Execute("lookup_order".into()))
        );
        assert_eq!(registry.route("missing_tool"), None);
        assert_eq!(registry.route("transfer_to_nowhere"), None);

        let database = registry.get("database_agent").unwrap();
        assert!(database.has_tool("lookup_order"));
        assert!(database.has_tool("transfer_to_root"));
        assert!(!database.has_tool("missing_tool"));
    }

    #[tokio::test]
    async fn test_routes_are_scoped_to_active_agent() {
        let registry = load(&StaticTopics(vec![]), None).await;
        let mut session = Session::new(None, "root");

        assert_eq!(registry.route_for(&session, "lookup_order"), None);
        assert_eq!(registry.route_for(&session, "transfer_to_root"), None);
        assert_eq!(
            registry.route_for(&session, "transfer_to_database_agent"),
            Some(&ToolRoute::Switch("database_agent".into()))
        );

        registry.set_active(&mut session, "database_agent").unwrap();
        assert_eq!(
            registry.route_for(&session, "lookup_order"),
            Some(&ToolRoute::Execute("lookup_order".into()))
        );
        assert_eq!(
            registry.route_for(&session, "transfer_to_knowledge_agent"),
            None
        );

        session.active_agent = "nobody".into();
        assert_eq!(registry.route_for(&session, "lookup_order"), None);
    }

    #[tokio::test]
    async fn test_dynamic_description_uses_topics() {
        let topics = StaticTopics(vec!["returns".into(), "warranty".into()]);
        let registry = load(&topics, None).await;

        let knowledge = registry.get("knowledge_agent").unwrap();
        assert_eq!(
            knowledge.description,
            "knowledge_agent description Topics: returns, warranty"
        );

        let root = registry.get("root").unwrap();
        let transfer = root
            .tools
            .iter()
            .find(|t| t.name == "transfer_to_knowledge_agent")
            .unwrap();
        assert!(transfer.description.contains("returns, warranty"));
    }

    #[tokio::test]
    async fn test_dynamic_description_falls_back() {
        let registry = load(&BrokenTopics, None).await;
        assert_eq!(
            registry.get("knowledge_agent").unwrap().description,
            "knowledge_agent description"
        );
    }

    #[tokio::test]
    async fn test_instructions_render_customer() {
        let mut specs = catalog().specs().to_vec();
        specs[0].instructions = "Greet {{ customer.name }} ({{ customer.tier }}).".into();
        let catalog = AgentCatalog::new(specs, "root").unwrap();
        let customer: CustomerRecord = serde_json::from_value(json!({
            "id": "c-1", "name": "Ada", "tier": "gold"
        }))
        .unwrap();

        let registry = AgentRegistry::load(
            &catalog,
            LoadContext {
                customer: Some(&customer),
                topics: &StaticTopics(vec![]),
                tools: &[],
            },
        )
        .await
        .unwrap();
        assert_eq!(registry.get("root").unwrap().instructions, "Greet Ada (gold).");
    }

    #[tokio::test]
    async fn test_set_active_tracks_agents_used() {
        let registry = load(&StaticTopics(vec![]), None).await;
        let mut session = Session::new(None, "root");

        let previous = registry.set_active(&mut session, "database_agent").unwrap();
        assert_eq!(previous, "root");
        assert_eq!(registry.get_active(&session), "database_agent");
        assert!(session.agents_used.contains("database_agent"));

        assert!(matches!(
            registry.set_active(&mut session, "nobody"),
            Err(RegistryError::UnknownAgent(_))
        ));
        assert_eq!(registry.get_active(&session), "database_agent");
    }

    #[test]
    fn test_catalog_validation() {
        assert!(matches!(
            AgentCatalog::new(vec![spec("root", &[], &[]), spec("root", &[], &[])], "root"),
            Err(RegistryError::DuplicateAgent(_))
        ));
        assert!(matches!(
            AgentCatalog::new(vec![spec("root", &[], &["ghost"])], "root"),
            Err(RegistryError::UnknownTransferTarget { .. })
        ));
        assert!(matches!(
            AgentCatalog::new(vec![spec("root", &[], &[])], "other"),
            Err(RegistryError::UnknownAgent(_))
        ));
    }
}
