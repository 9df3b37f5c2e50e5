use std::sync::Arc;

use anyhow::Result;
use switchboard::agents::LoadContext;
use switchboard::collaborators::{
    ConversationLogger, CustomerDirectory, NoopConversationLogger, TopicSource,
};
use switchboard::{AgentCatalog, AgentRegistry, RegistryError, Session, SessionConfigLayer};
use switchboard::{SessionManager, SessionOptions};
use switchboard_gateway::{ToolExecutor, ToolGateway};
use tracing::{info, warn};

use crate::catalog;
use crate::collaborators::{GatewayCustomerDirectory, GatewayTopicSource};
use crate::configuration::{Settings, VendorSettings};
use crate::conversations::JsonlConversationLogger;
use crate::tools::CurrentTimeTool;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<AgentCatalog>,
    pub executor: Arc<dyn ToolExecutor>,
    pub topics: Arc<dyn TopicSource>,
    pub customers: Arc<dyn CustomerDirectory>,
    pub logger: Arc<dyn ConversationLogger>,
    pub defaults: Arc<SessionConfigLayer>,
    pub options: SessionOptions,
    pub vendor: Arc<VendorSettings>,
}

/// Everything needed to run one session, resolved before the socket is upgraded.
pub struct PreparedSession {
    pub manager: SessionManager,
    pub session: Session,
}

impl AppState {
    pub async fn new(settings: &Settings) -> Result<Self> {
        let gateway =
            ToolGateway::from_options(&settings.gateway.options()).with_handler(CurrentTimeTool);
        match gateway.discover().await {
            Ok(count) => info!(count, "tool gateway ready"),
            Err(e) => warn!(error = %e, "tool gateway unavailable, continuing with local tools"),
        }
        let executor: Arc<dyn ToolExecutor> = Arc::new(gateway);

        let tool_timeout = settings.gateway.tool_timeout();
        let topics = Arc::new(GatewayTopicSource::new(
            executor.clone(),
            settings.agents.topics_tool.clone(),
            tool_timeout,
        ));
        let customers = Arc::new(GatewayCustomerDirectory::new(
            executor.clone(),
            settings.agents.customer_tool.clone(),
            tool_timeout,
        ));

        let logger: Arc<dyn ConversationLogger> = if settings.conversations.enabled {
            let directory = match &settings.conversations.directory {
                Some(directory) => directory.clone(),
                None => JsonlConversationLogger::default_directory()?,
            };
            info!(directory = %directory.display(), "saving conversations");
            Arc::new(JsonlConversationLogger::new(directory))
        } else {
            Arc::new(NoopConversationLogger)
        };

        let catalog = catalog::load(
            settings.agents.path.as_deref(),
            &settings.session.default_agent,
        )?;
        info!(agents = ?catalog.ids(), default = catalog.default_agent(), "agent catalog loaded");

        Ok(Self {
            catalog: Arc::new(catalog),
            executor,
            topics,
            customers,
            logger,
            defaults: Arc::new(settings.session.defaults_layer()),
            options: settings.session_options(),
            vendor: Arc::new(settings.vendor.clone()),
        })
    }

    /// Resolve the agents for a new session, personalised for `customer_id`.
    pub async fn prepare_session(
        &self,
        customer_id: Option<String>,
    ) -> Result<PreparedSession, RegistryError> {
        let customer = match &customer_id {
            Some(id) => match self.customers.fetch_customer(id).await {
                Ok(customer) => customer,
                Err(e) => {
                    warn!(customer_id = %id, error = %e, "customer lookup failed");
                    None
                }
            },
            None => None,
        };

        let tools = self.executor.tools();
        let registry = AgentRegistry::load(
            &self.catalog,
            LoadContext {
                customer: customer.as_ref(),
                topics: self.topics.as_ref(),
                tools: &tools,
            },
        )
        .await?;

        let session = Session::new(customer_id, registry.default_agent());
        let manager = SessionManager::new(
            Arc::new(registry),
            self.executor.clone(),
            self.logger.clone(),
            self.defaults.clone(),
            self.options.clone(),
        );
        Ok(PreparedSession { manager, session })
    }
}

#[cfg(test)]
pub(crate) fn test_state(vendor_url: &str, logger: Arc<dyn ConversationLogger>) -> AppState {
    use switchboard::collaborators::{NoCustomers, StaticTopics};

    let executor: Arc<dyn ToolExecutor> =
        Arc::new(ToolGateway::new(None).with_handler(CurrentTimeTool));
    AppState {
        catalog: Arc::new(catalog::load(None, "root").unwrap()),
        executor,
        topics: Arc::new(StaticTopics(vec!["returns".into(), "warranty".into()])),
        customers: Arc::new(NoCustomers),
        logger,
        defaults: Arc::new(crate::configuration::builtin_session_defaults()),
        options: SessionOptions::default(),
        vendor: Arc::new(VendorSettings {
            url: vendor_url.to_string(),
            model: "test-model".to_string(),
            api_key: "sk-test".to_string(),
        }),
    }
}
