use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_protocol::{Content, Tool, ToolHandler};
use tracing::{debug, info};

use crate::client::{Error as ClientError, GatewayClient, ToolClient};
use crate::error::{ErrorKind, ToolFailure};
use crate::retry::RetryPolicy;
use crate::transport::HttpTransport;

/// Executes named tools on behalf of a conversation.
///
/// Implementations never fail past this boundary: every problem comes back as a
/// [`ToolFailure`] that the caller can hand to the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, ToolFailure>;

    /// Schemas of every tool this executor can run.
    fn tools(&self) -> Vec<Tool>;
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// JSON-RPC endpoint of the remote gateway, if any.
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            url: None,
            headers: HashMap::new(),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Routes tool calls to in-process handlers first and to the remote gateway otherwise.
pub struct ToolGateway {
    local: HashMap<String, Arc<dyn ToolHandler>>,
    remote: Option<Arc<dyn ToolClient>>,
    remote_tools: RwLock<Vec<Tool>>,
}

impl ToolGateway {
    pub fn new(remote: Option<Arc<dyn ToolClient>>) -> Self {
        Self {
            local: HashMap::new(),
            remote,
            remote_tools: RwLock::new(Vec::new()),
        }
    }

    pub fn from_options(options: &GatewayOptions) -> Self {
        let remote = options.url.as_ref().map(|url| {
            let transport = HttpTransport::new(url.clone()).with_headers(options.headers.clone());
            Arc::new(GatewayClient::http(
                transport,
                options.request_timeout,
                options.retry,
            )) as Arc<dyn ToolClient>
        });
        Self::new(remote)
    }

    pub fn with_handler(mut self, handler: impl ToolHandler) -> Self {
        self.local
            .insert(handler.name().to_string(), Arc::new(handler));
        self
    }

    /// Fetch and cache the remote tool list via `tools/list`.
    pub async fn discover(&self) -> Result<usize, ClientError> {
        let Some(remote) = &self.remote else {
            return Ok(0);
        };
        let listed = remote.list_tools().await?;
        let count = listed.tools.len();
        if let Ok(mut cached) = self.remote_tools.write() {
            *cached = listed.tools;
        }
        info!(count, "discovered gateway tools");
        Ok(count)
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value, ToolFailure> {
        if let Some(handler) = self.local.get(name) {
            debug!(tool = name, "dispatching to local handler");
            return handler.call(arguments).await.map_err(ToolFailure::from);
        }

        let Some(remote) = &self.remote else {
            return Err(ToolFailure::not_found(name));
        };

        debug!(tool = name, "dispatching to remote gateway");
        let result = remote.call_tool(name, arguments).await?;
        if result.is_error {
            let message = result
                .content
                .iter()
                .filter_map(Content::as_text)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ToolFailure::new(ErrorKind::Upstream, message));
        }
        Ok(Content::collapse(&result.content))
    }
}

#[async_trait]
impl ToolExecutor for ToolGateway {
    async fn execute(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, ToolFailure> {
        match tokio::time::timeout(timeout, self.dispatch(name, arguments)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolFailure::timeout(name)),
        }
    }

    fn tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.local.values().map(|h| h.tool()).collect();
        if let Ok(remote) = self.remote_tools.read() {
            tools.extend(
                remote
                    .iter()
                    .filter(|tool| !self.local.contains_key(&tool.name))
                    .cloned(),
            );
        }
        tools
    }
}
