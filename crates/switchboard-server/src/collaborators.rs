//! Engine collaborators backed by tools on the gateway.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use switchboard::agents::CustomerRecord;
use switchboard::collaborators::{CustomerDirectory, TopicSource};
use switchboard_gateway::{ErrorKind, ToolExecutor};

/// Topic summary produced by a document-index tool.
pub struct GatewayTopicSource {
    gateway: Arc<dyn ToolExecutor>,
    tool: String,
    timeout: Duration,
}

impl GatewayTopicSource {
    pub fn new(gateway: Arc<dyn ToolExecutor>, tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            gateway,
            tool: tool.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TopicSource for GatewayTopicSource {
    async fn topics(&self) -> Result<Vec<String>> {
        let value = self
            .gateway
            .execute(&self.tool, json!({}), self.timeout)
            .await
            .map_err(|f| anyhow!("{} ({})", f.message, f.kind))?;

        // Accept either a bare list or {"topics": [...]}
        let list = match &value {
            Value::Array(items) => items,
            Value::Object(map) => map
                .get("topics")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("{} returned no topics list", self.tool))?,
            other => return Err(anyhow!("unexpected topics payload: {}", other)),
        };
        Ok(list
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }
}

/// Customer lookup through a gateway tool taking `{"customer_id": ...}`.
pub struct GatewayCustomerDirectory {
    gateway: Arc<dyn ToolExecutor>,
    tool: String,
    timeout: Duration,
}

impl GatewayCustomerDirectory {
    pub fn new(gateway: Arc<dyn ToolExecutor>, tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            gateway,
            tool: tool.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CustomerDirectory for GatewayCustomerDirectory {
    async fn fetch_customer(&self, customer_id: &str) -> Result<Option<CustomerRecord>> {
        let result = self
            .gateway
            .execute(&self.tool, json!({"customer_id": customer_id}), self.timeout)
            .await;

        let mut value = match result {
            Ok(Value::Null) => return Ok(None),
            Ok(value) => value,
            Err(failure) if failure.kind == ErrorKind::NotFound => return Ok(None),
            Err(failure) => return Err(anyhow!("{} ({})", failure.message, failure.kind)),
        };
        if let Value::Object(map) = &mut value {
            map.entry("id").or_insert_with(|| json!(customer_id));
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}
