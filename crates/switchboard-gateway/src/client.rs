use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use switchboard_protocol::protocol::{
    CallToolParams, CallToolResult, JsonRpcError, JsonRpcMessage, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult,
};
use thiserror::Error;
use tokio_retry::RetryIf;
use tower::{timeout::Timeout, BoxError, Service, ServiceExt};
use tracing::{debug, warn};

use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, TransportError};

/// Failure of a single request once the service stack has been driven.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Request timed out")]
    Timeout,

    #[error("Other error: {0}")]
    Other(String),
}

impl ServiceError {
    fn from_box(err: BoxError) -> Self {
        if err.is::<tower::timeout::error::Elapsed>() {
            return ServiceError::Timeout;
        }
        match err.downcast::<TransportError>() {
            Ok(transport) => ServiceError::Transport(*transport),
            Err(other) => ServiceError::Other(other.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transport(err) => err.is_retryable(),
            ServiceError::Timeout => true,
            ServiceError::Other(_) => false,
        }
    }
}

/// Error type for gateway client operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("RPC error: code={code}, message={message}")]
    RpcError { code: i32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected response from gateway")]
    UnexpectedResponse,
}

/// Operations offered by the remote tool gateway.
#[async_trait::async_trait]
pub trait ToolClient: Send + Sync + 'static {
    /// List the tools the gateway can execute.
    async fn list_tools(&self) -> Result<ListToolsResult, Error>;

    /// Call a specific tool with arguments.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error>;
}

/// JSON-RPC client for the gateway, sending each request through the provided service.
pub struct GatewayClient<S> {
    service: S,
    next_id: AtomicU64,
    retry: RetryPolicy,
}

impl GatewayClient<Timeout<HttpTransport>> {
    /// Client over HTTP where each attempt is bounded by `request_timeout`.
    pub fn http(transport: HttpTransport, request_timeout: Duration, retry: RetryPolicy) -> Self {
        Self::new(Timeout::new(transport, request_timeout), retry)
    }
}

impl<S> GatewayClient<S>
where
    S: Service<JsonRpcMessage, Response = JsonRpcMessage> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    pub fn new(service: S, retry: RetryPolicy) -> Self {
        Self {
            service,
            next_id: AtomicU64::new(1),
            retry,
        }
    }

    async fn attempt(&self, request: JsonRpcMessage) -> Result<JsonRpcMessage, ServiceError> {
        let mut service = self.service.clone();
        let ready = service
            .ready()
            .await
            .map_err(|e| ServiceError::from_box(e.into()))?;
        ready
            .call(request)
            .await
            .map_err(|e| ServiceError::from_box(e.into()))
    }

    /// Send a JSON-RPC request, retrying transport failures, and reject error responses.
    async fn send_request<R>(&self, method: &str, params: Value) -> Result<R, Error>
    where
        R: for<'de> Deserialize<'de>,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcMessage::Request(JsonRpcRequest::new(id, method, params));

        let response_msg = RetryIf::spawn(
            self.retry.strategy(),
            || self.attempt(request.clone()),
            |err: &ServiceError| {
                let retry = err.is_retryable();
                if retry {
                    warn!(method, error = %err, "gateway request failed, retrying");
                }
                retry
            },
        )
        .await?;

        match response_msg {
            JsonRpcMessage::Response(JsonRpcResponse {
                id: response_id,
                result,
                error,
                ..
            }) => {
                if response_id != Some(id) {
                    return Err(Error::UnexpectedResponse);
                }
                if let Some(err) = error {
                    Err(Error::RpcError {
                        code: err.code,
                        message: err.message,
                    })
                } else if let Some(r) = result {
                    Ok(serde_json::from_value(r)?)
                } else {
                    Err(Error::UnexpectedResponse)
                }
            }
            JsonRpcMessage::Error(JsonRpcError {
                id: response_id,
                error,
                ..
            }) => {
                if response_id.is_some() && response_id != Some(id) {
                    return Err(Error::UnexpectedResponse);
                }
                Err(Error::RpcError {
                    code: error.code,
                    message: error.message,
                })
            }
            other => {
                debug!("unexpected gateway message: {:?}", other);
                Err(Error::UnexpectedResponse)
            }
        }
    }
}

#[async_trait::async_trait]
impl<S> ToolClient for GatewayClient<S>
where
    S: Service<JsonRpcMessage, Response = JsonRpcMessage> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    async fn list_tools(&self) -> Result<ListToolsResult, Error> {
        self.send_request("tools/list", serde_json::json!({})).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.send_request("tools/call", params).await
    }
}
