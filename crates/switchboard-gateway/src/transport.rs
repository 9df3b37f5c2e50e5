use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use reqwest::Client as HttpClient;
use switchboard_protocol::protocol::JsonRpcMessage;
use thiserror::Error;
use tower::Service;

/// Errors raised while moving a JSON-RPC message to the gateway and back.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to gateway: {0}")]
    Connect(String),

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    #[error("Unexpected transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether another attempt could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect(_) => true,
            TransportError::HttpError { status, .. } => *status >= 500 || *status == 429,
            TransportError::Serialization(_)
            | TransportError::InvalidResponse(_)
            | TransportError::Other(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            TransportError::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::HttpError {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Request/response transport that POSTs each JSON-RPC message to the gateway endpoint.
#[derive(Clone)]
pub struct HttpTransport {
    endpoint_url: String,
    http_client: HttpClient,
    custom_headers: HashMap<String, String>,
}

impl HttpTransport {
    pub fn new<S: Into<String>>(endpoint_url: S) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            http_client: HttpClient::new(),
            custom_headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.custom_headers = headers;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint_url
    }

    async fn send(self, message: JsonRpcMessage) -> Result<JsonRpcMessage, TransportError> {
        let mut request = self
            .http_client
            .post(&self.endpoint_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&message);

        for (key, value) in &self.custom_headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpError {
                status: status.as_u16(),
                message: status.to_string(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str::<JsonRpcMessage>(&body)
            .map_err(|e| TransportError::InvalidResponse(format!("{}: {}", e, body)))
    }
}

impl Service<JsonRpcMessage> for HttpTransport {
    type Response = JsonRpcMessage;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // reqwest pools connections internally, so we are always ready
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: JsonRpcMessage) -> Self::Future {
        let this = self.clone();
        Box::pin(this.send(message))
    }
}
