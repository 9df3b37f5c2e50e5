pub mod client;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod transport;

pub use client::{GatewayClient, ToolClient};
pub use error::{ErrorKind, ToolFailure};
pub use gateway::{GatewayOptions, ToolExecutor, ToolGateway};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, TransportError};
