//! Interfaces to the services the engine depends on but does not own.

use anyhow::Result;
use async_trait::async_trait;

use crate::agents::CustomerRecord;
use crate::session::Session;

/// Read-only summary of what the document index knows about.
#[async_trait]
pub trait TopicSource: Send + Sync {
    async fn topics(&self) -> Result<Vec<String>>;
}

/// Read-only lookup of customer records.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn fetch_customer(&self, customer_id: &str) -> Result<Option<CustomerRecord>>;
}

/// Best-effort persistence of finished sessions.
#[async_trait]
pub trait ConversationLogger: Send + Sync {
    async fn log(&self, session: &Session) -> Result<()>;
}

/// A fixed topic list.
pub struct StaticTopics(pub Vec<String>);

#[async_trait]
impl TopicSource for StaticTopics {
    async fn topics(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

pub struct NoCustomers;

#[async_trait]
impl CustomerDirectory for NoCustomers {
    async fn fetch_customer(&self, _customer_id: &str) -> Result<Option<CustomerRecord>> {
        Ok(None)
    }
}

pub struct NoopConversationLogger;

#[async_trait]
impl ConversationLogger for NoopConversationLogger {
    async fn log(&self, _session: &Session) -> Result<()> {
        Ok(())
    }
}
