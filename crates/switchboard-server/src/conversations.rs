use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use etcetera::{choose_app_strategy, AppStrategy, AppStrategyArgs};
use serde_json::Value;
use switchboard::collaborators::ConversationLogger;
use switchboard::session::Session;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Writes each finished session to `<directory>/<session id>.jsonl`.
///
/// The first line holds the session metadata, followed by one line per message.
pub struct JsonlConversationLogger {
    directory: PathBuf,
}

impl JsonlConversationLogger {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// `conversations` under the platform data directory.
    pub fn default_directory() -> Result<PathBuf> {
        let strategy = choose_app_strategy(AppStrategyArgs {
            top_level_domain: "dev".to_string(),
            author: "switchboard".to_string(),
            app_name: "switchboard".to_string(),
        })
        .context("no home directory to store conversations in")?;
        Ok(strategy.data_dir().join("conversations"))
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.directory.join(format!("{}.jsonl", session_id))
    }
}

#[async_trait]
impl ConversationLogger for JsonlConversationLogger {
    async fn log(&self, session: &Session) -> Result<()> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .with_context(|| format!("creating {}", self.directory.display()))?;

        let mut metadata = serde_json::to_value(session)?;
        if let Value::Object(map) = &mut metadata {
            map.remove("messages");
        }
        let mut body = serde_json::to_string(&metadata)?;
        body.push('\n');
        for message in &session.messages {
            body.push_str(&serde_json::to_string(message)?);
            body.push('\n');
        }

        // Write to a temporary file first so readers never see a partial log
        let path = self.path_for(&session.id);
        let tmp_path = path.with_extension("jsonl.tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        info!(path = %path.display(), messages = session.messages.len(), "conversation saved");
        Ok(())
    }
}
