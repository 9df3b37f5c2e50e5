use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use switchboard::{SessionConfigLayer, SessionOptions};
use switchboard_gateway::{GatewayOptions, RetryPolicy};

use crate::error::{to_env_var, ConfigError};

#[derive(Debug, Default, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Connection details for the hosted realtime conversation service.
#[derive(Debug, Clone, Deserialize)]
pub struct VendorSettings {
    #[serde(default = "default_vendor_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: String,
}

impl VendorSettings {
    pub fn endpoint(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }
}

#[derive(Debug, Deserialize)]
pub struct GatewaySettings {
    /// JSON-RPC endpoint of the tool gateway. Only local tools are available without it.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl GatewaySettings {
    pub fn options(&self) -> GatewayOptions {
        GatewayOptions {
            url: self.url.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
            },
            ..Default::default()
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_ms: default_request_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_agent")]
    pub default_agent: String,
    #[serde(default = "default_log_timeout_ms")]
    pub log_timeout_ms: u64,
    /// Vendor session keys layered over the built-in defaults.
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl SessionSettings {
    pub fn defaults_layer(&self) -> SessionConfigLayer {
        builtin_session_defaults().merged_with(&SessionConfigLayer::from(self.defaults.clone()))
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_agent: default_agent(),
            log_timeout_ms: default_log_timeout_ms(),
            defaults: Map::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentsSettings {
    /// YAML agent catalog. The built-in catalog is used when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_topics_tool")]
    pub topics_tool: String,
    #[serde(default = "default_customer_tool")]
    pub customer_tool: String,
}

impl Default for AgentsSettings {
    fn default() -> Self {
        Self {
            path: None,
            topics_tool: default_topics_tool(),
            customer_tool: default_customer_tool(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConversationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where finished sessions are written. Defaults to the platform data directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub json: bool,
    /// Also write daily rolling log files here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            json: false,
            directory: None,
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub vendor: VendorSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub agents: AgentsSettings,
    #[serde(default)]
    pub conversations: ConversationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    pub fn new(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_and_validate(path)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            tool_timeout: self.gateway.tool_timeout(),
            log_timeout: Duration::from_millis(self.session.log_timeout_ms),
        }
    }

    fn load_and_validate(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("switchboard").required(false),
        };

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("vendor.url", default_vendor_url())?
            .set_default("vendor.model", default_model())?
            .add_source(file)
            .add_source(
                Environment::with_prefix("SWITCHBOARD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                if let Some(field) = missing_field(&err.to_string()) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

// Pull the field name out of "missing field `api_key`"
fn missing_field(message: &str) -> Option<String> {
    let rest = message.split("missing field `").nth(1)?;
    rest.split('`').next().map(str::to_string)
}

/// Vendor session settings every agent starts from.
pub fn builtin_session_defaults() -> SessionConfigLayer {
    SessionConfigLayer::new()
        .with("modalities", json!(["text", "audio"]))
        .with("voice", json!("alloy"))
        .with("input_audio_format", json!("pcm16"))
        .with("output_audio_format", json!("pcm16"))
        .with("input_audio_transcription", json!({"model": "whisper-1"}))
        .with(
            "turn_detection",
            json!({
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 500
            }),
        )
        .with("tool_choice", json!("auto"))
        .with("temperature", json!(0.8))
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_vendor_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_tool_timeout_ms() -> u64 {
    15_000
}

fn default_max_retries() -> usize {
    3
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    2_000
}

fn default_agent() -> String {
    "root".to_string()
}

fn default_log_timeout_ms() -> u64 {
    5_000
}

fn default_topics_tool() -> String {
    "list_topics".to_string()
}

fn default_customer_tool() -> String {
    "get_customer".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("SWITCHBOARD_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("SWITCHBOARD_VENDOR__API_KEY", "test-key");

        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.vendor.api_key, "test-key");
        assert_eq!(settings.vendor.model, "gpt-4o-realtime-preview");
        assert_eq!(settings.gateway.url, None);
        assert_eq!(settings.gateway.max_retries, 3);
        assert_eq!(settings.session.default_agent, "root");
        assert_eq!(settings.agents.customer_tool, "get_customer");
        assert!(settings.conversations.enabled);
        assert!(!settings.logging.json);

        env::remove_var("SWITCHBOARD_VENDOR__API_KEY");
    }

    #[test]
    #[serial]
    fn test_missing_api_key() {
        clean_env();

        match Settings::new(None) {
            Err(ConfigError::MissingEnvVar { env_var }) => {
                assert_eq!(env_var, "SWITCHBOARD_VENDOR__API_KEY")
            }
            other => panic!("Expected MissingEnvVar, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("SWITCHBOARD_VENDOR__API_KEY", "test-key");
        env::set_var("SWITCHBOARD_SERVER__PORT", "8080");
        env::set_var("SWITCHBOARD_GATEWAY__URL", "http://tools.internal/rpc");
        env::set_var("SWITCHBOARD_GATEWAY__TOOL_TIMEOUT_MS", "2500");
        env::set_var("SWITCHBOARD_SESSION__DEFAULTS__VOICE", "verse");

        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(
            settings.gateway.options().url.as_deref(),
            Some("http://tools.internal/rpc")
        );
        assert_eq!(
            settings.session_options().tool_timeout,
            Duration::from_millis(2500)
        );

        let defaults = settings.session.defaults_layer();
        assert_eq!(defaults.get("voice"), Some(&json!("verse")));
        assert_eq!(defaults.get("input_audio_format"), Some(&json!("pcm16")));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_toml_file_below_environment() {
        clean_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[vendor]
api_key = "from-file"
model = "file-model"

[session.defaults.turn_detection]
silence_duration_ms = 900
"#
        )
        .unwrap();
        env::set_var("SWITCHBOARD_VENDOR__MODEL", "env-model");

        let settings = Settings::new(Some(file.path())).unwrap();
        assert_eq!(settings.vendor.api_key, "from-file");
        assert_eq!(settings.vendor.model, "env-model");
        assert_eq!(
            settings.vendor.endpoint(),
            "wss://api.openai.com/v1/realtime?model=env-model"
        );

        let defaults = settings.session.defaults_layer();
        let turn_detection = defaults.get("turn_detection").unwrap();
        assert_eq!(turn_detection["silence_duration_ms"], 900);
        assert_eq!(turn_detection["type"], "server_vad");

        clean_env();
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_missing_field_parsing() {
        assert_eq!(
            missing_field("missing field `api_key`").as_deref(),
            Some("api_key")
        );
        assert_eq!(missing_field("invalid type: string"), None);
    }
}
