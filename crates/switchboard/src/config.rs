//! Layered vendor session configuration.
//!
//! Three layers feed every `session.update`: process-wide `defaults`, the `previous`
//! configuration actually sent to the vendor, and a per-merge `override`. Precedence is
//! override, then previous, then defaults, applied key by key and recursively inside
//! nested objects so that unspecified nested fields survive from earlier layers.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use switchboard_protocol::Tool;

/// One partial configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionConfigLayer(Map<String, Value>);

impl SessionConfigLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn with_instructions(self, instructions: &str) -> Self {
        self.with("instructions", Value::String(instructions.to_string()))
    }

    pub fn with_tools(self, tools: &[Tool]) -> Self {
        let schemas = tools.iter().map(Tool::to_function_schema).collect();
        self.with("tools", Value::Array(schemas))
    }

    /// Drop the given keys from this layer.
    pub fn without(mut self, keys: &[&str]) -> Self {
        for key in keys {
            self.0.remove(*key);
        }
        self
    }

    /// Layer `other` on top of this one, `other` winning per key.
    pub fn merged_with(&self, other: &SessionConfigLayer) -> SessionConfigLayer {
        SessionConfigLayer(merge(&[&other.0, &self.0]))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for SessionConfigLayer {
    fn from(map: Map<String, Value>) -> Self {
        SessionConfigLayer(map)
    }
}

/// A complete configuration payload, ready to send as `session.update.session`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionConfig(Map<String, Value>);

impl SessionConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn instructions(&self) -> Option<&str> {
        self.0.get("instructions").and_then(Value::as_str)
    }

    /// Names of the function tools in this configuration.
    pub fn tool_names(&self) -> Vec<&str> {
        self.0
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Merge three layers into one vendor session configuration.
///
/// Deterministic and side-effect free. Keys present in no layer are omitted; an explicit
/// `null` is a value and wins like any other.
pub fn compose(
    defaults: &SessionConfigLayer,
    previous: &SessionConfig,
    override_layer: &SessionConfigLayer,
) -> SessionConfig {
    SessionConfig(merge(&[&override_layer.0, &previous.0, &defaults.0]))
}

// Layers are ordered highest precedence first.
fn merge(layers: &[&Map<String, Value>]) -> Map<String, Value> {
    let keys: BTreeSet<&String> = layers.iter().flat_map(|layer| layer.keys()).collect();
    let mut merged = Map::new();

    for key in keys {
        let mut values = layers.iter().filter_map(|layer| layer.get(key));
        let Some(winner) = values.next() else {
            continue;
        };

        let value = match winner {
            Value::Object(top) => {
                let nested: Vec<&Map<String, Value>> = std::iter::once(top)
                    .chain(values.filter_map(Value::as_object))
                    .collect();
                Value::Object(merge(&nested))
            }
            other => other.clone(),
        };
        merged.insert(key.clone(), value);
    }

    merged
}

/// The defaults and previous layers for one session.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    defaults: Arc<SessionConfigLayer>,
    previous: SessionConfig,
}

impl LayeredConfig {
    pub fn new(defaults: Arc<SessionConfigLayer>) -> Self {
        Self {
            defaults,
            previous: SessionConfig::default(),
        }
    }

    /// Compose with `override_layer` and remember the result as the new `previous`.
    pub fn apply(&mut self, override_layer: &SessionConfigLayer) -> SessionConfig {
        let config = compose(&self.defaults, &self.previous, override_layer);
        self.previous = config.clone();
        config
    }

    pub fn previous(&self) -> &SessionConfig {
        &self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(value: Value) -> SessionConfigLayer {
        match value {
            Value::Object(map) => SessionConfigLayer::from(map),
            _ => panic!("layer must be an object"),
        }
    }

    fn defaults() -> SessionConfigLayer {
        layer(json!({
            "voice": "alloy",
            "modalities": ["audio", "text"],
            "turn_detection": {"type": "server_vad", "threshold": 0.5, "silence_duration_ms": 500},
            "input_audio_transcription": {"model": "whisper-1"}
        }))
    }

    #[test]
    fn test_override_wins_per_key() {
        let previous = compose(
            &defaults(),
            &SessionConfig::default(),
            &layer(json!({"voice": "verse"})),
        );
        let config = compose(
            &defaults(),
            &previous,
            &layer(json!({"instructions": "be brief"})),
        );

        assert_eq!(config.get("voice"), Some(&json!("verse")));
        assert_eq!(config.instructions(), Some("be brief"));
        assert_eq!(config.get("modalities"), Some(&json!(["audio", "text"])));
    }

    #[test]
    fn test_nested_objects_merge_key_wise() {
        let previous = compose(
            &defaults(),
            &SessionConfig::default(),
            &layer(json!({"turn_detection": {"silence_duration_ms": 800}})),
        );
        let config = compose(
            &defaults(),
            &previous,
            &layer(json!({"turn_detection": {"threshold": 0.7}})),
        );

        assert_eq!(
            config.get("turn_detection"),
            Some(&json!({"type": "server_vad", "threshold": 0.7, "silence_duration_ms": 800}))
        );
    }

    #[test]
    fn test_arrays_replace_wholesale() {
        let tool = Tool::new("lookup_order", "Look up", json!({"type": "object"}));
        let previous = compose(
            &defaults(),
            &SessionConfig::default(),
            &SessionConfigLayer::new().with_tools(&[tool]),
        );
        let config = compose(
            &defaults(),
            &previous,
            &SessionConfigLayer::new().with_tools(&[]),
        );
        assert!(config.tool_names().is_empty());
    }

    #[test]
    fn test_absent_keys_are_omitted_and_null_is_kept() {
        let config = compose(
            &SessionConfigLayer::new(),
            &SessionConfig::default(),
            &layer(json!({"turn_detection": null})),
        );
        assert_eq!(config.as_map().len(), 1);
        assert_eq!(config.get("turn_detection"), Some(&Value::Null));
        assert!(config.get("voice").is_none());
    }

    #[test]
    fn test_compose_is_idempotent() {
        let previous = compose(
            &defaults(),
            &SessionConfig::default(),
            &layer(json!({"voice": "verse"})),
        );
        let override_layer = layer(json!({
            "instructions": "x",
            "turn_detection": {"threshold": 0.9}
        }));

        let first = compose(&defaults(), &previous, &override_layer);
        let second = compose(&defaults(), &previous, &override_layer);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_layered_config_tracks_previous() {
        let mut layered = LayeredConfig::new(Arc::new(defaults()));
        layered.apply(&layer(json!({"instructions": "root"})));
        let config = layered.apply(&layer(json!({"voice": "verse"})));

        assert_eq!(config.instructions(), Some("root"));
        assert_eq!(layered.previous(), &config);
    }

    #[test]
    fn test_without_strips_keys() {
        let client = layer(json!({"instructions": "ignore me", "tools": [], "voice": "ash"}))
            .without(&["instructions", "tools"]);
        assert_eq!(client.as_map().len(), 1);
        assert_eq!(client.get("voice"), Some(&json!("ash")));
    }
}
