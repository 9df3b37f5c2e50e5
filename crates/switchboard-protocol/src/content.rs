use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single block of tool output as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Content {
    Text { text: String },
    Json { json: Value },
}

impl Content {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn json(value: Value) -> Self {
        Content::Json { json: value }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            Content::Json { .. } => None,
        }
    }

    /// Collapse a list of content blocks into one JSON value.
    ///
    /// A single JSON block is returned as-is, a single text block is parsed as JSON when it
    /// holds JSON and kept as a string otherwise. Multiple blocks become an array.
    pub fn collapse(contents: &[Content]) -> Value {
        match contents {
            [] => Value::Null,
            [single] => single.to_value(),
            many => Value::Array(many.iter().map(Content::to_value).collect()),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Content::Json { json } => json.clone(),
            Content::Text { text } => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collapse_single_text_json() {
        let contents = vec![Content::text(r#"{"status":"shipped"}"#)];
        assert_eq!(Content::collapse(&contents), json!({"status": "shipped"}));
    }

    #[test]
    fn test_collapse_plain_text() {
        let contents = vec![Content::text("no results")];
        assert_eq!(Content::collapse(&contents), json!("no results"));
    }

    #[test]
    fn test_collapse_many() {
        let contents = vec![Content::text("a"), Content::json(json!({"b": 1}))];
        assert_eq!(Content::collapse(&contents), json!(["a", {"b": 1}]));
        assert_eq!(Content::collapse(&[]), Value::Null);
    }

    #[test]
    fn test_wire_format() {
        let value = serde_json::to_value(Content::text("hi")).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "hi"}));
    }
}
