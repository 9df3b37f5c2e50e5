//! Tools that run inside the server process.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{json, Value};
use switchboard_protocol::handler::{Result, ToolError};
use switchboard_protocol::ToolHandler;

pub struct CurrentTimeTool;

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    fn name(&self) -> &'static str {
        "get_current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time, optionally shifted to a UTC offset."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_minutes": {
                    "type": "integer",
                    "description": "Offset from UTC in minutes, e.g. -300 for US Eastern time"
                }
            }
        })
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let offset_minutes = match params.get("utc_offset_minutes") {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                ToolError::InvalidParameters("utc_offset_minutes must be an integer".into())
            })?,
        };
        let offset = i32::try_from(offset_minutes * 60)
            .ok()
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ToolError::InvalidParameters(format!("offset {} is out of range", offset_minutes))
            })?;

        let now = Utc::now().with_timezone(&offset);
        Ok(json!({
            "datetime": now.to_rfc3339(),
            "weekday": now.format("%A").to_string(),
            "unix": now.timestamp(),
        }))
    }
}
