//! Typed method façades over a [`Session`](crate::session::Session).
//!
//! Each façade shares the session through an `Arc` and adds only what its
//! method family needs: a tool cache, a resource recursion guard, a log
//! sink. Everything goes through `Session::send_request`.

mod completion;
mod lifecycle;
mod logging;
mod prompts;
mod resources;
mod tools;

pub use completion::Completion;
pub use lifecycle::Lifecycle;
pub use logging::{LogSink, Logging};
pub use prompts::Prompts;
pub use resources::{Resources, expand_template};
pub use tools::{ToolCall, ToolResult, Tools};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{McpError, Result};

/// Params object holding an optional pagination cursor.
pub(crate) fn cursor_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|c| {
        let mut params = Map::new();
        params.insert("cursor".to_string(), Value::String(c.to_string()));
        Value::Object(params)
    })
}

/// Decode a method result, naming the method on failure.
pub(crate) fn decode_result<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| McpError::protocol(format!("malformed {} result: {}", method, e)))
}
