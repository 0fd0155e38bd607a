//! Encoding and decoding of JSON-RPC envelopes.
//!
//! Decoding goes through [`serde_json::Value`] and checks key presence by
//! hand, so malformed envelopes come back as [`McpError::Protocol`] with a
//! readable reason instead of a raw serde error.

use serde_json::{Map, Value};

use crate::error::{McpError, Result};
use crate::protocol::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message,
    RequestId, ResponsePayload,
};

/// Serialize one envelope to a JSON string.
pub fn encode(message: &Message) -> Result<String> {
    let json = match message {
        Message::Request(request) => serde_json::to_string(request)?,
        Message::Response(response) => serde_json::to_string(response)?,
        Message::Notification(notification) => serde_json::to_string(notification)?,
    };
    Ok(json)
}

/// Serialize several requests as one JSON array.
pub fn encode_batch(requests: &[JsonRpcRequest]) -> Result<String> {
    Ok(serde_json::to_string(requests)?)
}

/// Parse one envelope from a JSON string.
pub fn decode(text: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| McpError::protocol(format!("invalid JSON: {}", e)))?;
    decode_value(value)
}

/// Parse a single envelope or a batch array.
pub fn decode_batch(text: &str) -> Result<Vec<Message>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| McpError::protocol(format!("invalid JSON: {}", e)))?;
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(McpError::protocol("empty batch"));
            }
            items.into_iter().map(decode_value).collect()
        }
        other => Ok(vec![decode_value(other)?]),
    }
}

/// Classify an already-parsed JSON value as an envelope.
pub fn decode_value(value: Value) -> Result<Message> {
    let Value::Object(mut obj) = value else {
        return Err(McpError::protocol("envelope must be a JSON object"));
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(McpError::protocol(format!(
                "unsupported jsonrpc version: {}",
                other
            )));
        }
        None => return Err(McpError::protocol("missing jsonrpc version")),
    }

    if let Some(method) = obj.remove("method") {
        let Value::String(method) = method else {
            return Err(McpError::protocol("method must be a string"));
        };
        let params = obj.remove("params");
        return match obj.remove("id") {
            Some(id) => Ok(Message::Request(JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: parse_id(id)?,
                method,
                params,
            })),
            None => Ok(Message::Notification(JsonRpcNotification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method,
                params,
            })),
        };
    }

    decode_response(obj).map(Message::Response)
}

fn decode_response(mut obj: Map<String, Value>) -> Result<JsonRpcResponse> {
    let payload = match (obj.remove("result"), obj.remove("error")) {
        (Some(_), Some(_)) => {
            return Err(McpError::protocol(
                "response carries both result and error",
            ));
        }
        (Some(result), None) => ResponsePayload::Result(result),
        (None, Some(error)) => {
            let error: JsonRpcError = serde_json::from_value(error)
                .map_err(|e| McpError::protocol(format!("malformed error object: {}", e)))?;
            ResponsePayload::Error(error)
        }
        (None, None) => {
            return Err(McpError::protocol(
                "envelope has neither method, result nor error",
            ));
        }
    };

    let id = match obj.remove("id") {
        Some(Value::Null) | None => {
            // Servers answer unparseable input with a null id; nothing to correlate.
            let detail = match &payload {
                ResponsePayload::Error(e) => format!("{} ({})", e.message, e.code),
                ResponsePayload::Result(_) => "result".to_string(),
            };
            return Err(McpError::protocol(format!(
                "response without id: {}",
                detail
            )));
        }
        Some(id) => parse_id(id)?,
    };

    Ok(JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        payload,
    })
}

fn parse_id(id: Value) -> Result<RequestId> {
    match id {
        Value::String(s) => Ok(RequestId::String(s)),
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| McpError::protocol(format!("invalid id: {}", n))),
        other => Err(McpError::protocol(format!("invalid id type: {}", other))),
    }
}
