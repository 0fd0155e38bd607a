//! Tool discovery and invocation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::{cursor_params, decode_result};
use crate::error::{ErrorKind, McpError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, Content, ListToolsResult, Page, RequestId, Tool, methods,
};
use crate::session::Session;

/// Outcome of one tool invocation.
///
/// Failures of any layer end up here rather than in an `Err`: `failure`
/// says which layer, `error` says what happened, and `metadata["failure"]`
/// carries the same tag for serialized consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    /// Content blocks returned by the tool.
    pub content: Vec<Content>,
    /// Structured output, if the tool produced any.
    pub structured_content: Option<Value>,
    /// Whether the call failed.
    pub is_error: bool,
    /// Failure description.
    pub error: Option<String>,
    /// Layer the failure came from.
    pub failure: Option<ErrorKind>,
    /// Extra facts about the call.
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    fn from_call(tool: &str, result: CallToolResult) -> Self {
        let mut metadata = Map::new();
        metadata.insert("tool".to_string(), json!(tool));
        let is_error = result.is_error();
        let (error, failure) = if is_error {
            metadata.insert("failure".to_string(), json!(ErrorKind::Domain));
            let message = result
                .text()
                .unwrap_or_else(|| format!("tool '{}' reported an error", tool));
            (Some(message), Some(ErrorKind::Domain))
        } else {
            (None, None)
        };
        Self {
            content: result.content,
            structured_content: result.structured_content,
            is_error,
            error,
            failure,
            metadata,
        }
    }

    fn failed(tool: &str, error: &McpError) -> Self {
        let kind = error.kind();
        let mut metadata = Map::new();
        metadata.insert("tool".to_string(), json!(tool));
        metadata.insert("failure".to_string(), json!(kind));
        if let McpError::ServerError { code, .. } = error {
            metadata.insert("code".to_string(), json!(code));
        }
        Self {
            content: Vec::new(),
            structured_content: None,
            is_error: true,
            error: Some(error.to_string()),
            failure: Some(kind),
            metadata,
        }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        !self.is_error
    }

    /// Concatenated text blocks.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self.content.iter().filter_map(Content::as_text).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// One entry of a batched tool call.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    pub arguments: Option<Value>,
    /// Id to use for the JSON-RPC request instead of a generated one.
    pub request_id: Option<RequestId>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<RequestId>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// `tools/*` façade with a by-name cache of listed tools.
pub struct Tools {
    session: Arc<Session>,
    cache: RwLock<HashMap<String, Tool>>,
}

impl Tools {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// One page of tools. `limit` is passed to the server as a hint only;
    /// the page holds whatever the server returned.
    pub fn list(&self, cursor: Option<&str>, limit: Option<usize>) -> Result<Page<Tool>> {
        let mut params = cursor_params(cursor);
        if let Some(limit) = limit {
            if let Some(obj) = params.get_or_insert_with(|| json!({})).as_object_mut() {
                obj.insert("limit".to_string(), json!(limit));
            }
        }
        let value = self.session.send_request(methods::TOOLS_LIST, params)?;
        let result: ListToolsResult = decode_result(methods::TOOLS_LIST, value)?;

        {
            let mut cache = self.cache.write();
            for tool in &result.tools {
                cache.insert(tool.name.clone(), tool.clone());
            }
        }
        tracing::debug!(
            server = %self.session.name(),
            count = result.tools.len(),
            more = result.next_cursor.is_some(),
            "listed tools"
        );
        Ok(Page {
            items: result.tools,
            next_cursor: result.next_cursor,
        })
    }

    /// Every tool, following cursors to the end.
    pub fn list_all(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list(cursor.as_deref(), None)?;
            tools.extend(page.items);
            match page.next_cursor {
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        return Err(McpError::protocol(format!(
                            "server repeated pagination cursor '{}'",
                            next
                        )));
                    }
                    cursor = Some(next);
                }
                None => return Ok(tools),
            }
        }
    }

    /// Empty the cache and list everything again.
    pub fn refresh(&self) -> Result<Vec<Tool>> {
        self.clear_cache();
        self.list_all()
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    /// A cached tool definition.
    pub fn cached(&self, name: &str) -> Option<Tool> {
        self.cache.read().get(name).cloned()
    }

    /// Names of cached tools, sorted.
    pub fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate arguments against the cached schema when enabled.
    fn check_arguments(&self, name: &str, arguments: Option<&Value>) -> Result<()> {
        if !self.session.options().validate_tool_arguments {
            return Ok(());
        }
        let Some(tool) = self.cached(name) else {
            return Ok(());
        };
        let validator = jsonschema::validator_for(&tool.input_schema).map_err(|e| {
            McpError::InvalidArguments {
                tool: name.to_string(),
                reason: format!("unusable input schema: {}", e),
            }
        })?;
        let empty = json!({});
        let instance = arguments.unwrap_or(&empty);
        let errors: Vec<String> = validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(McpError::InvalidArguments {
                tool: name.to_string(),
                reason: errors.join("; "),
            })
        }
    }

    fn params(name: &str, arguments: Option<Value>) -> Result<Value> {
        Ok(serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?)
    }

    fn interpret(name: &str, outcome: Result<Value>) -> ToolResult {
        let result = outcome
            .and_then(|value| decode_result::<CallToolResult>(methods::TOOLS_CALL, value));
        match result {
            Ok(result) => {
                let result = ToolResult::from_call(name, result);
                if result.is_error {
                    tracing::debug!(tool = %name, "tool reported an error");
                }
                result
            }
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                ToolResult::failed(name, &e)
            }
        }
    }

    /// Call a tool. Never fails: every failure becomes a failed [`ToolResult`].
    ///
    /// Tools missing from the cache are still called.
    pub fn call(
        &self,
        name: &str,
        arguments: Option<Value>,
        request_id: Option<RequestId>,
    ) -> ToolResult {
        tracing::debug!(
            tool = %name,
            cached = self.cache.read().contains_key(name),
            "calling tool"
        );
        if let Err(e) = self.check_arguments(name, arguments.as_ref()) {
            return ToolResult::failed(name, &e);
        }
        let outcome = Self::params(name, arguments).and_then(|params| match request_id {
            Some(id) => self
                .session
                .send_request_with_id(id, methods::TOOLS_CALL, Some(params)),
            None => self.session.send_request(methods::TOOLS_CALL, Some(params)),
        });
        Self::interpret(name, outcome)
    }

    /// Call several tools. Results line up with `calls`.
    ///
    /// Calls without a caller-chosen id share one batch when the transport
    /// supports batching.
    pub fn call_batch(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut batched: Vec<(usize, String)> = Vec::new();
        let mut requests: Vec<(String, Option<Value>)> = Vec::new();

        for (index, call) in calls.into_iter().enumerate() {
            if call.request_id.is_some() {
                results[index] = Some(self.call(&call.name, call.arguments, call.request_id));
                continue;
            }
            if let Err(e) = self.check_arguments(&call.name, call.arguments.as_ref()) {
                results[index] = Some(ToolResult::failed(&call.name, &e));
                continue;
            }
            match Self::params(&call.name, call.arguments) {
                Ok(params) => {
                    requests.push((methods::TOOLS_CALL.to_string(), Some(params)));
                    batched.push((index, call.name));
                }
                Err(e) => results[index] = Some(ToolResult::failed(&call.name, &e)),
            }
        }

        if !requests.is_empty() {
            match self.session.send_batch(requests) {
                Ok(outcomes) => {
                    for ((index, name), outcome) in batched.into_iter().zip(outcomes) {
                        results[index] = Some(Self::interpret(&name, outcome));
                    }
                }
                Err(e) => {
                    for (index, name) in batched {
                        results[index] = Some(ToolResult::failed(&name, &e));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    ToolResult::failed("", &McpError::protocol("batch response missing"))
                })
            })
            .collect()
    }
}
