//! Resource listing and reading.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use super::{cursor_params, decode_result};
use crate::error::{McpError, Result};
use crate::protocol::{
    ListResourceTemplatesResult, ListResourcesResult, Page, ReadResourceResult, Resource,
    ResourceContents, ResourceTemplate, error_codes, methods,
};
use crate::session::Session;

/// Marks a URI as being read until dropped.
struct VisitGuard<'a> {
    visiting: &'a Mutex<HashSet<String>>,
    uri: String,
}

impl<'a> VisitGuard<'a> {
    fn enter(visiting: &'a Mutex<HashSet<String>>, uri: &str) -> Result<Self> {
        if !visiting.lock().insert(uri.to_string()) {
            return Err(McpError::CircularDependency(uri.to_string()));
        }
        Ok(Self {
            visiting,
            uri: uri.to_string(),
        })
    }
}

impl Drop for VisitGuard<'_> {
    fn drop(&mut self) {
        self.visiting.lock().remove(&self.uri);
    }
}

/// `resources/*` façade.
///
/// While a URI is being read through this façade, any other read of the
/// same URI through it, from whichever thread, fails with
/// [`McpError::CircularDependency`] instead of recursing forever.
pub struct Resources {
    session: Arc<Session>,
    visiting: Mutex<HashSet<String>>,
}

impl Resources {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            visiting: Mutex::new(HashSet::new()),
        }
    }

    /// One page of concrete resources.
    pub fn list(&self, cursor: Option<&str>) -> Result<Page<Resource>> {
        let value = self
            .session
            .send_request(methods::RESOURCES_LIST, cursor_params(cursor))?;
        let result: ListResourcesResult = decode_result(methods::RESOURCES_LIST, value)?;
        Ok(Page {
            items: result.resources,
            next_cursor: result.next_cursor,
        })
    }

    /// One page of resource templates.
    pub fn list_templates(&self, cursor: Option<&str>) -> Result<Page<ResourceTemplate>> {
        let value = self
            .session
            .send_request(methods::RESOURCES_TEMPLATES_LIST, cursor_params(cursor))?;
        let result: ListResourceTemplatesResult =
            decode_result(methods::RESOURCES_TEMPLATES_LIST, value)?;
        Ok(Page {
            items: result.resource_templates,
            next_cursor: result.next_cursor,
        })
    }

    /// Read a resource.
    pub fn read(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        self.read_with(uri, Ok)
    }

    /// Read a resource and process its contents while the URI is still
    /// marked as in progress, so nested reads of the same URI are caught.
    pub fn read_with<T, F>(&self, uri: &str, process: F) -> Result<T>
    where
        F: FnOnce(Vec<ResourceContents>) -> Result<T>,
    {
        let _guard = VisitGuard::enter(&self.visiting, uri)?;
        tracing::debug!(server = %self.session.name(), uri = %uri, "reading resource");
        let value = self
            .session
            .send_request(methods::RESOURCES_READ, Some(json!({ "uri": uri })))
            .map_err(|e| match e {
                McpError::ServerError { code, .. } if code == error_codes::RESOURCE_NOT_FOUND => {
                    McpError::ResourceNotFound(uri.to_string())
                }
                other => other,
            })?;
        let result: ReadResourceResult = decode_result(methods::RESOURCES_READ, value)?;
        process(result.contents)
    }
}

/// Substitute `{name}` placeholders in a URI template.
///
/// Only plain `{name}` is understood. RFC 6570 operators such as `{+path}`
/// or `{?query}` and placeholders without a value are left as they are.
pub fn expand_template(template: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
