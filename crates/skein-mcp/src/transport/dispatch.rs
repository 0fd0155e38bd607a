//! Routing of inbound messages read by a transport's background thread.

use std::io::{BufRead, Write};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::json;

use super::{NotificationHandler, PendingRequests};
use crate::codec;
use crate::error::{McpError, Result};
use crate::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, Message, error_codes, methods,
};

/// Sends each inbound message where it belongs: responses to the pending
/// table, notifications to the installed handler, and server requests to a
/// minimal responder whose replies the caller writes back.
pub struct Dispatcher {
    pending: Arc<PendingRequests>,
    handler: RwLock<Option<NotificationHandler>>,
}

impl Dispatcher {
    /// Dispatcher completing requests in `pending`.
    pub fn new(pending: Arc<PendingRequests>) -> Self {
        Self {
            pending,
            handler: RwLock::new(None),
        }
    }

    /// The correlation table this dispatcher feeds.
    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// Replace the notification callback.
    pub fn set_handler(&self, handler: NotificationHandler) {
        *self.handler.write() = Some(handler);
    }

    /// Decode and route one frame (a single envelope or a batch).
    ///
    /// Malformed frames are logged and skipped. Returns replies for any
    /// server-initiated requests.
    pub fn handle_text(&self, text: &str) -> Vec<JsonRpcResponse> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        tracing::trace!(json = %text, "received MCP message");
        match codec::decode_batch(text) {
            Ok(messages) => messages
                .into_iter()
                .filter_map(|message| self.handle(message))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed message");
                Vec::new()
            }
        }
    }

    /// Route one decoded message.
    pub fn handle(&self, message: Message) -> Option<JsonRpcResponse> {
        match message {
            Message::Response(response) => {
                if let Err(e) = self.pending.complete(response) {
                    tracing::warn!(error = %e, "unmatched response");
                }
                None
            }
            Message::Notification(notification) => {
                let handler = self.handler.read().clone();
                match handler {
                    Some(handler) => handler(notification),
                    None => {
                        tracing::debug!(method = %notification.method, "notification without handler")
                    }
                }
                None
            }
            Message::Request(request) => Some(answer_server_request(&request)),
        }
    }
}

/// Write one newline-terminated frame to a shared writer.
///
/// An emptied slot means the transport was closed.
pub(crate) fn write_line<W: Write>(slot: &Mutex<Option<W>>, json: &str) -> Result<()> {
    let mut guard = slot.lock();
    let writer = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
    writer.write_all(json.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    tracing::trace!(json = %json, "sent MCP message");
    Ok(())
}

/// Run a newline-delimited reader loop until EOF or a read error.
///
/// Replies to server requests are handed to `reply` already encoded.
pub(crate) fn pump_lines<R: BufRead>(
    reader: R,
    dispatcher: &Dispatcher,
    mut reply: impl FnMut(&str) -> Result<()>,
) -> std::io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        for response in dispatcher.handle_text(&line) {
            let sent = serde_json::to_string(&response)
                .map_err(McpError::from)
                .and_then(|json| reply(&json));
            if let Err(e) = sent {
                tracing::warn!(error = %e, "failed to answer server request");
            }
        }
    }
    Ok(())
}

/// Reply to a request the server sent us.
pub fn answer_server_request(request: &JsonRpcRequest) -> JsonRpcResponse {
    if request.method == methods::PING {
        tracing::debug!(id = %request.id, "answering server ping");
        JsonRpcResponse::success(request.id.clone(), json!({}))
    } else {
        tracing::debug!(method = %request.method, "rejecting unsupported server request");
        JsonRpcResponse::failure(
            request.id.clone(),
            JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        )
    }
}
