//! Request/response correlation for transports with a background reader.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcResponse, RequestId};

type Slot = Sender<Result<JsonRpcResponse>>;

/// Outstanding requests keyed by id.
///
/// The sending thread registers an id and blocks on the returned receiver;
/// the reader thread completes it when the matching response arrives.
#[derive(Default)]
pub struct PendingRequests {
    slots: Mutex<HashMap<RequestId, Slot>>,
}

impl PendingRequests {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `id`. Fails if a request with the same id is in flight.
    pub fn register(&self, id: RequestId) -> Result<Receiver<Result<JsonRpcResponse>>> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&id) {
            return Err(McpError::protocol(format!(
                "request id {} is already in flight",
                id
            )));
        }
        let (tx, rx) = mpsc::channel();
        slots.insert(id, tx);
        Ok(rx)
    }

    /// Hand a response to its waiting caller.
    ///
    /// An id nobody is waiting for is a protocol error; the response is
    /// dropped rather than delivered elsewhere.
    pub fn complete(&self, response: JsonRpcResponse) -> Result<()> {
        let slot = self.slots.lock().remove(&response.id);
        match slot {
            Some(tx) => {
                // The caller may have timed out in the meantime.
                let _ = tx.send(Ok(response));
                Ok(())
            }
            None => Err(McpError::protocol(format!(
                "response for unknown request id {}",
                response.id
            ))),
        }
    }

    /// Fail one request.
    pub fn fail(&self, id: &RequestId, error: McpError) {
        if let Some(tx) = self.slots.lock().remove(id) {
            let _ = tx.send(Err(error));
        }
    }

    /// Fail every outstanding request, e.g. when the connection drops.
    pub fn fail_all(&self, error: impl Fn() -> McpError) {
        let drained: Vec<Slot> = self.slots.lock().drain().map(|(_, tx)| tx).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing pending requests");
        }
        for tx in drained {
            let _ = tx.send(Err(error()));
        }
    }

    /// Drop a registration without answering it.
    pub fn remove(&self, id: &RequestId) {
        self.slots.lock().remove(id);
    }

    /// Block until `id` is answered, failed, or `timeout` passes.
    pub fn wait(
        &self,
        id: &RequestId,
        rx: Receiver<Result<JsonRpcResponse>>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.remove(id);
                Err(McpError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(McpError::ConnectionClosed),
        }
    }

    /// Number of requests in flight.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
