//! Stdio transport: a child process speaking newline-delimited JSON.

use std::io::{BufRead, BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::dispatch::{pump_lines, write_line};
use super::{
    ConnectionState, Dispatcher, NotificationHandler, PendingRequests, StateCell, Transport,
    TransportCapability, TransportKind,
};
use crate::config::TransportConfig;
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::session::SessionInfo;

/// How long a child gets to exit on its own after stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Transport over a spawned child's stdin/stdout.
///
/// stderr is drained into `tracing` at debug level. The child is killed and
/// reaped on [`Transport::close`] or drop, whichever comes first.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    config: TransportConfig,
    state: Arc<StateCell>,
    dispatcher: Arc<Dispatcher>,
    stdin: Arc<Mutex<Option<BufWriter<ChildStdin>>>>,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Describe a child process to spawn on `connect`.
    pub fn new(
        command: &str,
        args: Vec<String>,
        env: Vec<(String, String)>,
        cwd: Option<PathBuf>,
        config: TransportConfig,
    ) -> Self {
        Self {
            command: command.to_string(),
            args,
            env,
            cwd,
            config,
            state: Arc::new(StateCell::new()),
            dispatcher: Arc::new(Dispatcher::new(Arc::new(PendingRequests::new()))),
            stdin: Arc::new(Mutex::new(None)),
            child: Mutex::new(None),
        }
    }

    /// OS process id of the running child.
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().map(Child::id)
    }

    fn spawn(&self) -> Result<()> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::spawn_failed(format!("failed to spawn '{}': {}", self.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;
        let stderr = child.stderr.take();

        tracing::info!(command = %self.command, pid = child.id(), "spawned MCP server");
        *self.stdin.lock() = Some(BufWriter::new(stdin));
        *self.child.lock() = Some(child);

        let state = Arc::clone(&self.state);
        let dispatcher = Arc::clone(&self.dispatcher);
        let writer = Arc::clone(&self.stdin);
        let command = self.command.clone();
        thread::Builder::new()
            .name("mcp-stdio-reader".to_string())
            .spawn(move || {
                let result = pump_lines(BufReader::new(stdout), &dispatcher, |json| {
                    write_line(&writer, json)
                });
                if let Err(e) = result {
                    tracing::warn!(command = %command, error = %e, "stdout read failed");
                }
                if state.get() == ConnectionState::Connected {
                    tracing::warn!(command = %command, "MCP server closed stdout");
                }
                state.mark_closed();
                dispatcher.pending().fail_all(|| McpError::ConnectionClosed);
            })
            .map_err(|e| McpError::spawn_failed(format!("failed to start reader: {}", e)))?;

        if let Some(stderr) = stderr {
            let command = self.command.clone();
            thread::Builder::new()
                .name("mcp-stdio-stderr".to_string())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                        tracing::debug!(server = %command, "{}", line);
                    }
                })
                .map_err(|e| McpError::spawn_failed(format!("failed to start stderr drain: {}", e)))?;
        }
        Ok(())
    }

    fn child_running(&self) -> bool {
        match self.child.lock().as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Wait for the child to exit on its own, then kill it.
    fn reap(&self) {
        let Some(mut child) = self.child.lock().take() else {
            return;
        };
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(command = %self.command, %status, "MCP server exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                _ => break,
            }
        }
        tracing::debug!(command = %self.command, "killing MCP server");
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn connect(&self) -> Result<SessionInfo> {
        self.state.begin_connect()?;
        if let Err(e) = self.spawn() {
            self.state.mark_closed();
            self.reap();
            return Err(e);
        }
        self.state.mark_connected();
        Ok(SessionInfo::new(TransportKind::Stdio))
    }

    fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.state.ensure_connected()?;
        let id = request.id.clone();
        let pending = self.dispatcher.pending();
        let rx = pending.register(id.clone())?;
        let sent = serde_json::to_string(&request)
            .map_err(McpError::from)
            .and_then(|json| write_line(&self.stdin, &json));
        if let Err(e) = sent {
            pending.remove(&id);
            return Err(e);
        }
        pending.wait(&id, rx, self.config.read_timeout)
    }

    fn send_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        self.state.ensure_connected()?;
        let json = serde_json::to_string(&notification)?;
        write_line(&self.stdin, &json)
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected() && self.child_running()
    }

    fn close(&self) -> Result<()> {
        if !self.state.begin_close() {
            return Ok(());
        }
        // Dropping stdin is the polite shutdown signal.
        self.stdin.lock().take();
        self.reap();
        self.state.mark_closed();
        self.dispatcher
            .pending()
            .fail_all(|| McpError::ConnectionClosed);
        tracing::info!(command = %self.command, "stdio transport closed");
        Ok(())
    }

    fn capabilities(&self) -> Vec<TransportCapability> {
        vec![TransportCapability::ServerPush]
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        self.dispatcher.set_handler(handler);
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
