//! Socket transport: one persistent TCP or Unix connection carrying
//! newline-delimited JSON frames.

use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::dispatch::{pump_lines, write_line};
use super::{
    ConnectionState, Dispatcher, NotificationHandler, PendingRequests, StateCell, Transport,
    TransportCapability, TransportKind,
};
use crate::config::{SocketAddress, TransportConfig};
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::session::SessionInfo;

/// A connected stream of either family.
enum SocketStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl SocketStream {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(s) => s.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(s) => s.try_clone().map(Self::Unix),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for SocketStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for SocketStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

/// Transport over a TCP or Unix domain socket.
pub struct SocketTransport {
    address: SocketAddress,
    config: TransportConfig,
    state: Arc<StateCell>,
    dispatcher: Arc<Dispatcher>,
    writer: Arc<Mutex<Option<SocketStream>>>,
}

impl SocketTransport {
    /// Describe a socket to dial on `connect`.
    pub fn new(address: SocketAddress, config: TransportConfig) -> Self {
        Self {
            address,
            config,
            state: Arc::new(StateCell::new()),
            dispatcher: Arc::new(Dispatcher::new(Arc::new(PendingRequests::new()))),
            writer: Arc::new(Mutex::new(None)),
        }
    }

    fn dial(&self) -> Result<SocketStream> {
        match &self.address {
            SocketAddress::Tcp(addr) => {
                let candidates = addr
                    .to_socket_addrs()
                    .map_err(|e| McpError::transport(format!("cannot resolve '{}': {}", addr, e)))?;
                let mut last_error = None;
                for candidate in candidates {
                    match TcpStream::connect_timeout(&candidate, self.config.connect_timeout) {
                        Ok(stream) => {
                            stream.set_nodelay(true)?;
                            stream.set_write_timeout(Some(self.config.write_timeout))?;
                            return Ok(SocketStream::Tcp(stream));
                        }
                        Err(e) => last_error = Some(e),
                    }
                }
                Err(match last_error {
                    Some(e) if e.kind() == io::ErrorKind::TimedOut => {
                        McpError::Timeout(self.config.connect_timeout)
                    }
                    Some(e) => McpError::transport(format!("failed to connect to {}: {}", addr, e)),
                    None => McpError::transport(format!("'{}' resolved to no addresses", addr)),
                })
            }
            #[cfg(unix)]
            SocketAddress::Unix(path) => {
                let stream = UnixStream::connect(path).map_err(|e| {
                    McpError::transport(format!("failed to connect to {}: {}", path.display(), e))
                })?;
                stream.set_write_timeout(Some(self.config.write_timeout))?;
                Ok(SocketStream::Unix(stream))
            }
            #[cfg(not(unix))]
            SocketAddress::Unix(path) => Err(McpError::transport(format!(
                "Unix sockets are not supported on this platform: {}",
                path.display()
            ))),
        }
    }

    fn write(&self, json: &str) -> Result<()> {
        write_line(&self.writer, json).map_err(|e| match e {
            McpError::Io(io)
                if matches!(io.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                McpError::Timeout(self.config.write_timeout)
            }
            other => other,
        })
    }
}

impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn connect(&self) -> Result<SessionInfo> {
        self.state.begin_connect()?;
        let stream = match self.dial().and_then(|s| Ok((s.try_clone()?, s))) {
            Ok(pair) => pair,
            Err(e) => {
                self.state.mark_closed();
                return Err(e);
            }
        };
        let (read_half, write_half) = stream;
        *self.writer.lock() = Some(write_half);

        let state = Arc::clone(&self.state);
        let dispatcher = Arc::clone(&self.dispatcher);
        let writer = Arc::clone(&self.writer);
        let address = self.address.to_string();
        let spawned = thread::Builder::new()
            .name("mcp-socket-reader".to_string())
            .spawn(move || {
                let result = pump_lines(BufReader::new(read_half), &dispatcher, |json| {
                    write_line(&writer, json)
                });
                if let Err(e) = result {
                    tracing::debug!(address = %address, error = %e, "socket read ended");
                }
                if state.get() == ConnectionState::Connected {
                    tracing::warn!(address = %address, "server closed the connection");
                }
                state.mark_closed();
                writer.lock().take();
                dispatcher.pending().fail_all(|| McpError::ConnectionClosed);
            });
        if let Err(e) = spawned {
            self.writer.lock().take();
            self.state.mark_closed();
            return Err(McpError::transport(format!("failed to start reader: {}", e)));
        }

        self.state.mark_connected();
        tracing::info!(address = %self.address, "socket transport connected");
        Ok(SessionInfo::new(TransportKind::Socket))
    }

    fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.state.ensure_connected()?;
        let id = request.id.clone();
        let pending = self.dispatcher.pending();
        let rx = pending.register(id.clone())?;
        let sent = serde_json::to_string(&request)
            .map_err(McpError::from)
            .and_then(|json| self.write(&json));
        if let Err(e) = sent {
            pending.remove(&id);
            return Err(e);
        }
        pending.wait(&id, rx, self.config.read_timeout)
    }

    fn send_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        self.state.ensure_connected()?;
        let json = serde_json::to_string(&notification)?;
        self.write(&json)
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn close(&self) -> Result<()> {
        if !self.state.begin_close() {
            return Ok(());
        }
        if let Some(stream) = self.writer.lock().take() {
            // Unblocks the reader thread with EOF.
            let _ = stream.shutdown();
        }
        self.state.mark_closed();
        self.dispatcher
            .pending()
            .fail_all(|| McpError::ConnectionClosed);
        tracing::info!(address = %self.address, "socket transport closed");
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

impl Drop for SocketTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
