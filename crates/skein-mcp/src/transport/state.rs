//! Connection-state bookkeeping shared by all transports.

use parking_lot::Mutex;

use super::ConnectionState;
use crate::error::{McpError, Result};

/// Guards the `Unconnected → Connecting → Connected → Closing → Closed` walk.
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<ConnectionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// A cell in `Unconnected`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Unconnected),
        }
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the state is `Connected`.
    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Claim the right to connect. Fails unless the cell is `Unconnected`.
    pub fn begin_connect(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Unconnected => {
                *state = ConnectionState::Connecting;
                Ok(())
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                Err(McpError::transport("transport already connected"))
            }
            ConnectionState::Closing | ConnectionState::Closed => Err(McpError::ConnectionClosed),
        }
    }

    /// Finish a successful connect.
    pub fn mark_connected(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Connected;
        }
    }

    /// Claim the right to close. Returns `false` when someone already did.
    pub fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Closing | ConnectionState::Closed => false,
            _ => {
                *state = ConnectionState::Closing;
                true
            }
        }
    }

    /// Move to the terminal state.
    pub fn mark_closed(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }

    /// Fail fast unless connected.
    pub fn ensure_connected(&self) -> Result<()> {
        match self.get() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Unconnected | ConnectionState::Connecting => {
                Err(McpError::transport("transport not connected"))
            }
            ConnectionState::Closing | ConnectionState::Closed => Err(McpError::ConnectionClosed),
        }
    }
}
