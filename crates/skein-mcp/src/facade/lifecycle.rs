use std::sync::Arc;

use crate::error::Result;
use crate::session::{Session, SessionInfo, SessionState};

/// Session lifecycle calls.
#[derive(Clone)]
pub struct Lifecycle {
    session: Arc<Session>,
}

impl Lifecycle {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn initialize(&self) -> Result<SessionInfo> {
        self.session.initialize()
    }

    pub fn reinitialize(&self) -> Result<SessionInfo> {
        self.session.reinitialize()
    }

    pub fn shutdown(&self) -> Result<()> {
        self.session.shutdown()
    }

    pub fn ping(&self) -> Result<()> {
        self.session.ping()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.session_info()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }
}
