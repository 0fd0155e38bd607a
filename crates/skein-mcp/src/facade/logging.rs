//! Server log control and forwarding.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};

use crate::error::Result;
use crate::protocol::{LoggingLevel, LoggingMessage, methods};
use crate::session::Session;

/// Receives every log message the server pushes.
pub type LogSink = Arc<dyn Fn(&LoggingMessage) + Send + Sync>;

/// `logging/setLevel` façade.
///
/// Creating it registers a `notifications/message` handler that re-emits
/// server logs through `tracing` and hands them to any added sinks.
pub struct Logging {
    session: Arc<Session>,
    sinks: Arc<RwLock<Vec<LogSink>>>,
}

impl Logging {
    pub fn new(session: Arc<Session>) -> Self {
        let sinks: Arc<RwLock<Vec<LogSink>>> = Arc::new(RwLock::new(Vec::new()));
        let server = session.name().to_string();
        let forward = Arc::clone(&sinks);
        session.on_notification(methods::LOG_MESSAGE, move |notification| {
            let params = notification.params.unwrap_or(Value::Null);
            let message: LoggingMessage = match serde_json::from_value(params) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "malformed log notification");
                    return;
                }
            };
            emit(&server, &message);
            for sink in forward.read().iter() {
                sink(&message);
            }
        });
        Self { session, sinks }
    }

    /// Ask the server to send logs at `level` and above.
    pub fn set_level(&self, level: LoggingLevel) -> Result<()> {
        self.session
            .send_request(methods::LOGGING_SET_LEVEL, Some(json!({ "level": level })))?;
        tracing::debug!(server = %self.session.name(), level = level.as_str(), "set server log level");
        Ok(())
    }

    /// Also deliver server logs to `sink`.
    pub fn add_sink(&self, sink: LogSink) {
        self.sinks.write().push(sink);
    }
}

/// Re-emit a server log line at the matching `tracing` level.
fn emit(server: &str, message: &LoggingMessage) {
    let logger = message.logger.as_deref().unwrap_or("");
    let data = match &message.data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let level = message.level.as_str();
    let target = message.level.to_tracing();
    if target == tracing::Level::DEBUG {
        tracing::debug!(server = %server, logger, level, "{}", data);
    } else if target == tracing::Level::INFO {
        tracing::info!(server = %server, logger, level, "{}", data);
    } else if target == tracing::Level::WARN {
        tracing::warn!(server = %server, logger, level, "{}", data);
    } else {
        tracing::error!(server = %server, logger, level, "{}", data);
    }
}
