//! Server-sent events framing.

use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc::Sender;

use crate::error::{McpError, Result};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the server names none.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Last event id seen.
    pub id: Option<String>,
    /// Reconnect hint in milliseconds.
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Parse a complete event block. Returns `None` when it carries no data.
    pub fn parse(block: &str) -> Option<Self> {
        let mut parser = SseParser::new();
        for line in block.lines() {
            if let Some(event) = parser.feed_line(line) {
                return Some(event);
            }
        }
        parser.finish()
    }
}

/// Line-at-a-time SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    /// Fresh parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (with or without its terminator). A blank line ends the
    /// current event and returns it if it had any data.
    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => self.retry = value.parse().ok(),
            _ => {}
        }
        None
    }

    /// Flush an event left unterminated at end of stream.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id: self.id.clone(),
            retry: self.retry,
        })
    }
}

/// Read events from `body` into `tx` until EOF, a read error, or the
/// receiver hanging up. Dropping `tx` on return tells the receiver the stream
/// is over.
pub(crate) fn pump_events<R: Read>(body: R, tx: Sender<Result<SseEvent>>) {
    let mut reader = BufReader::new(body);
    let mut parser = SseParser::new();
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                if let Some(event) = parser.finish() {
                    let _ = tx.send(Ok(event));
                }
                return;
            }
            Ok(_) => {
                if let Some(event) = parser.feed_line(&line) {
                    if tx.send(Ok(event)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(McpError::transport(format!(
                    "event stream read failed: {}",
                    e
                ))));
                return;
            }
        }
    }
}
