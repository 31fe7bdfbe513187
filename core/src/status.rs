use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Info,
    Success,
    Warning,
    Error,
}

/// User-facing progress report. Every outcome of a run, errors included,
/// reaches the caller through these events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub kind: StatusKind,
    pub message: String,
    pub cause: Option<String>,
}

impl StatusEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, message)
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({})", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

pub trait StatusSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

/// Writes events to the `tracing` subscriber, one level per kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: StatusEvent) {
        match event.kind {
            StatusKind::Info => tracing::info!(target: "freeze::status", "{}", event),
            StatusKind::Success => {
                tracing::info!(target: "freeze::status", success = true, "{}", event)
            }
            StatusKind::Warning => tracing::warn!(target: "freeze::status", "{}", event),
            StatusKind::Error => tracing::error!(target: "freeze::status", "{}", event),
        }
    }
}

/// Forwards events to a channel, e.g. for a UI running on another task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl StatusSink for ChannelSink {
    fn emit(&self, event: StatusEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("status receiver closed, dropping event");
        }
    }
}
