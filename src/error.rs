use crate::domain::event::EventKind;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Subsystem failed to initialize: {0}")]
    Initialization(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("A connection service is already running")]
    ServiceAlreadyRunning,
    #[error("Timed out after {after:?} waiting for `{event}`")]
    Timeout { event: EventKind, after: Duration },
    #[error("Event channel dropped `{0}` before it was delivered")]
    ChannelClosed(EventKind),
    #[error("Unknown event `{0}`")]
    UnknownEvent(String),
    #[error("Malformed `{event}` payload: {source}")]
    Payload {
        event: EventKind,
        source: serde_json::Error,
    },
    #[error("Subsystem error: {0}")]
    Subsystem(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// A completion event that carried an `error` field.
///
/// The payload is kept verbatim so callers can inspect every field the
/// subsystem reported (error codes, decline codes, partial intents).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    event: EventKind,
    payload: Value,
}

impl CommandError {
    pub fn new(event: EventKind, payload: Value) -> Self {
        Self { event, payload }
    }

    pub fn event(&self) -> EventKind {
        self.event
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// The `error` field rendered as text, whatever JSON type it had.
    pub fn message(&self) -> String {
        match self.payload.get("error") {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn code(&self) -> Option<i64> {
        self.payload.get("code").and_then(Value::as_i64)
    }

    pub fn decline_code(&self) -> Option<&str> {
        self.payload.get("declineCode").and_then(Value::as_str)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` failed: {}", self.event, self.message())
    }
}

impl std::error::Error for CommandError {}
