//! Newline-delimited JSON transport for a subsystem running out of process.
//!
//! Commands go out as `{"command": "<name>", "args": {...}}` and notifications
//! come back as `{"event": "<name>", "data": <payload>}`, one per line.

use crate::application::event_channel::EventChannel;
use crate::domain::command::Command;
use crate::domain::event::{EventKind, Notification};
use crate::domain::ports::Subsystem;
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Deserialize)]
struct RawNotification {
    event: String,
    #[serde(default)]
    data: Value,
}

pub fn encode_command(command: &Command) -> Result<String> {
    Ok(serde_json::to_string(command)?)
}

/// Parses one notification line, rejecting event names the bridge does not know.
pub fn decode_notification(line: &str) -> Result<Notification> {
    let raw: RawNotification = serde_json::from_str(line)?;
    let kind: EventKind = raw.event.parse()?;
    Ok(Notification::new(kind, raw.data))
}

/// Sends commands as JSON lines over any async writer.
pub struct JsonLinesSubsystem<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSubsystem<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> Subsystem for JsonLinesSubsystem<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, command: Command) -> Result<()> {
        let mut line = encode_command(&command)?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        tracing::trace!(command = command.name(), "command written");
        Ok(())
    }
}

/// Emits every notification read from `reader` until it reaches EOF.
///
/// Lines that fail to decode, including ones that are not UTF-8, are logged
/// and skipped. Only an I/O error ends the stream early. Returns how many
/// notifications were delivered.
pub async fn pump_notifications<R>(mut reader: R, events: &EventChannel) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut delivered = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(err) => {
                tracing::warn!(error = %err, bytes = buf.len(), "skipping non-UTF-8 notification line");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match decode_notification(line) {
            Ok(notification) => {
                tracing::trace!(event = %notification.kind, "notification received");
                events.emit(notification);
                delivered += 1;
            }
            Err(err) => tracing::warn!(error = %err, line = %line, "skipping undecodable notification"),
        }
    }
    tracing::debug!(delivered, "notification stream closed");
    Ok(delivered)
}
