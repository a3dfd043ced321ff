#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use terminal_bridge::application::event_channel::EventChannel;
use terminal_bridge::application::terminal::Terminal;
use terminal_bridge::config::BridgeConfig;
use terminal_bridge::domain::command::Command;
use terminal_bridge::domain::event::{EventKind, Notification};
use terminal_bridge::domain::ports::Subsystem;
use terminal_bridge::error::{BridgeError, Result};

/// A subsystem double that records every command and, when a scripted
/// reply is queued for it, emits that reply before `send` returns.
#[derive(Default)]
pub struct ScriptedSubsystem {
    events: EventChannel,
    sent: Mutex<Vec<Command>>,
    replies: Mutex<HashMap<&'static str, VecDeque<Vec<Notification>>>>,
    refusing: AtomicBool,
}

impl ScriptedSubsystem {
    pub fn new(events: &EventChannel) -> Arc<Self> {
        Arc::new(Self {
            events: events.clone(),
            ..Self::default()
        })
    }

    /// Queues notifications to emit on the next `command` send.
    pub fn reply(&self, command: &'static str, notifications: Vec<Notification>) {
        self.replies
            .lock()
            .unwrap()
            .entry(command)
            .or_default()
            .push_back(notifications);
    }

    pub fn reply_with(&self, command: &'static str, kind: EventKind, payload: Value) {
        self.reply(command, vec![Notification::new(kind, payload)]);
    }

    /// Makes every later `send` fail before reaching the device.
    pub fn refuse_sends(&self) {
        self.refusing.store(true, Ordering::SeqCst);
    }

    pub fn emit(&self, kind: EventKind, payload: Value) {
        self.events.emit(Notification::new(kind, payload));
    }

    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent().iter().map(Command::name).collect()
    }
}

#[async_trait]
impl Subsystem for ScriptedSubsystem {
    async fn send(&self, command: Command) -> Result<()> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(BridgeError::Subsystem("device unplugged".to_string()));
        }
        let name = command.name();
        self.sent.lock().unwrap().push(command);

        let scripted = self
            .replies
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        for notification in scripted.unwrap_or_default() {
            self.events.emit(notification);
        }
        Ok(())
    }
}

pub fn scripted_terminal() -> (Terminal, Arc<ScriptedSubsystem>) {
    scripted_terminal_with(BridgeConfig::default())
}

pub fn scripted_terminal_with(config: BridgeConfig) -> (Terminal, Arc<ScriptedSubsystem>) {
    let events = EventChannel::new();
    let subsystem = ScriptedSubsystem::new(&events);
    let terminal = Terminal::new(subsystem.clone(), events, config);
    (terminal, subsystem)
}
