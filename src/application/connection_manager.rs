use super::event_channel::ListenerHandle;
use super::terminal::Terminal;
use crate::domain::ports::ConnectionService;
use crate::domain::reader::{ConnectionStatus, ConnectionStatusChange, Reader};
use crate::domain::service::{
    ConnectionPolicy, ServiceHandle, ServiceOptions, ServicePhase, ServiceState,
};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

enum Signal {
    StatusChanged(ConnectionStatus),
    UnexpectedDisconnect(Option<Reader>),
}

/// The default connection service: keeps a reader connected according to a
/// [`ConnectionPolicy`] and publishes what it is doing to its [`ServiceHandle`].
pub struct ConnectionManager {
    terminal: Terminal,
    options: ServiceOptions,
    state: Arc<watch::Sender<ServiceState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl ConnectionManager {
    pub fn new(terminal: Terminal, options: ServiceOptions) -> Self {
        let (state, _) = watch::channel(ServiceState::idle(options.policy));
        Self {
            terminal,
            options,
            state: Arc::new(state),
            worker: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ConnectionService for ConnectionManager {
    fn start(&self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(error = %err, "connection service needs a tokio runtime");
                self.state.send_modify(|state| {
                    state.phase = ServicePhase::Failed;
                    state.last_error = Some(err.to_string());
                });
                return;
            }
        };

        let (signals, receiver) = mpsc::unbounded_channel();
        let status_signals = signals.clone();
        let status = self
            .terminal
            .add_did_change_connection_status_listener(move |payload| {
                match serde_json::from_value::<ConnectionStatusChange>(payload.clone()) {
                    Ok(change) => {
                        let _ = status_signals.send(Signal::StatusChanged(change.status));
                    }
                    Err(err) => tracing::warn!(error = %err, "ignoring malformed connection status"),
                }
            });
        let disconnect = self
            .terminal
            .add_did_report_unexpected_reader_disconnect_listener(move |payload| {
                let reader = serde_json::from_value::<Reader>(payload.clone()).ok();
                let _ = signals.send(Signal::UnexpectedDisconnect(reader));
            });
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([status, disconnect]);

        let worker = Worker {
            terminal: self.terminal.clone(),
            options: self.options.clone(),
            state: Arc::clone(&self.state),
            signals: receiver,
        };
        let handle = runtime.spawn(worker.run());
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn stop(&self) -> Result<()> {
        let listeners: Vec<ListenerHandle> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for listener in listeners {
            listener.remove();
        }

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            worker.abort();
            let _ = worker.await;
        }

        let owns_connection = self.options.policy != ConnectionPolicy::Manual
            && self.state.borrow().phase == ServicePhase::Connected;
        if owns_connection && let Err(err) = self.terminal.disconnect_reader().await {
            tracing::warn!(error = %err, "could not disconnect reader while stopping");
            self.state
                .send_modify(|state| state.last_error = Some(err.to_string()));
        }

        self.state.send_modify(|state| {
            state.phase = ServicePhase::Stopped;
            state.reader = None;
        });
        Ok(())
    }

    fn handle(&self) -> ServiceHandle {
        ServiceHandle::new(self.state.subscribe())
    }
}

struct Worker {
    terminal: Terminal,
    options: ServiceOptions,
    state: Arc<watch::Sender<ServiceState>>,
    signals: mpsc::UnboundedReceiver<Signal>,
}

impl Worker {
    async fn run(mut self) {
        match self.options.policy {
            ConnectionPolicy::Auto => {
                let preferred = self.options.preferred_serial.clone();
                self.connect_with_retries(preferred.as_deref()).await;
            }
            ConnectionPolicy::Persist => match self.terminal.get_connected_reader().await {
                Ok(Some(reader)) => self.publish(ServicePhase::Connected, Some(reader), None),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "could not query connected reader"),
            },
            ConnectionPolicy::Manual => {}
        }

        while let Some(signal) = self.signals.recv().await {
            match signal {
                Signal::StatusChanged(status) => self.on_status(status),
                Signal::UnexpectedDisconnect(reader) => self.on_unexpected_disconnect(reader).await,
            }
        }
    }

    fn on_status(&self, status: ConnectionStatus) {
        self.state.send_if_modified(|state| match status {
            ConnectionStatus::Connected if state.phase != ServicePhase::Connected => {
                state.phase = ServicePhase::Connected;
                true
            }
            ConnectionStatus::NotConnected if state.phase == ServicePhase::Connected => {
                state.phase = ServicePhase::Disconnected;
                state.reader = None;
                true
            }
            _ => false,
        });
    }

    async fn on_unexpected_disconnect(&self, reader: Option<Reader>) {
        let serial = reader
            .map(|reader| reader.serial_number)
            .filter(|serial| !serial.is_empty())
            .or_else(|| {
                self.state
                    .borrow()
                    .reader
                    .as_ref()
                    .map(|reader| reader.serial_number.clone())
            });
        tracing::warn!(serial = ?serial, "reader disconnected unexpectedly");
        self.publish(ServicePhase::Disconnected, None, None);

        if self.options.policy == ConnectionPolicy::Manual {
            return;
        }
        match serial {
            Some(serial) => {
                self.publish_phase(ServicePhase::Reconnecting);
                self.connect_with_retries(Some(&serial)).await
            }
            None => self.publish(
                ServicePhase::Failed,
                None,
                Some("no reader to reconnect to".to_string()),
            ),
        }
    }

    async fn connect_with_retries(&self, serial: Option<&str>) {
        let attempts = self.options.max_reconnect_attempts.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.publish_phase(ServicePhase::Reconnecting);
                tokio::time::sleep(self.options.reconnect_delay).await;
            }
            match self.attempt(serial).await {
                Ok(reader) => {
                    tracing::info!(serial = %reader.serial_number, attempt, "reader connected");
                    self.publish(ServicePhase::Connected, Some(reader), None);
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, attempt, attempts, "connection attempt failed");
                    self.state
                        .send_modify(|state| state.last_error = Some(err.to_string()));
                }
            }
        }
        let last_error = self.state.borrow().last_error.clone();
        self.publish(ServicePhase::Failed, None, last_error);
    }

    async fn attempt(&self, serial: Option<&str>) -> Result<Reader> {
        self.publish_phase(ServicePhase::Discovering);
        let readers = self
            .terminal
            .discover_readers(self.options.simulated, &self.options.location_id)
            .await?;

        let target = match serial {
            Some(serial) => readers
                .into_iter()
                .find(|reader| reader.serial_number == serial)
                .ok_or_else(|| BridgeError::Subsystem(format!("reader {serial} not found")))?,
            None => readers
                .into_iter()
                .next()
                .ok_or_else(|| BridgeError::Subsystem("no readers discovered".to_string()))?,
        };

        self.publish_phase(ServicePhase::Connecting);
        self.terminal
            .connect_reader(&target.serial_number, &self.options.location_id)
            .await
    }

    fn publish_phase(&self, phase: ServicePhase) {
        self.state.send_modify(|state| state.phase = phase);
    }

    fn publish(&self, phase: ServicePhase, reader: Option<Reader>, last_error: Option<String>) {
        self.state.send_modify(|state| {
            state.phase = phase;
            state.reader = reader;
            if last_error.is_some() {
                state.last_error = last_error;
            }
        });
    }
}
