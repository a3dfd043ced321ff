use crate::application::event_channel::EventChannel;
use crate::config::SimulatorConfig;
use crate::domain::command::Command;
use crate::domain::event::{EventKind, Notification};
use crate::domain::payment::{PaymentIntent, PaymentIntentStatus, PaymentStatus};
use crate::domain::ports::Subsystem;
use crate::domain::reader::{ConnectionStatus, Reader, ReaderEvent};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

type Reply = std::result::Result<Value, String>;

/// An in-process stand-in for the terminal SDK.
///
/// Every command completes on its own task by emitting the paired completion
/// event into the [`EventChannel`], the way the native SDK does. Connecting a
/// reader goes through the connection token handshake unless a token is
/// already cached.
#[derive(Clone)]
pub struct SimulatedSubsystem {
    inner: Arc<Inner>,
}

struct Inner {
    events: EventChannel,
    config: SimulatorConfig,
    device: Mutex<Device>,
    challenge: Mutex<Option<oneshot::Sender<Reply>>>,
}

#[derive(Default)]
struct Device {
    initialized: bool,
    cached_token: Option<String>,
    connected: Option<Reader>,
    payment_status: PaymentStatus,
    last_reader_event: ReaderEvent,
    intents: HashMap<String, PaymentIntent>,
    current_intent: Option<String>,
    failures: HashMap<EventKind, String>,
    issued: u64,
}

impl SimulatedSubsystem {
    pub fn new(events: EventChannel, config: SimulatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                events,
                config,
                device: Mutex::new(Device::default()),
                challenge: Mutex::new(None),
            }),
        }
    }

    /// Makes a payment intent retrievable by `client_secret`.
    pub fn register_intent(&self, client_secret: &str, amount: i64, currency: Option<&str>) -> PaymentIntent {
        let mut device = self.inner.device();
        device.issued += 1;
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let intent = PaymentIntent {
            stripe_id: format!("pi_sim_{:04}", device.issued),
            created: created.to_string(),
            status: PaymentIntentStatus::RequiresPaymentMethod,
            amount,
            currency: Some(
                currency
                    .map(str::to_string)
                    .unwrap_or_else(|| self.inner.config.currency.clone()),
            ),
            metadata: HashMap::new(),
        };
        device.intents.insert(client_secret.to_string(), intent.clone());
        intent
    }

    /// The next completion of `event` carries `{"error": message}`.
    pub fn fail_next(&self, event: EventKind, message: &str) {
        self.inner
            .device()
            .failures
            .insert(event, message.to_string());
    }

    /// Drops the connected reader as if it lost power. Returns false when no
    /// reader was connected.
    pub fn report_unexpected_disconnect(&self) -> bool {
        let reader = {
            let mut device = self.inner.device();
            device.payment_status = PaymentStatus::NotReady;
            device.connected.take()
        };
        let Some(reader) = reader else {
            return false;
        };
        tracing::info!(serial = %reader.serial_number, "simulating unexpected disconnect");
        self.inner.status(ConnectionStatus::NotConnected);
        self.inner.emit(
            EventKind::DidReportUnexpectedReaderDisconnect,
            to_payload(&reader),
        );
        true
    }

    pub fn connected_reader(&self) -> Option<Reader> {
        self.inner.device().connected.clone()
    }
}

#[async_trait]
impl Subsystem for SimulatedSubsystem {
    async fn send(&self, command: Command) -> Result<()> {
        tracing::debug!(command = command.name(), "simulator received command");
        match command {
            Command::SetConnectionToken {
                token,
                error_message,
            } => {
                self.inner.answer_challenge(token, error_message);
                Ok(())
            }
            Command::ClearCachedCredentials => {
                self.inner.device().cached_token = None;
                Ok(())
            }
            command => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.complete(command).await });
                Ok(())
            }
        }
    }
}

impl Inner {
    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        self.events.emit(Notification::new(kind, payload));
    }

    fn status(&self, status: ConnectionStatus) {
        self.emit(
            EventKind::DidChangeConnectionStatus,
            json!({ "status": i64::from(status) }),
        );
    }

    fn payment_status(&self, status: PaymentStatus) {
        self.device().payment_status = status;
        self.emit(
            EventKind::DidChangePaymentStatus,
            json!({ "status": i64::from(status) }),
        );
    }

    fn answer_challenge(&self, token: Option<String>, error_message: Option<String>) {
        let reply = match (token, error_message) {
            (_, Some(message)) if !message.trim().is_empty() => Err(message),
            (Some(token), _) if !token.is_empty() => Ok(Value::String(token)),
            _ => Err("no connection token supplied".to_string()),
        };
        let pending = self
            .challenge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(sender) => {
                let _ = sender.send(reply);
            }
            None => tracing::warn!("connection token reply with no open challenge"),
        }
    }

    async fn complete(self: Arc<Self>, command: Command) {
        let Some(event) = command.completion_event() else {
            return;
        };
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        let injected = self.device().failures.remove(&event);
        let reply = match injected {
            Some(message) => Err(message),
            None => self.respond(command).await,
        };
        let payload = match reply {
            Ok(payload) => payload,
            Err(message) => {
                tracing::debug!(%event, error = %message, "simulated command failed");
                json!({ "error": message })
            }
        };
        self.emit(event, payload);
    }

    async fn respond(&self, command: Command) -> Reply {
        match command {
            Command::Initialize => {
                self.device().initialized = true;
                self.emit(
                    EventKind::Log,
                    json!({ "level": "info", "message": "simulated terminal ready" }),
                );
                Ok(json!({ "isInitialized": true }))
            }
            Command::DiscoverReaders { .. } => {
                self.require_initialized()?;
                let readers: Vec<Reader> = self.config.readers.iter().map(Reader::new).collect();
                self.emit(EventKind::ReaderDiscoveryCompletion, json!({}));
                Ok(to_payload(&readers))
            }
            Command::ConnectReader { serial_number, .. } => self.connect(serial_number).await,
            Command::DisconnectReader => {
                let was_connected = self.device().connected.take().is_some();
                if was_connected {
                    self.status(ConnectionStatus::NotConnected);
                    self.payment_status(PaymentStatus::NotReady);
                }
                Ok(json!({}))
            }
            Command::GetConnectedReader => {
                let reader = self.device().connected.clone();
                Ok(match reader {
                    Some(reader) => to_payload(&reader),
                    None => json!({ "serialNumber": "" }),
                })
            }
            Command::GetConnectionStatus => {
                let status = if self.device().connected.is_some() {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::NotConnected
                };
                Ok(json!(i64::from(status)))
            }
            Command::SetReaderDisplay { .. } | Command::ResetReaderDisplay => {
                self.require_connected()?;
                Ok(json!({}))
            }
            Command::GetPaymentStatus => Ok(json!(i64::from(self.device().payment_status))),
            Command::GetLastReaderEvent => Ok(json!(i64::from(self.device().last_reader_event))),
            Command::CreatePayment { payment_intent } => {
                self.retrieve(&payment_intent)?;
                self.collect()?;
                self.process()
            }
            Command::RetrievePaymentIntent { client_secret } => self.retrieve(&client_secret),
            Command::CollectPaymentMethod => self.collect(),
            Command::ProcessPayment => self.process(),
            Command::CancelPaymentIntent => {
                let intent = self.update_intent(|intent| intent.status = PaymentIntentStatus::Canceled)?;
                self.device().current_intent = None;
                Ok(json!({ "intent": intent }))
            }
            Command::AbortCreatePayment
            | Command::AbortDiscoverReaders
            | Command::AbortInstallUpdate => Ok(json!({})),
            Command::CheckForUpdate => {
                self.require_connected()?;
                Ok(json!({ "update": null }))
            }
            Command::InstallUpdate => {
                self.require_connected()?;
                self.emit(EventKind::DidStartInstallingUpdate, json!({}));
                for progress in [0.5, 1.0] {
                    self.emit(
                        EventKind::DidReportReaderSoftwareUpdateProgress,
                        json!({ "progress": progress }),
                    );
                }
                self.emit(EventKind::DidFinishInstallingUpdate, json!({}));
                Ok(json!({}))
            }
            Command::SetConnectionToken { .. } | Command::ClearCachedCredentials => Ok(Value::Null),
        }
    }

    async fn connect(&self, serial_number: String) -> Reply {
        self.require_initialized()?;
        if !self.config.readers.contains(&serial_number) {
            return Err(format!("reader {serial_number} not found"));
        }

        self.status(ConnectionStatus::Connecting);
        let needs_token = self.device().cached_token.is_none();
        if needs_token {
            match self.request_token().await {
                Ok(token) => self.device().cached_token = Some(token),
                Err(message) => {
                    self.status(ConnectionStatus::NotConnected);
                    return Err(message);
                }
            }
        }

        let reader = Reader::new(serial_number);
        self.device().connected = Some(reader.clone());
        self.status(ConnectionStatus::Connected);
        self.payment_status(PaymentStatus::Ready);
        Ok(to_payload(&reader))
    }

    async fn request_token(&self) -> std::result::Result<String, String> {
        let (sender, receiver) = oneshot::channel();
        *self.challenge.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        self.emit(EventKind::RequestConnectionToken, Value::Null);

        match receiver.await {
            Ok(Ok(Value::String(token))) => Ok(token),
            Ok(Ok(_)) => Err("no connection token supplied".to_string()),
            Ok(Err(message)) => Err(message),
            Err(_) => Err("connection token challenge was abandoned".to_string()),
        }
    }

    fn retrieve(&self, client_secret: &str) -> Reply {
        let mut device = self.device();
        let intent = device
            .intents
            .get(client_secret)
            .cloned()
            .ok_or_else(|| format!("No such payment_intent: {client_secret}"))?;
        device.current_intent = Some(client_secret.to_string());
        Ok(json!({ "intent": to_payload(&intent) }))
    }

    fn collect(&self) -> Reply {
        self.require_connected()?;
        self.payment_status(PaymentStatus::WaitingForInput);
        self.emit(
            EventKind::DidBeginWaitingForReaderInput,
            json!({ "text": "Insert, tap or swipe card" }),
        );
        self.device().last_reader_event = ReaderEvent::CardInserted;
        self.emit(
            EventKind::DidReportReaderEvent,
            json!({ "event": i64::from(ReaderEvent::CardInserted) }),
        );
        let intent = self.update_intent(|intent| {
            intent.status = PaymentIntentStatus::RequiresConfirmation;
        })?;
        Ok(json!({ "intent": intent }))
    }

    fn process(&self) -> Reply {
        self.require_connected()?;
        self.payment_status(PaymentStatus::Processing);
        let intent = self.update_intent(|intent| {
            if intent.status == PaymentIntentStatus::RequiresConfirmation {
                intent.status = PaymentIntentStatus::RequiresCapture;
            }
        });
        self.payment_status(PaymentStatus::Ready);
        let intent = intent?;
        Ok(json!({ "intent": intent }))
    }

    fn update_intent(&self, update: impl FnOnce(&mut PaymentIntent)) -> Reply {
        let mut device = self.device();
        let secret = device
            .current_intent
            .clone()
            .ok_or_else(|| "no payment intent has been retrieved".to_string())?;
        let intent = device
            .intents
            .get_mut(&secret)
            .ok_or_else(|| format!("No such payment_intent: {secret}"))?;
        update(intent);
        Ok(to_payload(&*intent))
    }

    fn require_initialized(&self) -> std::result::Result<(), String> {
        if self.device().initialized {
            Ok(())
        } else {
            Err("terminal is not initialized".to_string())
        }
    }

    fn require_connected(&self) -> std::result::Result<(), String> {
        if self.device().connected.is_some() {
            Ok(())
        } else {
            Err("no reader is connected".to_string())
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|err| json!({ "error": err.to_string() }))
}
