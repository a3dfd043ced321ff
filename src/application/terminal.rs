use super::connection_manager::ConnectionManager;
use super::event_channel::{EventChannel, ListenerHandle};
use super::request_bridge::RequestBridge;
use super::service_lifecycle::{ServiceFactory, ServiceLifecycle};
use super::token_negotiator::TokenNegotiator;
use crate::config::BridgeConfig;
use crate::domain::command::{Command, InitializeStatus};
use crate::domain::event::EventKind;
use crate::domain::payment::{CartItem, PaymentIntent, PaymentStatus};
use crate::domain::ports::{ConnectionServiceRef, SubsystemRef, TokenProviderRef};
use crate::domain::reader::{ConnectionStatus, DiscoveryMethod, Reader, ReaderEvent, SoftwareUpdate};
use crate::domain::service::{ServiceHandle, ServiceOptions};
use crate::error::{BridgeError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// The host application's handle on the terminal subsystem.
///
/// Create one at startup from the composition root and pass clones to the
/// code that needs it. Clones share everything. Call
/// [`shutdown`](Self::shutdown) when done: a running connection service holds
/// a clone of the terminal, so the two keep each other alive until then.
#[derive(Clone)]
pub struct Terminal {
    inner: Arc<Inner>,
}

struct Inner {
    subsystem: SubsystemRef,
    bridge: RequestBridge,
    negotiator: TokenNegotiator,
    services: ServiceLifecycle<Terminal>,
    config: BridgeConfig,
}

macro_rules! listeners {
    ($($(#[$doc:meta])* $method:ident => $kind:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $method(&self, callback: impl Fn(&Value) + Send + Sync + 'static) -> ListenerHandle {
                self.add_listener(EventKind::$kind, callback)
            }
        )*
    };
}

impl Terminal {
    /// Wires a terminal over `subsystem`, which must emit into `events`.
    ///
    /// Installs the token negotiator immediately; challenges arriving before
    /// [`initialize`](Self::initialize) are answered with an error.
    pub fn new(subsystem: SubsystemRef, events: EventChannel, config: BridgeConfig) -> Self {
        Self::with_service_factory(
            subsystem,
            events,
            config,
            Box::new(|terminal: Terminal, options: ServiceOptions| {
                Arc::new(ConnectionManager::new(terminal, options)) as ConnectionServiceRef
            }),
        )
    }

    pub fn with_service_factory(
        subsystem: SubsystemRef,
        events: EventChannel,
        config: BridgeConfig,
        factory: ServiceFactory<Terminal>,
    ) -> Self {
        let negotiator = TokenNegotiator::install(&events, Arc::clone(&subsystem));
        Self {
            inner: Arc::new(Inner {
                subsystem,
                bridge: RequestBridge::new(events),
                negotiator,
                services: ServiceLifecycle::new(factory),
                config,
            }),
        }
    }

    pub fn events(&self) -> &EventChannel {
        self.inner.bridge.events()
    }

    /// Registers the token provider and initializes the subsystem.
    ///
    /// `isInitialized: true` wins over an `error` field in the same payload.
    pub async fn initialize(&self, provider: TokenProviderRef) -> Result<()> {
        self.inner.negotiator.set_provider(provider);

        let (payload, failure) = match self.request_value(Command::Initialize).await {
            Ok(payload) => (payload, None),
            Err(BridgeError::Command(err)) => {
                let message = err.message();
                (err.into_payload(), Some(message))
            }
            Err(err) => return Err(err),
        };
        if payload.get("isInitialized").and_then(Value::as_bool) == Some(true) {
            if let Some(message) = failure {
                tracing::warn!(error = %message, "subsystem initialized with an error");
            }
            tracing::info!("terminal subsystem initialized");
            return Ok(());
        }

        let message = match parse::<InitializeStatus>(EventKind::Initialization, payload) {
            Ok(status) => failure.or(status.error),
            Err(err) if failure.is_none() => return Err(err),
            Err(_) => failure,
        };
        Err(BridgeError::Initialization(message.unwrap_or_else(|| {
            "subsystem reported it is not initialized".to_string()
        })))
    }

    pub async fn discover_readers(&self, simulated: bool, location_id: &str) -> Result<Vec<Reader>> {
        self.request(Command::DiscoverReaders {
            method: DiscoveryMethod::Internet,
            simulated,
            location_id: location_id.to_string(),
        })
        .await
    }

    pub async fn connect_reader(&self, serial_number: &str, location_id: &str) -> Result<Reader> {
        self.request(Command::ConnectReader {
            serial_number: serial_number.to_string(),
            location_id: location_id.to_string(),
        })
        .await
    }

    pub async fn disconnect_reader(&self) -> Result<()> {
        self.request_value(Command::DisconnectReader).await.map(drop)
    }

    /// The connected reader, or `None` when the subsystem reports an empty serial.
    pub async fn get_connected_reader(&self) -> Result<Option<Reader>> {
        let payload = self.request_value(Command::GetConnectedReader).await?;
        let has_serial = payload
            .get("serialNumber")
            .and_then(Value::as_str)
            .is_some_and(|serial| !serial.is_empty());
        if !has_serial {
            return Ok(None);
        }
        parse(EventKind::ConnectedReader, payload).map(Some)
    }

    pub async fn get_connection_status(&self) -> Result<ConnectionStatus> {
        self.request(Command::GetConnectionStatus).await
    }

    pub async fn set_reader_display(&self, value: i64, cart_items: Vec<CartItem>) -> Result<()> {
        self.request_value(Command::SetReaderDisplay { value, cart_items })
            .await
            .map(drop)
    }

    pub async fn clear_reader_display(&self) -> Result<()> {
        self.request_value(Command::ResetReaderDisplay).await.map(drop)
    }

    pub async fn get_payment_status(&self) -> Result<PaymentStatus> {
        self.request(Command::GetPaymentStatus).await
    }

    pub async fn get_last_reader_event(&self) -> Result<ReaderEvent> {
        self.request(Command::GetLastReaderEvent).await
    }

    pub async fn create_payment(&self, payment_intent: &str) -> Result<PaymentIntent> {
        self.request(Command::CreatePayment {
            payment_intent: payment_intent.to_string(),
        })
        .await
    }

    /// Loads a pending intent into the subsystem so a payment method can be
    /// collected for it.
    pub async fn retrieve_payment_intent(&self, client_secret: &str) -> Result<PaymentIntent> {
        self.request(Command::RetrievePaymentIntent {
            client_secret: client_secret.to_string(),
        })
        .await
    }

    pub async fn collect_payment_method(&self) -> Result<PaymentIntent> {
        self.request(Command::CollectPaymentMethod).await
    }

    pub async fn process_payment(&self) -> Result<PaymentIntent> {
        self.request(Command::ProcessPayment).await
    }

    pub async fn cancel_payment_intent(&self) -> Result<PaymentIntent> {
        self.request(Command::CancelPaymentIntent).await
    }

    pub async fn abort_create_payment(&self) -> Result<()> {
        self.request_value(Command::AbortCreatePayment).await.map(drop)
    }

    pub async fn abort_discover_readers(&self) -> Result<()> {
        self.request_value(Command::AbortDiscoverReaders).await.map(drop)
    }

    pub async fn abort_install_update(&self) -> Result<()> {
        self.request_value(Command::AbortInstallUpdate).await.map(drop)
    }

    pub async fn check_for_update(&self) -> Result<Option<SoftwareUpdate>> {
        self.request(Command::CheckForUpdate).await
    }

    pub async fn install_update(&self) -> Result<()> {
        self.request_value(Command::InstallUpdate).await.map(drop)
    }

    /// Makes the subsystem request a fresh token on its next connection.
    pub async fn clear_cached_credentials(&self) -> Result<()> {
        self.inner.subsystem.send(Command::ClearCachedCredentials).await
    }

    /// Listens for every `kind` notification until the handle is removed.
    pub fn add_listener(
        &self,
        kind: EventKind,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.events().subscribe(kind, Arc::new(callback))
    }

    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        handle.remove()
    }

    listeners! {
        add_log_listener => Log;
        /// Fires on every change to the discovered reader list.
        add_readers_discovered_listener => ReadersDiscovered;
        add_reader_discovery_completion_listener => ReaderDiscoveryCompletion;
        add_abort_discover_readers_completion_listener => AbortDiscoverReadersCompletion;
        add_reader_software_update_progress_listener => ReaderSoftwareUpdateProgress;
        add_did_request_reader_input_listener => DidRequestReaderInput;
        add_did_request_reader_display_message_listener => DidRequestReaderDisplayMessage;
        add_did_report_reader_event_listener => DidReportReaderEvent;
        add_did_report_low_battery_warning_listener => DidReportLowBatteryWarning;
        add_did_change_payment_status_listener => DidChangePaymentStatus;
        add_did_change_connection_status_listener => DidChangeConnectionStatus;
        add_did_report_unexpected_reader_disconnect_listener => DidReportUnexpectedReaderDisconnect;
        add_did_report_available_update_listener => DidReportAvailableUpdate;
        add_did_start_installing_update_listener => DidStartInstallingUpdate;
        add_did_report_reader_software_update_progress_listener => DidReportReaderSoftwareUpdateProgress;
        add_did_finish_installing_update_listener => DidFinishInstallingUpdate;
        add_did_begin_waiting_for_reader_input_listener => DidBeginWaitingForReaderInput;
        add_did_request_reader_input_prompt_listener => DidRequestReaderInputPrompt;
    }

    /// Starts the connection service. Fails if one is already running.
    pub fn start_service(&self, options: impl Into<ServiceOptions>) -> Result<ServiceHandle> {
        self.inner.services.start(self.clone(), options)
    }

    pub async fn stop_service(&self) -> Result<()> {
        self.inner.services.stop().await
    }

    pub fn is_service_running(&self) -> bool {
        self.inner.services.is_running()
    }

    /// Stops the service and the token negotiator, then drops every
    /// subscription. Requests still waiting fail with
    /// [`BridgeError::ChannelClosed`].
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_service().await?;
        self.inner.negotiator.uninstall();
        self.events().clear();
        tracing::info!("terminal shut down");
        Ok(())
    }

    async fn request<T: DeserializeOwned>(&self, command: Command) -> Result<T> {
        let event = completion_of(&command)?;
        let value = self.request_value(command).await?;
        parse(event, value)
    }

    async fn request_value(&self, command: Command) -> Result<Value> {
        let event = completion_of(&command)?;
        let key = command.result_key();
        let subsystem = Arc::clone(&self.inner.subsystem);
        tracing::debug!(command = command.name(), "issuing command");
        self.inner
            .bridge
            .invoke_within(
                event,
                move || async move { subsystem.send(command).await },
                key,
                self.inner.config.command_timeout(),
            )
            .await
    }
}

fn completion_of(command: &Command) -> Result<EventKind> {
    command.completion_event().ok_or_else(|| {
        BridgeError::Subsystem(format!("`{}` has no completion event", command.name()))
    })
}

fn parse<T: DeserializeOwned>(event: EventKind, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|source| BridgeError::Payload { event, source })
}
