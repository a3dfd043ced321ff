use super::event::EventKind;
use super::payment::CartItem;
use super::reader::DiscoveryMethod;
use serde::{Deserialize, Serialize};

/// A fire-and-forget instruction for the subsystem.
///
/// Arguments are fixed at construction; the subsystem answers (at most) with
/// the event returned by [`Command::completion_event`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", content = "args", rename_all = "camelCase")]
pub enum Command {
    Initialize,
    #[serde(rename_all = "camelCase")]
    DiscoverReaders {
        method: DiscoveryMethod,
        simulated: bool,
        location_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ConnectReader {
        serial_number: String,
        location_id: String,
    },
    DisconnectReader,
    GetConnectedReader,
    GetConnectionStatus,
    #[serde(rename_all = "camelCase")]
    SetReaderDisplay {
        value: i64,
        cart_items: Vec<CartItem>,
    },
    ResetReaderDisplay,
    GetPaymentStatus,
    GetLastReaderEvent,
    #[serde(rename_all = "camelCase")]
    CreatePayment { payment_intent: String },
    #[serde(rename_all = "camelCase")]
    RetrievePaymentIntent { client_secret: String },
    CollectPaymentMethod,
    ProcessPayment,
    CancelPaymentIntent,
    AbortCreatePayment,
    AbortDiscoverReaders,
    AbortInstallUpdate,
    CheckForUpdate,
    InstallUpdate,
    #[serde(rename_all = "camelCase")]
    SetConnectionToken {
        token: Option<String>,
        error_message: Option<String>,
    },
    ClearCachedCredentials,
}

/// Payload of the `initialization` completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeStatus {
    pub is_initialized: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Command {
    /// The event the subsystem emits once this command has completed.
    pub fn completion_event(&self) -> Option<EventKind> {
        let event = match self {
            Self::Initialize => EventKind::Initialization,
            Self::DiscoverReaders { .. } => EventKind::ReadersDiscovered,
            Self::ConnectReader { .. } => EventKind::ReaderConnection,
            Self::DisconnectReader => EventKind::ReaderDisconnectCompletion,
            Self::GetConnectedReader => EventKind::ConnectedReader,
            Self::GetConnectionStatus => EventKind::ConnectionStatus,
            Self::SetReaderDisplay { .. } => EventKind::SetTerminalDisplay,
            Self::ResetReaderDisplay => EventKind::ClearTerminalDisplay,
            Self::GetPaymentStatus => EventKind::PaymentStatus,
            Self::GetLastReaderEvent => EventKind::LastReaderEvent,
            Self::CreatePayment { .. } => EventKind::PaymentCreation,
            Self::RetrievePaymentIntent { .. } => EventKind::PaymentIntentRetrieval,
            Self::CollectPaymentMethod => EventKind::PaymentMethodCollection,
            Self::ProcessPayment => EventKind::PaymentProcess,
            Self::CancelPaymentIntent => EventKind::PaymentIntentCancel,
            Self::AbortCreatePayment => EventKind::AbortCreatePaymentCompletion,
            Self::AbortDiscoverReaders => EventKind::AbortDiscoverReadersCompletion,
            Self::AbortInstallUpdate => EventKind::AbortInstallUpdateCompletion,
            Self::CheckForUpdate => EventKind::UpdateCheck,
            Self::InstallUpdate => EventKind::UpdateInstall,
            Self::SetConnectionToken { .. } | Self::ClearCachedCredentials => return None,
        };
        Some(event)
    }

    /// Field of the completion payload the caller is interested in, if not all of it.
    pub fn result_key(&self) -> Option<&'static str> {
        match self {
            Self::CreatePayment { .. }
            | Self::RetrievePaymentIntent { .. }
            | Self::CollectPaymentMethod
            | Self::ProcessPayment
            | Self::CancelPaymentIntent => Some("intent"),
            Self::CheckForUpdate => Some("update"),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::DiscoverReaders { .. } => "discoverReaders",
            Self::ConnectReader { .. } => "connectReader",
            Self::DisconnectReader => "disconnectReader",
            Self::GetConnectedReader => "getConnectedReader",
            Self::GetConnectionStatus => "getConnectionStatus",
            Self::SetReaderDisplay { .. } => "setReaderDisplay",
            Self::ResetReaderDisplay => "resetReaderDisplay",
            Self::GetPaymentStatus => "getPaymentStatus",
            Self::GetLastReaderEvent => "getLastReaderEvent",
            Self::CreatePayment { .. } => "createPayment",
            Self::RetrievePaymentIntent { .. } => "retrievePaymentIntent",
            Self::CollectPaymentMethod => "collectPaymentMethod",
            Self::ProcessPayment => "processPayment",
            Self::CancelPaymentIntent => "cancelPaymentIntent",
            Self::AbortCreatePayment => "abortCreatePayment",
            Self::AbortDiscoverReaders => "abortDiscoverReaders",
            Self::AbortInstallUpdate => "abortInstallUpdate",
            Self::CheckForUpdate => "checkForUpdate",
            Self::InstallUpdate => "installUpdate",
            Self::SetConnectionToken { .. } => "setConnectionToken",
            Self::ClearCachedCredentials => "clearCachedCredentials",
        }
    }
}
