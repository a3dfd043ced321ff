use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Every notification name the subsystem is known to emit.
///
/// The serde names are the wire contract and must match the subsystem exactly,
/// including its historical quirks (`didRequestReaderInputPromptListener`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    // Completions, paired 1:1 with a command.
    Initialization,
    ReadersDiscovered,
    ReaderConnection,
    ReaderDisconnectCompletion,
    ConnectedReader,
    ConnectionStatus,
    SetTerminalDisplay,
    ClearTerminalDisplay,
    PaymentStatus,
    LastReaderEvent,
    PaymentCreation,
    PaymentIntentRetrieval,
    PaymentMethodCollection,
    PaymentProcess,
    PaymentIntentCancel,
    AbortCreatePaymentCompletion,
    AbortDiscoverReadersCompletion,
    AbortInstallUpdateCompletion,
    UpdateCheck,
    UpdateInstall,

    // Persistent notifications.
    Log,
    ReaderDiscoveryCompletion,
    ReaderSoftwareUpdateProgress,
    DidRequestReaderInput,
    DidRequestReaderDisplayMessage,
    DidReportReaderEvent,
    DidReportLowBatteryWarning,
    DidChangePaymentStatus,
    DidChangeConnectionStatus,
    DidReportUnexpectedReaderDisconnect,
    DidReportAvailableUpdate,
    DidStartInstallingUpdate,
    DidReportReaderSoftwareUpdateProgress,
    DidFinishInstallingUpdate,
    DidBeginWaitingForReaderInput,
    #[serde(rename = "didRequestReaderInputPromptListener")]
    DidRequestReaderInputPrompt,

    // Token challenge.
    RequestConnectionToken,
}

impl EventKind {
    pub const ALL: [Self; 37] = [
        Self::Initialization,
        Self::ReadersDiscovered,
        Self::ReaderConnection,
        Self::ReaderDisconnectCompletion,
        Self::ConnectedReader,
        Self::ConnectionStatus,
        Self::SetTerminalDisplay,
        Self::ClearTerminalDisplay,
        Self::PaymentStatus,
        Self::LastReaderEvent,
        Self::PaymentCreation,
        Self::PaymentIntentRetrieval,
        Self::PaymentMethodCollection,
        Self::PaymentProcess,
        Self::PaymentIntentCancel,
        Self::AbortCreatePaymentCompletion,
        Self::AbortDiscoverReadersCompletion,
        Self::AbortInstallUpdateCompletion,
        Self::UpdateCheck,
        Self::UpdateInstall,
        Self::Log,
        Self::ReaderDiscoveryCompletion,
        Self::ReaderSoftwareUpdateProgress,
        Self::DidRequestReaderInput,
        Self::DidRequestReaderDisplayMessage,
        Self::DidReportReaderEvent,
        Self::DidReportLowBatteryWarning,
        Self::DidChangePaymentStatus,
        Self::DidChangeConnectionStatus,
        Self::DidReportUnexpectedReaderDisconnect,
        Self::DidReportAvailableUpdate,
        Self::DidStartInstallingUpdate,
        Self::DidReportReaderSoftwareUpdateProgress,
        Self::DidFinishInstallingUpdate,
        Self::DidBeginWaitingForReaderInput,
        Self::DidRequestReaderInputPrompt,
        Self::RequestConnectionToken,
    ];

    /// The exact name used on the subsystem channel.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::ReadersDiscovered => "readersDiscovered",
            Self::ReaderConnection => "readerConnection",
            Self::ReaderDisconnectCompletion => "readerDisconnectCompletion",
            Self::ConnectedReader => "connectedReader",
            Self::ConnectionStatus => "connectionStatus",
            Self::SetTerminalDisplay => "setTerminalDisplay",
            Self::ClearTerminalDisplay => "clearTerminalDisplay",
            Self::PaymentStatus => "paymentStatus",
            Self::LastReaderEvent => "lastReaderEvent",
            Self::PaymentCreation => "paymentCreation",
            Self::PaymentIntentRetrieval => "paymentIntentRetrieval",
            Self::PaymentMethodCollection => "paymentMethodCollection",
            Self::PaymentProcess => "paymentProcess",
            Self::PaymentIntentCancel => "paymentIntentCancel",
            Self::AbortCreatePaymentCompletion => "abortCreatePaymentCompletion",
            Self::AbortDiscoverReadersCompletion => "abortDiscoverReadersCompletion",
            Self::AbortInstallUpdateCompletion => "abortInstallUpdateCompletion",
            Self::UpdateCheck => "updateCheck",
            Self::UpdateInstall => "updateInstall",
            Self::Log => "log",
            Self::ReaderDiscoveryCompletion => "readerDiscoveryCompletion",
            Self::ReaderSoftwareUpdateProgress => "readerSoftwareUpdateProgress",
            Self::DidRequestReaderInput => "didRequestReaderInput",
            Self::DidRequestReaderDisplayMessage => "didRequestReaderDisplayMessage",
            Self::DidReportReaderEvent => "didReportReaderEvent",
            Self::DidReportLowBatteryWarning => "didReportLowBatteryWarning",
            Self::DidChangePaymentStatus => "didChangePaymentStatus",
            Self::DidChangeConnectionStatus => "didChangeConnectionStatus",
            Self::DidReportUnexpectedReaderDisconnect => "didReportUnexpectedReaderDisconnect",
            Self::DidReportAvailableUpdate => "didReportAvailableUpdate",
            Self::DidStartInstallingUpdate => "didStartInstallingUpdate",
            Self::DidReportReaderSoftwareUpdateProgress => "didReportReaderSoftwareUpdateProgress",
            Self::DidFinishInstallingUpdate => "didFinishInstallingUpdate",
            Self::DidBeginWaitingForReaderInput => "didBeginWaitingForReaderInput",
            Self::DidRequestReaderInputPrompt => "didRequestReaderInputPromptListener",
            Self::RequestConnectionToken => "requestConnectionToken",
        }
    }

    /// Whether the event answers a command.
    ///
    /// `ReadersDiscovered` is both: it completes `discoverReaders` and keeps
    /// arriving as the discovered list changes.
    pub fn is_completion(self) -> bool {
        matches!(
            self,
            Self::Initialization
                | Self::ReadersDiscovered
                | Self::ReaderConnection
                | Self::ReaderDisconnectCompletion
                | Self::ConnectedReader
                | Self::ConnectionStatus
                | Self::SetTerminalDisplay
                | Self::ClearTerminalDisplay
                | Self::PaymentStatus
                | Self::LastReaderEvent
                | Self::PaymentCreation
                | Self::PaymentIntentRetrieval
                | Self::PaymentMethodCollection
                | Self::PaymentProcess
                | Self::PaymentIntentCancel
                | Self::AbortCreatePaymentCompletion
                | Self::AbortDiscoverReadersCompletion
                | Self::AbortInstallUpdateCompletion
                | Self::UpdateCheck
                | Self::UpdateInstall
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for EventKind {
    type Err = BridgeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.wire_name() == name)
            .ok_or_else(|| BridgeError::UnknownEvent(name.to_string()))
    }
}

/// A single notification emitted by the subsystem.
///
/// Payloads are objects for most events, but some completions carry a bare
/// number (`connectionStatus`) or an array (`readersDiscovered`).
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: EventKind,
    pub payload: Value,
}

impl Notification {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    pub fn empty(kind: EventKind) -> Self {
        Self::new(kind, Value::Object(Default::default()))
    }

    /// Mirrors the subsystem's convention: an `error` field counts only when
    /// it is truthy (not null, false, zero or an empty string).
    pub fn error_field(&self) -> Option<&Value> {
        self.payload.get("error").filter(|value| is_truthy(value))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names_match_serde_names() {
        for kind in EventKind::ALL {
            let serialized = serde_json::to_value(kind).unwrap();
            assert_eq!(serialized, json!(kind.wire_name()), "{kind:?}");
            assert_eq!(kind.wire_name().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_event_name_is_rejected() {
        let result = "readerExploded".parse::<EventKind>();
        assert!(matches!(result, Err(BridgeError::UnknownEvent(name)) if name == "readerExploded"));
    }

    #[test]
    fn test_input_prompt_keeps_historical_wire_name() {
        assert_eq!(
            EventKind::DidRequestReaderInputPrompt.wire_name(),
            "didRequestReaderInputPromptListener"
        );
    }

    #[test]
    fn test_error_field_truthiness() {
        let kind = EventKind::ReaderConnection;
        assert!(Notification::new(kind, json!({"error": "boom"})).error_field().is_some());
        assert!(Notification::new(kind, json!({"error": {"code": 1}})).error_field().is_some());
        assert!(Notification::new(kind, json!({"error": null})).error_field().is_none());
        assert!(Notification::new(kind, json!({"error": ""})).error_field().is_none());
        assert!(Notification::new(kind, json!({"serialNumber": "X"})).error_field().is_none());
        assert!(Notification::new(kind, json!([1, 2])).error_field().is_none());
        assert!(Notification::new(kind, json!(2)).error_field().is_none());
    }

    #[test]
    fn test_completion_classification() {
        assert!(EventKind::PaymentProcess.is_completion());
        assert!(EventKind::ReadersDiscovered.is_completion());
        assert!(!EventKind::DidChangeConnectionStatus.is_completion());
        assert!(!EventKind::RequestConnectionToken.is_completion());
    }
}
