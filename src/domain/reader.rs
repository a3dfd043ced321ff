use serde::{Deserialize, Serialize};

/// A card reader as reported by the subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reader {
    pub serial_number: String,
    #[serde(default)]
    pub device_type: i64,
    #[serde(default)]
    pub battery_level: f64,
    #[serde(default)]
    pub device_software_version: String,
}

impl Reader {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            device_type: 0,
            battery_level: 1.0,
            device_software_version: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscoveryMethod {
    #[default]
    Internet,
    BluetoothScan,
}

/// Connection state of the reader, sent on the wire as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ConnectionStatus {
    #[default]
    NotConnected,
    Connecting,
    Connected,
}

impl TryFrom<i64> for ConnectionStatus {
    type Error = String;

    fn try_from(ordinal: i64) -> Result<Self, Self::Error> {
        match ordinal {
            0 => Ok(Self::NotConnected),
            1 => Ok(Self::Connecting),
            2 => Ok(Self::Connected),
            other => Err(format!("unknown connection status {other}")),
        }
    }
}

impl From<ConnectionStatus> for i64 {
    fn from(status: ConnectionStatus) -> Self {
        status as i64
    }
}

/// Card presence events reported by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ReaderEvent {
    CardInserted,
    #[default]
    CardRemoved,
}

impl TryFrom<i64> for ReaderEvent {
    type Error = String;

    fn try_from(ordinal: i64) -> Result<Self, Self::Error> {
        match ordinal {
            0 => Ok(Self::CardInserted),
            1 => Ok(Self::CardRemoved),
            other => Err(format!("unknown reader event {other}")),
        }
    }
}

impl From<ReaderEvent> for i64 {
    fn from(event: ReaderEvent) -> Self {
        event as i64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareUpdate {
    pub estimated_update_time: String,
    pub device_software_version: String,
}

/// Payload of `didChangeConnectionStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatusChange {
    pub status: ConnectionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reader_deserialization_defaults() {
        let reader: Reader = serde_json::from_value(json!({"serialNumber": "SIM-1"})).unwrap();
        assert_eq!(reader.serial_number, "SIM-1");
        assert_eq!(reader.device_type, 0);
        assert_eq!(reader.device_software_version, "");
    }

    #[test]
    fn test_connection_status_ordinals() {
        let status: ConnectionStatus = serde_json::from_value(json!(2)).unwrap();
        assert_eq!(status, ConnectionStatus::Connected);
        assert_eq!(serde_json::to_value(ConnectionStatus::Connecting).unwrap(), json!(1));
        assert!(serde_json::from_value::<ConnectionStatus>(json!(9)).is_err());
    }

    #[test]
    fn test_status_change_payload() {
        let change: ConnectionStatusChange =
            serde_json::from_value(json!({"status": 0})).unwrap();
        assert_eq!(change.status, ConnectionStatus::NotConnected);
    }
}
