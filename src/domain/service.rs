use super::reader::Reader;
use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;

/// How the connection service manages the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPolicy {
    /// Discover and connect on start, reconnect after unexpected disconnects.
    Auto,
    /// Reconnect to the last connected reader after unexpected disconnects.
    Persist,
    /// Only observe; the host connects and disconnects itself.
    #[default]
    Manual,
}

impl fmt::Display for ConnectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Persist => "persist",
            Self::Manual => "manual",
        })
    }
}

impl FromStr for ConnectionPolicy {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "persist" => Ok(Self::Persist),
            "manual" => Ok(Self::Manual),
            other => Err(BridgeError::Subsystem(format!(
                "unknown connection policy `{other}`"
            ))),
        }
    }
}

/// Options for starting a connection service.
///
/// A bare [`ConnectionPolicy`] converts into options with defaults for the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOptions {
    pub policy: ConnectionPolicy,
    pub location_id: String,
    pub simulated: bool,
    pub preferred_serial: Option<String>,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            policy: ConnectionPolicy::default(),
            location_id: String::new(),
            simulated: false,
            preferred_serial: None,
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl From<ConnectionPolicy> for ServiceOptions {
    fn from(policy: ConnectionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServicePhase {
    Idle,
    Discovering,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Failed,
    Stopped,
}

/// Snapshot of what the connection service is doing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceState {
    pub policy: ConnectionPolicy,
    pub phase: ServicePhase,
    pub reader: Option<Reader>,
    pub last_error: Option<String>,
}

impl ServiceState {
    pub fn idle(policy: ConnectionPolicy) -> Self {
        Self {
            policy,
            phase: ServicePhase::Idle,
            reader: None,
            last_error: None,
        }
    }
}

/// Observable view of a running service, returned by `start_service`.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    state: watch::Receiver<ServiceState>,
}

impl ServiceHandle {
    pub fn new(state: watch::Receiver<ServiceState>) -> Self {
        Self { state }
    }

    pub fn current(&self) -> ServiceState {
        self.state.borrow().clone()
    }

    /// Waits until the state satisfies `predicate`, returning that state.
    ///
    /// Returns `None` if the service was dropped before that happened.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&ServiceState) -> bool,
    ) -> Option<ServiceState> {
        self.state
            .wait_for(|state| predicate(state))
            .await
            .ok()
            .map(|state| state.clone())
    }

    pub async fn changed(&mut self) -> Option<ServiceState> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_normalizes_into_options() {
        let options = ServiceOptions::from(ConnectionPolicy::Persist);
        assert_eq!(options.policy, ConnectionPolicy::Persist);
        assert_eq!(options.max_reconnect_attempts, 3);
        assert!(options.preferred_serial.is_none());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(" Auto ".parse::<ConnectionPolicy>().unwrap(), ConnectionPolicy::Auto);
        assert_eq!("manual".parse::<ConnectionPolicy>().unwrap(), ConnectionPolicy::Manual);
        assert!("sometimes".parse::<ConnectionPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_handle_observes_updates() {
        let (tx, rx) = watch::channel(ServiceState::idle(ConnectionPolicy::Auto));
        let mut handle = ServiceHandle::new(rx);

        tx.send_modify(|state| state.phase = ServicePhase::Connected);

        let state = handle
            .wait_for(|state| state.phase == ServicePhase::Connected)
            .await
            .unwrap();
        assert_eq!(state.policy, ConnectionPolicy::Auto);
        assert_eq!(handle.current().phase, ServicePhase::Connected);
    }
}
