use super::command::Command;
use super::service::ServiceHandle;
use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// The external terminal SDK.
///
/// Commands are fire-and-forget; results come back later as notifications on
/// the [`EventChannel`](crate::application::event_channel::EventChannel) the
/// implementation was built with.
#[async_trait]
pub trait Subsystem: Send + Sync {
    async fn send(&self, command: Command) -> Result<()>;
}

pub type SubsystemRef = Arc<dyn Subsystem>;

pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Host-supplied source of connection tokens, queried once per challenge.
#[async_trait]
pub trait ConnectionTokenProvider: Send + Sync {
    async fn fetch_connection_token(&self) -> std::result::Result<String, ProviderError>;
}

pub type TokenProviderRef = Arc<dyn ConnectionTokenProvider>;

#[async_trait]
impl<F, Fut> ConnectionTokenProvider for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<String, ProviderError>> + Send + 'static,
{
    async fn fetch_connection_token(&self) -> std::result::Result<String, ProviderError> {
        self().await
    }
}

/// A long-running process that manages reader connectivity.
#[async_trait]
pub trait ConnectionService: Send + Sync {
    /// Begins work in the background and returns immediately.
    fn start(&self);
    async fn stop(&self) -> Result<()>;
    fn handle(&self) -> ServiceHandle;
}

pub type ConnectionServiceRef = Arc<dyn ConnectionService>;
