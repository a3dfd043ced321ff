use super::event_channel::{EventChannel, ListenerHandle};
use crate::domain::command::Command;
use crate::domain::event::EventKind;
use crate::domain::ports::{ConnectionTokenProvider, ProviderError, SubsystemRef, TokenProviderRef};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Handle;

pub const UNINITIALIZED_MESSAGE: &str = "You must initialize TerminalBridge first.";
pub const EMPTY_TOKEN_MESSAGE: &str =
    "User-supplied `fetch_connection_token` resolved successfully, but no token was returned.";
pub const PROVIDER_FALLBACK_MESSAGE: &str = "Error in user-supplied `fetch_connection_token`.";

/// Provider in place until the host calls `initialize`.
struct Uninitialized;

#[async_trait]
impl ConnectionTokenProvider for Uninitialized {
    async fn fetch_connection_token(&self) -> Result<String, ProviderError> {
        Err(UNINITIALIZED_MESSAGE.into())
    }
}

/// Answers the subsystem's `requestConnectionToken` challenges.
///
/// Each challenge queries the current provider exactly once and replies with
/// `setConnectionToken`. Provider failures are translated into the reply and
/// never reach the host. Tokens are not cached.
pub struct TokenNegotiator {
    provider: Arc<RwLock<TokenProviderRef>>,
    listener: ListenerHandle,
}

impl TokenNegotiator {
    /// Installs the challenge listener on `events`.
    ///
    /// Challenges are answered on the runtime current at install time, so the
    /// subsystem may emit them from threads outside any runtime. Without one
    /// at install, the runtime current when the challenge fires is used.
    pub fn install(events: &EventChannel, subsystem: SubsystemRef) -> Self {
        let provider: Arc<RwLock<TokenProviderRef>> = Arc::new(RwLock::new(Arc::new(Uninitialized)));
        let slot = Arc::clone(&provider);
        let installed_on = Handle::try_current().ok();
        if installed_on.is_none() {
            tracing::debug!("token negotiator installed outside a tokio runtime");
        }
        let listener = events.subscribe(
            EventKind::RequestConnectionToken,
            Arc::new(move |_| {
                let provider = current(&slot);
                let subsystem = Arc::clone(&subsystem);
                match installed_on.clone().or_else(|| Handle::try_current().ok()) {
                    Some(runtime) => {
                        runtime.spawn(answer_challenge(provider, subsystem));
                    }
                    None => {
                        tracing::error!("token challenge received with no tokio runtime to answer it on");
                    }
                }
            }),
        );
        Self { provider, listener }
    }

    pub fn set_provider(&self, provider: TokenProviderRef) {
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = provider;
    }

    /// Stops answering challenges.
    pub fn uninstall(&self) -> bool {
        self.listener.remove()
    }
}

fn current(slot: &RwLock<TokenProviderRef>) -> TokenProviderRef {
    Arc::clone(&slot.read().unwrap_or_else(PoisonError::into_inner))
}

/// The reply for one challenge, as `(token, error_message)`.
pub async fn negotiate(provider: &dyn ConnectionTokenProvider) -> (Option<String>, Option<String>) {
    match provider.fetch_connection_token().await {
        Ok(token) if !token.is_empty() => (Some(token), None),
        Ok(_) => (None, Some(EMPTY_TOKEN_MESSAGE.to_string())),
        Err(err) => {
            let message = err.to_string();
            if message.is_empty() {
                (None, Some(PROVIDER_FALLBACK_MESSAGE.to_string()))
            } else {
                (None, Some(message))
            }
        }
    }
}

/// Runs one challenge to completion: fetch, then reply.
pub async fn answer_challenge(provider: TokenProviderRef, subsystem: SubsystemRef) {
    let (token, error_message) = negotiate(provider.as_ref()).await;
    match &error_message {
        None => tracing::debug!("replying to token challenge with a token"),
        Some(message) => tracing::warn!(error = %message, "token provider failed"),
    }

    let reply = Command::SetConnectionToken {
        token,
        error_message,
    };
    if let Err(err) = subsystem.send(reply).await {
        tracing::error!(error = %err, "could not deliver connection token reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::Notification;
    use crate::domain::ports::Subsystem;
    use crate::error::Result;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct ReplyRecorder {
        replies: mpsc::UnboundedSender<Command>,
    }

    #[async_trait]
    impl Subsystem for ReplyRecorder {
        async fn send(&self, command: Command) -> Result<()> {
            let _ = self.replies.send(command);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Silent;

    impl fmt::Display for Silent {
        fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
            Ok(())
        }
    }

    impl std::error::Error for Silent {}

    fn reply(token: Option<&str>, error: Option<&str>) -> Command {
        Command::SetConnectionToken {
            token: token.map(str::to_string),
            error_message: error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_negotiate_outcomes() {
        let ok = || async { Ok::<_, ProviderError>("tok_123".to_string()) };
        assert_eq!(negotiate(&ok).await, (Some("tok_123".to_string()), None));

        let empty = || async { Ok::<_, ProviderError>(String::new()) };
        assert_eq!(
            negotiate(&empty).await,
            (None, Some(EMPTY_TOKEN_MESSAGE.to_string()))
        );

        let boom = || async { Err::<String, ProviderError>("boom".into()) };
        assert_eq!(negotiate(&boom).await, (None, Some("boom".to_string())));

        let silent = || async { Err::<String, ProviderError>(Box::new(Silent)) };
        assert_eq!(
            negotiate(&silent).await,
            (None, Some(PROVIDER_FALLBACK_MESSAGE.to_string()))
        );
    }

    #[tokio::test]
    async fn test_challenge_before_initialize_is_refused() {
        let events = EventChannel::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _negotiator = TokenNegotiator::install(&events, Arc::new(ReplyRecorder { replies: tx }));

        events.emit(Notification::empty(EventKind::RequestConnectionToken));

        assert_eq!(rx.recv().await.unwrap(), reply(None, Some(UNINITIALIZED_MESSAGE)));
    }

    #[tokio::test]
    async fn test_each_challenge_fetches_fresh_token() {
        let events = EventChannel::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let negotiator = TokenNegotiator::install(&events, Arc::new(ReplyRecorder { replies: tx }));

        let issued = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&issued);
        negotiator.set_provider(Arc::new(move || {
            let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, ProviderError>(format!("tok_{count}")) }
        }));

        events.emit(Notification::empty(EventKind::RequestConnectionToken));
        assert_eq!(rx.recv().await.unwrap(), reply(Some("tok_1"), None));
        events.emit(Notification::empty(EventKind::RequestConnectionToken));
        assert_eq!(rx.recv().await.unwrap(), reply(Some("tok_2"), None));
        assert_eq!(issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_uninstall_stops_answering() {
        let events = EventChannel::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let negotiator = TokenNegotiator::install(&events, Arc::new(ReplyRecorder { replies: tx }));

        assert_eq!(events.listener_count(EventKind::RequestConnectionToken), 1);
        assert!(negotiator.uninstall());
        assert_eq!(events.listener_count(EventKind::RequestConnectionToken), 0);
    }

    #[tokio::test]
    async fn test_challenge_from_foreign_thread_is_answered() {
        let events = EventChannel::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let negotiator = TokenNegotiator::install(&events, Arc::new(ReplyRecorder { replies: tx }));
        negotiator.set_provider(Arc::new(|| async { Ok::<_, ProviderError>("tok_thread".to_string()) }));

        let emitter = events.clone();
        std::thread::spawn(move || {
            emitter.emit(Notification::empty(EventKind::RequestConnectionToken));
        })
        .join()
        .unwrap();

        assert_eq!(rx.recv().await.unwrap(), reply(Some("tok_thread"), None));
    }
}
