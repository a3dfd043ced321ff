//! Subscription registry for subsystem notifications.
//!
//! Persistent listeners receive every matching notification until removed.
//! One-shot subscriptions receive the next matching notification through a
//! `oneshot` channel and are removed in the same critical section that
//! delivers it, so they can never fire twice.

use crate::domain::event::{EventKind, Notification};
use crate::error::{BridgeError, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

pub type ListenerCallback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

enum Handler {
    Persistent(ListenerCallback),
    Once(oneshot::Sender<Value>),
}

struct Entry {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    // Registration order is delivery order.
    entries: Vec<Entry>,
}

impl Registry {
    fn insert(&mut self, kind: EventKind, handler: Handler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push(Entry { id, kind, handler });
        id
    }
}

/// Shared registry of notification subscriptions.
///
/// Cloning is cheap and every clone observes the same subscriptions; the
/// subsystem implementation holds one clone to emit into, the bridge holds
/// another to subscribe from.
#[derive(Clone, Default)]
pub struct EventChannel {
    registry: Arc<Mutex<Registry>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener that stays active until explicitly removed.
    pub fn subscribe(&self, kind: EventKind, callback: ListenerCallback) -> ListenerHandle {
        let id = self.registry().insert(kind, Handler::Persistent(callback));
        tracing::trace!(event = %kind, ?id, "listener added");
        ListenerHandle {
            id,
            kind,
            channel: self.clone(),
        }
    }

    /// Registers a subscription for the next `kind` notification only.
    ///
    /// The subscription is live when this returns, so a notification emitted
    /// right afterwards (even synchronously) is not missed.
    pub fn once(&self, kind: EventKind) -> PendingCompletion {
        let (sender, receiver) = oneshot::channel();
        let id = {
            let mut registry = self.registry();
            let overlapping = registry
                .entries
                .iter()
                .any(|entry| entry.kind == kind && matches!(entry.handler, Handler::Once(_)));
            if overlapping {
                tracing::warn!(
                    event = %kind,
                    "another request is already waiting on this event; both will receive the next completion"
                );
            }
            registry.insert(kind, Handler::Once(sender))
        };
        PendingCompletion {
            kind,
            receiver,
            guard: SubscriptionGuard {
                id,
                channel: self.clone(),
            },
        }
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let before = registry.entries.len();
        registry.entries.retain(|entry| entry.id != id);
        registry.entries.len() != before
    }

    /// Delivers a notification to every subscription registered for its kind.
    ///
    /// One-shot subscriptions are removed before anything is delivered.
    /// Listener callbacks run outside the registry lock, so they may
    /// subscribe, unsubscribe or emit themselves.
    pub fn emit(&self, notification: Notification) {
        let Notification { kind, payload } = notification;
        let mut callbacks = Vec::new();
        let mut waiters = Vec::new();
        {
            let mut registry = self.registry();
            let mut index = 0;
            while index < registry.entries.len() {
                let entry = &registry.entries[index];
                if entry.kind != kind {
                    index += 1;
                    continue;
                }
                if let Handler::Persistent(callback) = &entry.handler {
                    callbacks.push(Arc::clone(callback));
                    index += 1;
                } else if let Handler::Once(sender) = registry.entries.remove(index).handler {
                    waiters.push(sender);
                }
            }
        }

        tracing::debug!(
            event = %kind,
            listeners = callbacks.len(),
            waiters = waiters.len(),
            "notification"
        );
        if waiters.is_empty() && kind.is_completion() && kind != EventKind::ReadersDiscovered {
            tracing::warn!(event = %kind, "completion arrived with no pending request");
        }

        for sender in waiters {
            // The receiver may have been dropped by a cancelled request.
            let _ = sender.send(payload.clone());
        }
        for callback in callbacks {
            callback(&payload);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry()
            .entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .count()
    }

    /// Drops every subscription. Pending completions resolve with
    /// [`BridgeError::ChannelClosed`].
    pub fn clear(&self) {
        self.registry().entries.clear();
    }
}

/// Returned by [`EventChannel::subscribe`]; call [`remove`](Self::remove) to stop listening.
///
/// Dropping the handle does not remove the listener.
#[derive(Clone)]
pub struct ListenerHandle {
    id: SubscriptionId,
    kind: EventKind,
    channel: EventChannel,
}

impl ListenerHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn remove(&self) -> bool {
        let removed = self.channel.unsubscribe(self.id);
        if removed {
            tracing::trace!(event = %self.kind, id = ?self.id, "listener removed");
        }
        removed
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// RAII guard that removes a one-shot subscription on drop.
/// Covers requests whose future is dropped before the event arrives.
struct SubscriptionGuard {
    id: SubscriptionId,
    channel: EventChannel,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.channel.unsubscribe(self.id);
    }
}

/// A registered one-shot subscription waiting for its notification.
pub struct PendingCompletion {
    kind: EventKind,
    receiver: oneshot::Receiver<Value>,
    guard: SubscriptionGuard,
}

impl PendingCompletion {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn id(&self) -> SubscriptionId {
        self.guard.id
    }

    /// Waits with no deadline for the notification payload.
    pub async fn wait(self) -> Result<Value> {
        let Self {
            kind,
            receiver,
            guard,
        } = self;
        let result = receiver.await.map_err(|_| BridgeError::ChannelClosed(kind));
        drop(guard);
        result
    }

    /// Waits at most `after`; on expiry the subscription is removed.
    pub async fn wait_timeout(self, after: Duration) -> Result<Value> {
        let kind = self.kind;
        match tokio::time::timeout(after, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout { event: kind, after }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_once_receives_next_notification_and_is_removed() {
        let channel = EventChannel::new();
        let pending = channel.once(EventKind::ConnectedReader);
        assert_eq!(channel.listener_count(EventKind::ConnectedReader), 1);

        channel.emit(Notification::new(
            EventKind::ConnectedReader,
            json!({"serialNumber": "SIM-1"}),
        ));
        assert_eq!(channel.listener_count(EventKind::ConnectedReader), 0);

        let payload = pending.wait().await.unwrap();
        assert_eq!(payload["serialNumber"], "SIM-1");
    }

    #[tokio::test]
    async fn test_other_kinds_are_not_delivered() {
        let channel = EventChannel::new();
        let pending = channel.once(EventKind::PaymentStatus);

        channel.emit(Notification::new(EventKind::ConnectionStatus, json!(2)));
        assert_eq!(channel.listener_count(EventKind::PaymentStatus), 1);

        channel.emit(Notification::new(EventKind::PaymentStatus, json!(1)));
        assert_eq!(pending.wait().await.unwrap(), json!(1));
    }

    #[test]
    fn test_persistent_listener_until_removed() {
        let channel = EventChannel::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = channel.subscribe(
            EventKind::Log,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        channel.emit(Notification::empty(EventKind::Log));
        channel.emit(Notification::empty(EventKind::Log));
        assert!(handle.remove());
        assert!(!handle.remove());
        channel.emit(Notification::empty(EventKind::Log));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropping_pending_unsubscribes() {
        let channel = EventChannel::new();
        let pending = channel.once(EventKind::PaymentProcess);
        assert_eq!(channel.listener_count(EventKind::PaymentProcess), 1);
        drop(pending);
        assert_eq!(channel.listener_count(EventKind::PaymentProcess), 0);
    }

    #[tokio::test]
    async fn test_same_event_waiters_all_receive_first_delivery() {
        let channel = EventChannel::new();
        let first = channel.once(EventKind::ConnectionStatus);
        let second = channel.once(EventKind::ConnectionStatus);

        channel.emit(Notification::new(EventKind::ConnectionStatus, json!(2)));
        channel.emit(Notification::new(EventKind::ConnectionStatus, json!(0)));

        assert_eq!(first.wait().await.unwrap(), json!(2));
        assert_eq!(second.wait().await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_listener_may_emit_reentrantly() {
        let channel = EventChannel::new();
        let pending = channel.once(EventKind::ReaderConnection);
        let inner = channel.clone();
        channel.subscribe(
            EventKind::RequestConnectionToken,
            Arc::new(move |_| {
                inner.emit(Notification::new(
                    EventKind::ReaderConnection,
                    json!({"serialNumber": "SIM-2"}),
                ));
            }),
        );

        channel.emit(Notification::empty(EventKind::RequestConnectionToken));
        assert_eq!(pending.wait().await.unwrap()["serialNumber"], "SIM-2");
    }

    #[tokio::test]
    async fn test_wait_timeout_removes_subscription() {
        let channel = EventChannel::new();
        let pending = channel.once(EventKind::UpdateInstall);

        let result = pending.wait_timeout(Duration::from_millis(10)).await;
        assert!(matches!(
            result,
            Err(BridgeError::Timeout {
                event: EventKind::UpdateInstall,
                ..
            })
        ));
        assert_eq!(channel.listener_count(EventKind::UpdateInstall), 0);
    }

    #[tokio::test]
    async fn test_clear_closes_pending() {
        let channel = EventChannel::new();
        let pending = channel.once(EventKind::PaymentCreation);
        channel.clear();
        assert!(matches!(
            pending.wait().await,
            Err(BridgeError::ChannelClosed(EventKind::PaymentCreation))
        ));
    }
}
