use super::event_channel::EventChannel;
use crate::domain::event::{EventKind, Notification};
use crate::error::{CommandError, Result};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Turns "run a command, then wait for its completion event" into one
/// awaitable result.
///
/// The bridge neither retries nor times out on its own. Concurrent requests
/// on the same event are not told apart: the subsystem carries no
/// correlation id, so the next completion answers all of them.
#[derive(Clone)]
pub struct RequestBridge {
    events: EventChannel,
}

impl RequestBridge {
    pub fn new(events: EventChannel) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Subscribes to `event`, runs `side_effect`, and settles on the first
    /// matching notification.
    ///
    /// Resolves with the payload, or with `payload[result_key]` (`null` when
    /// absent) if a key is given. A payload carrying a truthy `error` field
    /// rejects with [`CommandError`] holding the payload verbatim.
    pub async fn invoke<F, Fut>(
        &self,
        event: EventKind,
        side_effect: F,
        result_key: Option<&str>,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.invoke_within(event, side_effect, result_key, None).await
    }

    /// Like [`invoke`](Self::invoke), giving up after `timeout` if one is set.
    pub async fn invoke_within<F, Fut>(
        &self,
        event: EventKind,
        side_effect: F,
        result_key: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        // Subscribe first: the side effect may complete before it returns.
        let pending = self.events.once(event);
        tracing::debug!(event = %event, "awaiting completion");

        if let Err(err) = side_effect().await {
            tracing::warn!(event = %event, error = %err, "command could not be issued");
            return Err(err);
        }

        let payload = match timeout {
            Some(after) => pending.wait_timeout(after).await?,
            None => pending.wait().await?,
        };
        settle(event, payload, result_key)
    }
}

fn settle(event: EventKind, payload: Value, result_key: Option<&str>) -> Result<Value> {
    let notification = Notification::new(event, payload);
    if notification.error_field().is_some() {
        tracing::debug!(event = %event, "completion carried an error");
        return Err(CommandError::new(event, notification.payload).into());
    }

    let Notification { payload, .. } = notification;
    Ok(match result_key {
        Some(key) => match payload {
            Value::Object(mut fields) => fields.remove(key).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        None => payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_resolves_with_full_payload() {
        let events = EventChannel::new();
        let bridge = RequestBridge::new(events.clone());
        let emitter = events.clone();

        let result = bridge
            .invoke(
                EventKind::ReaderConnection,
                || async move {
                    emitter.emit(Notification::new(
                        EventKind::ReaderConnection,
                        json!({"serialNumber": "SIM-1"}),
                    ));
                    Ok(())
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"serialNumber": "SIM-1"}));
        assert_eq!(events.listener_count(EventKind::ReaderConnection), 0);
    }

    #[tokio::test]
    async fn test_resolves_with_selected_key() {
        let events = EventChannel::new();
        let bridge = RequestBridge::new(events.clone());
        let emitter = events.clone();

        let result = bridge
            .invoke(
                EventKind::PaymentProcess,
                || async move {
                    emitter.emit(Notification::new(
                        EventKind::PaymentProcess,
                        json!({"intent": {"stripeId": "pi_1"}, "extra": true}),
                    ));
                    Ok(())
                },
                Some("intent"),
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"stripeId": "pi_1"}));
    }

    #[tokio::test]
    async fn test_missing_key_resolves_null() {
        let events = EventChannel::new();
        let bridge = RequestBridge::new(events.clone());
        let emitter = events.clone();

        let result = bridge
            .invoke(
                EventKind::UpdateCheck,
                || async move {
                    emitter.emit(Notification::empty(EventKind::UpdateCheck));
                    Ok(())
                },
                Some("update"),
            )
            .await
            .unwrap();

        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_error_payload_rejects_verbatim() {
        let events = EventChannel::new();
        let bridge = RequestBridge::new(events.clone());
        let emitter = events.clone();
        let payload = json!({"error": "Card declined", "code": 4, "declineCode": "generic"});
        let delivered = payload.clone();

        let result = bridge
            .invoke(
                EventKind::PaymentProcess,
                || async move {
                    emitter.emit(Notification::new(EventKind::PaymentProcess, delivered));
                    Ok(())
                },
                Some("intent"),
            )
            .await;

        match result {
            Err(BridgeError::Command(err)) => {
                assert_eq!(err.payload(), &payload);
                assert_eq!(err.event(), EventKind::PaymentProcess);
            }
            other => panic!("expected command error, got {other:?}"),
        }
        assert_eq!(events.listener_count(EventKind::PaymentProcess), 0);
    }

    #[tokio::test]
    async fn test_failed_side_effect_unsubscribes() {
        let events = EventChannel::new();
        let bridge = RequestBridge::new(events.clone());

        let result = bridge
            .invoke(
                EventKind::ConnectedReader,
                || async { Err(BridgeError::Subsystem("pipe closed".to_string())) },
                None,
            )
            .await;

        assert!(matches!(result, Err(BridgeError::Subsystem(_))));
        assert_eq!(events.listener_count(EventKind::ConnectedReader), 0);
    }

    #[tokio::test]
    async fn test_subscription_registered_before_side_effect() {
        let events = EventChannel::new();
        let bridge = RequestBridge::new(events.clone());
        let observer = events.clone();
        let saw_subscription = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_subscription);

        let _ = bridge
            .invoke(
                EventKind::PaymentStatus,
                || async move {
                    flag.store(
                        observer.listener_count(EventKind::PaymentStatus) == 1,
                        Ordering::SeqCst,
                    );
                    observer.emit(Notification::new(EventKind::PaymentStatus, json!(1)));
                    Ok(())
                },
                None,
            )
            .await;

        assert!(saw_subscription.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeout_is_opt_in() {
        let events = EventChannel::new();
        let bridge = RequestBridge::new(events.clone());

        let result = bridge
            .invoke_within(
                EventKind::UpdateInstall,
                || async { Ok(()) },
                None,
                Some(Duration::from_millis(20)),
            )
            .await;

        assert!(matches!(result, Err(BridgeError::Timeout { .. })));
        assert_eq!(events.listener_count(EventKind::UpdateInstall), 0);
    }
}
