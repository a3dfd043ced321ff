use crate::domain::ports::ConnectionServiceRef;
use crate::domain::service::{ServiceHandle, ServiceOptions};
use crate::error::{BridgeError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Builds a connection service bound to a context (normally the `Terminal`).
///
/// The factory runs without the lifecycle lock held, so it may query or
/// call back into the lifecycle. A nested `start` is rejected.
pub type ServiceFactory<C> = Box<dyn Fn(C, ServiceOptions) -> ConnectionServiceRef + Send + Sync>;

type StopOutcome = std::result::Result<(), String>;

enum Slot {
    Empty,
    Starting,
    Running(ConnectionServiceRef),
    Stopping(ConnectionServiceRef, watch::Receiver<Option<StopOutcome>>),
}

enum StopRole {
    Idle,
    Lead(ConnectionServiceRef, watch::Sender<Option<StopOutcome>>),
    Follow(watch::Receiver<Option<StopOutcome>>),
}

/// Puts the slot back to `to` if dropped before `commit`.
struct Rollback<'a> {
    slot: &'a Mutex<Slot>,
    to: Option<Slot>,
}

impl<'a> Rollback<'a> {
    fn new(slot: &'a Mutex<Slot>, to: Slot) -> Self {
        Self { slot, to: Some(to) }
    }

    fn commit(mut self) {
        self.to = None;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if let Some(to) = self.to.take() {
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }
}

/// Guards the single connection service a context may run.
///
/// The slot is the only record of whether a service is running. It is
/// reserved before the factory runs and cleared only after the instance has
/// finished stopping, so a concurrent `start` is rejected instead of racing a
/// half-built or half-stopped service. Concurrent `stop` calls share one
/// call to the instance's `stop`. The lock is never held across an await or
/// while the factory runs.
pub struct ServiceLifecycle<C> {
    factory: ServiceFactory<C>,
    current: Mutex<Slot>,
}

impl<C> ServiceLifecycle<C> {
    pub fn new(factory: ServiceFactory<C>) -> Self {
        Self {
            factory,
            current: Mutex::new(Slot::Empty),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        !matches!(*self.slot(), Slot::Empty)
    }

    /// Creates, starts and stores a service, returning its handle at once.
    ///
    /// Fails with [`BridgeError::ServiceAlreadyRunning`] without calling the
    /// factory if a service is starting, running or stopping.
    pub fn start(&self, context: C, options: impl Into<ServiceOptions>) -> Result<ServiceHandle> {
        let options = options.into();
        {
            let mut slot = self.slot();
            if !matches!(*slot, Slot::Empty) {
                tracing::warn!(policy = %options.policy, "refusing to start a second connection service");
                return Err(BridgeError::ServiceAlreadyRunning);
            }
            *slot = Slot::Starting;
        }
        let reservation = Rollback::new(&self.current, Slot::Empty);

        tracing::info!(policy = %options.policy, "starting connection service");
        let service = (self.factory)(context, options);
        service.start();
        let handle = service.handle();

        *self.slot() = Slot::Running(service);
        reservation.commit();
        Ok(handle)
    }

    /// Stops the stored service, if any, and clears it once stopped.
    ///
    /// With no service running this is a no-op. A call made while another
    /// stop is in flight waits for that stop and shares its outcome. If the
    /// instance's stop fails, it stays stored and the error is returned.
    pub async fn stop(&self) -> Result<()> {
        let role = {
            let mut slot = self.slot();
            let role = match &*slot {
                Slot::Empty | Slot::Starting => StopRole::Idle,
                Slot::Stopping(_, outcome) => StopRole::Follow(outcome.clone()),
                Slot::Running(service) => {
                    let (sender, _) = watch::channel(None);
                    StopRole::Lead(Arc::clone(service), sender)
                }
            };
            if let StopRole::Lead(service, sender) = &role {
                *slot = Slot::Stopping(Arc::clone(service), sender.subscribe());
            }
            role
        };

        match role {
            StopRole::Idle => Ok(()),
            StopRole::Lead(service, sender) => self.lead_stop(service, sender).await,
            StopRole::Follow(mut outcome) => {
                tracing::debug!("waiting for the connection service stop already in progress");
                let outcome = outcome.wait_for(Option::is_some).await.map(|done| done.clone());
                match outcome {
                    Ok(Some(Ok(()))) => Ok(()),
                    Ok(Some(Err(message))) => Err(BridgeError::Subsystem(message)),
                    Ok(None) | Err(_) => Err(BridgeError::Subsystem(
                        "connection service stop was abandoned".to_string(),
                    )),
                }
            }
        }
    }

    async fn lead_stop(
        &self,
        service: ConnectionServiceRef,
        outcome: watch::Sender<Option<StopOutcome>>,
    ) -> Result<()> {
        let rollback = Rollback::new(&self.current, Slot::Running(Arc::clone(&service)));

        tracing::info!("stopping connection service");
        let result = service.stop().await;

        *self.slot() = match &result {
            Ok(()) => Slot::Empty,
            Err(_) => Slot::Running(Arc::clone(&service)),
        };
        rollback.commit();
        outcome.send_replace(Some(result.as_ref().map(|_| ()).map_err(ToString::to_string)));

        match &result {
            Ok(()) => tracing::debug!("connection service stopped"),
            Err(err) => tracing::warn!(error = %err, "connection service failed to stop"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ConnectionService;
    use crate::domain::service::{ConnectionPolicy, ServiceState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, watch};

    #[derive(Default)]
    struct Counters {
        built: AtomicUsize,
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    struct FakeService {
        counters: Arc<Counters>,
        release: Option<Arc<Notify>>,
        state: watch::Sender<ServiceState>,
    }

    #[async_trait]
    impl ConnectionService for FakeService {
        fn start(&self) {
            self.counters.started.fetch_add(1, Ordering::SeqCst);
        }

        async fn stop(&self) -> Result<()> {
            if let Some(release) = &self.release {
                release.notified().await;
            }
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn handle(&self) -> ServiceHandle {
            ServiceHandle::new(self.state.subscribe())
        }
    }

    fn lifecycle(counters: Arc<Counters>, release: Option<Arc<Notify>>) -> ServiceLifecycle<()> {
        ServiceLifecycle::new(Box::new(move |_: (), options: ServiceOptions| {
            counters.built.fetch_add(1, Ordering::SeqCst);
            let (state, _) = watch::channel(ServiceState::idle(options.policy));
            Arc::new(FakeService {
                counters: Arc::clone(&counters),
                release: release.clone(),
                state,
            }) as ConnectionServiceRef
        }))
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_without_building() {
        let counters = Arc::new(Counters::default());
        let services = lifecycle(Arc::clone(&counters), None);

        let handle = services.start((), ConnectionPolicy::Auto).unwrap();
        assert_eq!(handle.current().policy, ConnectionPolicy::Auto);

        let second = services.start((), ConnectionPolicy::Manual);
        assert!(matches!(second, Err(BridgeError::ServiceAlreadyRunning)));
        assert_eq!(counters.built.load(Ordering::SeqCst), 1);
        assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_without_service_is_noop() {
        let counters = Arc::new(Counters::default());
        let services = lifecycle(Arc::clone(&counters), None);

        services.stop().await.unwrap();
        services.stop().await.unwrap();
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let counters = Arc::new(Counters::default());
        let services = lifecycle(Arc::clone(&counters), None);

        services.start((), ConnectionPolicy::Persist).unwrap();
        services.stop().await.unwrap();
        assert!(!services.is_running());

        services.start((), ConnectionPolicy::Persist).unwrap();
        assert_eq!(counters.built.load(Ordering::SeqCst), 2);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_rejected_while_stop_in_progress() {
        let counters = Arc::new(Counters::default());
        let release = Arc::new(Notify::new());
        let services = Arc::new(lifecycle(Arc::clone(&counters), Some(Arc::clone(&release))));

        services.start((), ConnectionPolicy::Auto).unwrap();

        let stopping = tokio::spawn({
            let services = Arc::clone(&services);
            async move { services.stop().await }
        });
        tokio::task::yield_now().await;

        assert!(matches!(
            services.start((), ConnectionPolicy::Auto),
            Err(BridgeError::ServiceAlreadyRunning)
        ));

        release.notify_one();
        stopping.await.unwrap().unwrap();
        assert!(!services.is_running());
        services.start((), ConnectionPolicy::Auto).unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_stops_share_one_stop() {
        let counters = Arc::new(Counters::default());
        let release = Arc::new(Notify::new());
        let services = Arc::new(lifecycle(Arc::clone(&counters), Some(Arc::clone(&release))));

        services.start((), ConnectionPolicy::Auto).unwrap();

        let first = tokio::spawn({
            let services = Arc::clone(&services);
            async move { services.stop().await }
        });
        let second = tokio::spawn({
            let services = Arc::clone(&services);
            async move { services.stop().await }
        });
        tokio::task::yield_now().await;
        assert!(services.is_running());

        release.notify_one();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
        assert!(!services.is_running());
    }
}
