//! Lazily shared state with a stop grace period.
//!
//! A [`SharedState`] mirrors an upstream `watch` channel only while somebody
//! observes it. The last observer going away schedules a stop; an observer
//! arriving before the grace period ends keeps the same forwarding task alive,
//! so quick observer churn never restarts the upstream subscription.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

pub struct SharedState<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SharedState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T> {
    source: watch::Receiver<T>,
    mirror: watch::Sender<T>,
    grace: Duration,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    observers: usize,
    forwarder: Option<CancellationToken>,
    /// Bumped on every observe/release; a scheduled stop only fires if unchanged.
    epoch: u64,
}

impl<T: Clone + Send + Sync + 'static> SharedState<T> {
    pub fn new(source: watch::Receiver<T>, grace: Duration) -> Self {
        let initial = source.borrow().clone();
        Self {
            inner: Arc::new(Inner {
                source,
                mirror: watch::Sender::new(initial),
                grace,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    pub fn with_default_grace(source: watch::Receiver<T>) -> Self {
        Self::new(source, DEFAULT_GRACE)
    }

    /// Register an observer, starting the upstream forwarding if needed.
    /// Must be called from within a tokio runtime.
    pub fn observe(&self) -> Observer<T> {
        let mut control = self.inner.lock();
        control.observers += 1;
        control.epoch += 1;

        if control.forwarder.is_none() {
            let token = CancellationToken::new();
            control.forwarder = Some(token.clone());
            tokio::spawn(forward(self.inner.clone(), token));
            trace!("Shared state forwarding started");
        }

        Observer {
            inner: self.inner.clone(),
            rx: self.inner.mirror.subscribe(),
        }
    }

    /// Last mirrored value, whether or not anyone observes.
    pub fn current(&self) -> T {
        self.inner.mirror.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().forwarder.is_some()
    }
}

async fn forward<T: Clone + Send + Sync + 'static>(inner: Arc<Inner<T>>, token: CancellationToken) {
    let mut source = inner.source.clone();
    let value = source.borrow_and_update().clone();
    inner.mirror.send_replace(value);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = source.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = source.borrow_and_update().clone();
                inner.mirror.send_replace(value);
            }
        }
    }
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + Sync + 'static> Inner<T> {
    fn release(self: &Arc<Self>) {
        let epoch = {
            let mut control = self.lock();
            control.observers = control.observers.saturating_sub(1);
            control.epoch += 1;
            if control.observers > 0 {
                return;
            }
            control.epoch
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.stop_if_idle(epoch);
            return;
        };

        let inner = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(inner.grace).await;
            inner.stop_if_idle(epoch);
        });
    }

    fn stop_if_idle(&self, epoch: u64) {
        let mut control = self.lock();
        if control.observers == 0 && control.epoch == epoch {
            if let Some(token) = control.forwarder.take() {
                token.cancel();
                trace!("Shared state forwarding stopped");
            }
        }
    }
}

/// A live observation. Dropping the last one schedules the upstream stop.
pub struct Observer<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
    rx: watch::Receiver<T>,
}

impl<T: Clone + Send + Sync + 'static> Observer<T> {
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next mirrored value and return it.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl<T: Send + Sync + 'static> Drop for Observer<T> {
    fn drop(&mut self) {
        self.inner.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn mirrors_while_observed() {
        let (tx, rx) = watch::channel(0);
        let shared = SharedState::new(rx, DEFAULT_GRACE);
        assert!(!shared.is_active());

        let mut observer = shared.observe();
        assert!(shared.is_active());

        tx.send_replace(1);
        assert_eq!(observer.changed().await, Some(1));
        assert_eq!(observer.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quick_churn_keeps_forwarding() {
        let (tx, rx) = watch::channel(0);
        let shared = SharedState::new(rx, Duration::from_secs(5));

        drop(shared.observe());
        sleep(Duration::from_secs(3)).await;
        let mut observer = shared.observe();
        sleep(Duration::from_secs(10)).await;

        assert!(shared.is_active());
        tx.send_replace(2);
        assert_eq!(observer.changed().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_grace_and_keeps_last_value() {
        let (tx, rx) = watch::channel(0);
        let shared = SharedState::new(rx, Duration::from_secs(5));

        let mut observer = shared.observe();
        tx.send_replace(7);
        assert_eq!(observer.changed().await, Some(7));
        drop(observer);

        sleep(Duration::from_secs(4)).await;
        assert!(shared.is_active());

        sleep(Duration::from_secs(2)).await;
        assert!(!shared.is_active());

        tx.send_replace(8);
        tokio::task::yield_now().await;
        assert_eq!(shared.current(), 7);

        // a new observer picks the upstream back up
        let observer = shared.observe();
        tokio::task::yield_now().await;
        assert_eq!(observer.get(), 8);
    }
}
