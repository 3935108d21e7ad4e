//! Timer and connectivity capability.
//!
//! The engine never touches ambient timers or connectivity state directly. A
//! [`Scheduler`] is injected instead, so hosts decide where tasks run and
//! tests drive time and connectivity explicitly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// A unit of deferred work.
pub type Task = BoxFuture<'static, ()>;

/// Invoked on every offline to online transition.
pub type RestoredCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` after `delay` unless the returned token is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> CancelToken;

    /// Register `callback` for connectivity-restored transitions.
    fn on_connectivity_restored(&self, callback: RestoredCallback) -> Unsubscribe;

    fn is_online(&self) -> bool;
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

/// Handle to a scheduled task.
///
/// Cancelling only succeeds while the task is still waiting. Once it has
/// started it runs to completion, so a write in flight is never torn.
/// Dropping the token does not cancel the task.
#[derive(Debug)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
    abort: Option<AbortHandle>,
}

impl CancelToken {
    /// Gate `task` behind a new token.
    ///
    /// Scheduler implementations run the returned task in place of the
    /// original; it does nothing if the token was cancelled first.
    pub fn wrap(task: Task) -> (Self, Task) {
        let state = Arc::new(AtomicU8::new(PENDING));
        let gate = state.clone();
        let gated: Task = Box::pin(async move {
            if gate
                .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                task.await;
                gate.store(FINISHED, Ordering::Release);
            }
        });
        (Self { state, abort: None }, gated)
    }

    /// Abort the underlying runtime task when cancelled.
    pub fn with_abort(mut self, handle: AbortHandle) -> Self {
        self.abort = Some(handle);
        self
    }

    /// Returns true if the task will now never run.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            if let Some(abort) = &self.abort {
                abort.abort();
            }
        }
        cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

/// Removes a connectivity listener when consumed or dropped.
pub struct Unsubscribe {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    pub fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// For schedulers without connectivity events.
    pub fn noop() -> Self {
        Self { remove: None }
    }

    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// Snapshot of the host's connectivity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkState {
    pub online: bool,
    /// Bumped on every offline to online transition. Watchers compare
    /// generations, so a flap they never observed still counts.
    pub restored: u64,
}

/// Host-controlled online/offline state.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<LinkState>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(LinkState {
            online,
            restored: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if current.online == online {
                return false;
            }
            current.online = online;
            if online {
                current.restored += 1;
            }
            true
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    pub fn state(&self) -> LinkState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// [`Scheduler`] backed by a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
    connectivity: Connectivity,
}

impl TokioScheduler {
    pub fn new(handle: Handle, connectivity: Connectivity) -> Self {
        Self {
            handle,
            connectivity,
        }
    }

    /// Use the runtime this is called from.
    pub fn try_current(
        connectivity: Connectivity,
    ) -> Result<Self, tokio::runtime::TryCurrentError> {
        Ok(Self::new(Handle::try_current()?, connectivity))
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> CancelToken {
        let (token, task) = CancelToken::wrap(task);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        token.with_abort(join.abort_handle())
    }

    fn on_connectivity_restored(&self, callback: RestoredCallback) -> Unsubscribe {
        let mut rx = self.connectivity.subscribe();
        let mut seen = rx.borrow_and_update().restored;
        let join = self.handle.spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                // Changes made between polls collapse into one value, so
                // compare generations rather than the last observed flag.
                if state.online && state.restored != seen {
                    seen = state.restored;
                    callback().await;
                }
            }
        });
        Unsubscribe::new(move || join.abort())
    }

    fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_after_delay() {
        let scheduler = TokioScheduler::try_current(Connectivity::default()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let token = scheduler.schedule(Duration::from_secs(1), counting_task(&counter));
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(token.is_pending());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!token.is_pending());
        assert!(!token.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_runs() {
        let scheduler = TokioScheduler::try_current(Connectivity::default()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let token = scheduler.schedule(Duration::from_secs(1), counting_task(&counter));
        assert!(token.cancel());
        assert!(token.is_cancelled());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrapped_task_checks_gate() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (token, task) = CancelToken::wrap(counting_task(&counter));
        token.cancel();
        task.await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let (token, task) = CancelToken::wrap(counting_task(&counter));
        task.await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!token.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_fires_on_each_reconnect() {
        let connectivity = Connectivity::new(false);
        let scheduler = TokioScheduler::try_current(connectivity.clone()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let _listener = scheduler.on_connectivity_restored(Arc::new(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }));
        tokio::task::yield_now().await;

        connectivity.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Setting the same state again is not a transition.
        connectivity.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        connectivity.set_online(false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        connectivity.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_flap_still_counts_as_restored() {
        let connectivity = Connectivity::new(true);
        let scheduler = TokioScheduler::try_current(connectivity.clone()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let _listener = scheduler.on_connectivity_restored(Arc::new(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }));

        // No yield in between: the watcher only ever sees `online == true`.
        connectivity.set_online(false);
        connectivity.set_online(true);
        assert_eq!(connectivity.state().restored, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_ending_offline_does_not_fire() {
        let connectivity = Connectivity::new(false);
        let scheduler = TokioScheduler::try_current(connectivity.clone()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let _listener = scheduler.on_connectivity_restored(Arc::new(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }));

        connectivity.set_online(true);
        connectivity.set_online(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // The missed restore is picked up by the next one.
        connectivity.set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_callbacks() {
        let connectivity = Connectivity::new(false);
        let scheduler = TokioScheduler::try_current(connectivity.clone()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let listener = scheduler.on_connectivity_restored(Arc::new(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }));
        tokio::task::yield_now().await;
        listener.unsubscribe();

        connectivity.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
