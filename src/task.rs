// Scoped cancellation of background work

use tokio::task::{AbortHandle, JoinHandle};

/// Something that can stop a unit of asynchronous work
///
/// `cancel` must be idempotent.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

impl Cancellable for AbortHandle {
    fn cancel(&self) {
        self.abort();
    }
}

/// Owns a cancellation handle and fires it when dropped
///
/// Cancellation runs on every exit path of the owner: explicit `cancel`,
/// normal drop, early return or unwinding.
pub struct CancellationScope<C: Cancellable> {
    handle: C,
}

impl<C: Cancellable> CancellationScope<C> {
    pub fn new(handle: C) -> Self {
        Self { handle }
    }

    /// Cancel now; the scope still cancels again on drop, which is a no-op
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<C: Cancellable> Drop for CancellationScope<C> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Tokio task that is aborted once this value goes away
pub type AutoCancellingTask = CancellationScope<AbortHandle>;

impl AutoCancellingTask {
    /// Take ownership of a spawned task; detaches the join handle
    pub fn from_join_handle<T>(handle: JoinHandle<T>) -> Self {
        CancellationScope::new(handle.abort_handle())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingHandle(Arc<AtomicUsize>);

    impl Cancellable for CountingHandle {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _scope = CancellationScope::new(CountingHandle(count.clone()));
            assert_eq!(count.load(Ordering::SeqCst), 0);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_on_early_return() {
        fn bail_early(count: Arc<AtomicUsize>, fail: bool) -> Result<(), &'static str> {
            let _scope = CancellationScope::new(CountingHandle(count));
            if fail {
                return Err("gave up");
            }
            Ok(())
        }

        let count = Arc::new(AtomicUsize::new(0));
        assert!(bail_early(count.clone(), true).is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(bail_early(count.clone(), false).is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropping_task_scope_aborts_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = tx.send(());
        });

        let scope = AutoCancellingTask::from_join_handle(handle);
        assert!(!scope.is_finished());
        drop(scope);

        // Sender is dropped with the aborted task
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_twice_is_safe() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let abort = handle.abort_handle();
        let scope = AutoCancellingTask::new(abort);
        scope.cancel();
        scope.cancel();
        drop(scope);

        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
